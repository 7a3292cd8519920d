//! asyncio End-to-End Smoke Test
//!
//! Runs every queue operation against each real backend:
//!   Part A: PoolBackend (worker threads)
//!   Part B: UringBackend (io_uring, Linux; skipped if unavailable)
//!
//! Each part: open modes, write, read, short read, size, close with flush,
//! closed-handle rejection, whole-file load, concurrent reads, shutdown.
//!
//! Run: ./target/release/asyncio-smoke [scratch-dir]

use asyncio_core::backend::AsyncIoBackend;
use asyncio_core::error::AsyncIoError;
use asyncio_core::kprint;
use asyncio_module::{PoolBackend, PoolConfig};
use asyncio_queue::{block_on, load_file, AsyncFile, CompletionQueue, QueueConfig};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

// ── Test harness ──

struct TestRunner {
    total: usize,
    passed: usize,
    failed: usize,
}

const LINE: &str = "────────────────────────────────────────────────────────────";

impl TestRunner {
    fn new() -> Self {
        Self { total: 0, passed: 0, failed: 0 }
    }

    fn section(&self, name: &str) {
        println!("\n{}", LINE);
        println!("  {}", name);
        println!("{}", LINE);
    }

    fn pass(&mut self, name: &str) {
        self.total += 1;
        self.passed += 1;
        println!("  [{:2}] {:<52} PASS", self.total, name);
    }

    fn fail(&mut self, name: &str, reason: &str) {
        self.total += 1;
        self.failed += 1;
        println!("  [{:2}] {:<52} FAIL: {}", self.total, name, reason);
    }

    fn check(&mut self, name: &str, ok: bool, reason: &str) {
        if ok { self.pass(name); } else { self.fail(name, reason); }
    }

    fn summary(&self) {
        println!("\n{}", LINE);
        println!(
            "  Total: {}  Passed: {}  Failed: {}",
            self.total, self.passed, self.failed
        );
        println!("{}", LINE);
    }
}

fn scratch(dir: &Path, backend: &str, name: &str) -> PathBuf {
    dir.join(format!("asyncio-smoke-{}-{}-{}", std::process::id(), backend, name))
}

/// Everything a backend must get right, through the public queue API.
fn exercise<B: AsyncIoBackend>(t: &mut TestRunner, backend: Arc<B>, dir: &Path) {
    let name = backend.name();
    let queue = match CompletionQueue::with_config(Arc::clone(&backend), QueueConfig::from_env()) {
        Ok(q) => q,
        Err(e) => {
            t.fail("create completion queue", &e.to_string());
            return;
        }
    };
    t.pass("create completion queue");

    let path = scratch(dir, name, "rw");
    t.check(
        "reject open mode \"a\"",
        matches!(AsyncFile::open(&path, "a", &queue), Err(AsyncIoError::InvalidArgument(_))),
        "mode accepted",
    );

    let file = match AsyncFile::open(&path, "w+", &queue) {
        Ok(f) => f,
        Err(e) => {
            t.fail("open w+", &e.to_string());
            return;
        }
    };
    t.pass("open w+");

    let payload: Vec<u8> = (0..50u8).collect();
    match block_on(file.write(&queue, 0, &payload)) {
        Ok(n) => t.check("write 50 bytes @0", n == 50, &format!("wrote {}", n)),
        Err(e) => t.fail("write 50 bytes @0", &e.to_string()),
    }

    match block_on(file.read(&queue, 10, 5)) {
        Ok(b) => t.check("read 5 bytes @10", b == [10, 11, 12, 13, 14], &format!("{:?}", b)),
        Err(e) => t.fail("read 5 bytes @10", &e.to_string()),
    }

    match block_on(file.read(&queue, 0, 100)) {
        Ok(b) => t.check("read 100 on 50-byte file -> 50", b == payload, &format!("got {} bytes", b.len())),
        Err(e) => t.fail("read 100 on 50-byte file -> 50", &e.to_string()),
    }

    match block_on(file.read(&queue, 500, 10)) {
        Ok(b) => t.check("read past EOF -> empty", b.is_empty(), &format!("got {} bytes", b.len())),
        Err(e) => t.fail("read past EOF -> empty", &e.to_string()),
    }

    match file.size() {
        Ok(n) => t.check("size", n == 50, &format!("size {}", n)),
        Err(e) => t.fail("size", &e.to_string()),
    }

    // Concurrent reads, resolved in whatever order the backend finishes.
    let start = Instant::now();
    let pending: Vec<_> = (0..50u64)
        .map(|i| (i, file.submit_read(&queue, i, 1)))
        .collect();
    let mut ok = true;
    for (i, c) in pending {
        match c.map(|c| c.wait().into_bytes()) {
            Ok(Ok(b)) if b == [i as u8] => {}
            _ => ok = false,
        }
    }
    t.check(
        &format!("50 concurrent 1-byte reads ({:?})", start.elapsed()),
        ok,
        "wrong or missing byte",
    );

    let closing = file.submit_close(&queue, true);
    t.check(
        "read after close issued -> AlreadyClosed",
        matches!(file.submit_read(&queue, 0, 1), Err(AsyncIoError::AlreadyClosed)),
        "handle still usable",
    );
    match closing.map(|c| c.wait().into_result()) {
        Ok(Ok(())) => t.pass("close with flush"),
        Ok(Err(e)) | Err(e) => t.fail("close with flush", &e.to_string()),
    }
    t.check(
        "size after close -> AlreadyClosed",
        file.size() == Err(AsyncIoError::AlreadyClosed),
        "size succeeded",
    );

    match block_on(load_file(&path, &queue)) {
        Ok(b) => t.check("load whole file", b == payload, &format!("got {} bytes", b.len())),
        Err(e) => t.fail("load whole file", &e.to_string()),
    }

    let missing = scratch(dir, name, "missing");
    t.check(
        "load missing file -> OperationFailed",
        matches!(block_on(load_file(&missing, &queue)), Err(AsyncIoError::OperationFailed(_))),
        "load succeeded",
    );

    t.check("no requests left pending", queue.pending() == 0, &format!("{}", queue.pending()));
    t.check("no buffers leaked", queue.buffers_in_use() == 0, &format!("{}", queue.buffers_in_use()));

    queue.shutdown();
    t.check(
        "issue after shutdown -> Issuance",
        matches!(queue.submit_load(&path), Err(AsyncIoError::Issuance(_))),
        "queue still accepting",
    );

    let _ = std::fs::remove_file(&path);
}

fn test_pool(t: &mut TestRunner, dir: &Path) {
    t.section("Part A: PoolBackend");
    let config = PoolConfig::from_env();
    println!("  workers={} depth={}", config.workers, config.queue_depth);
    match PoolBackend::new(config) {
        Ok(b) => exercise(t, Arc::new(b), dir),
        Err(e) => t.fail("start worker pool", &e.to_string()),
    }
}

#[cfg(target_os = "linux")]
fn test_uring(t: &mut TestRunner, dir: &Path) {
    use asyncio_module::{UringBackend, UringConfig};

    t.section("Part B: UringBackend");
    if !UringBackend::is_supported() {
        println!("  io_uring unavailable on this kernel, skipping");
        return;
    }
    match UringBackend::new(UringConfig::default()) {
        Ok(b) => exercise(t, Arc::new(b), dir),
        Err(e) => t.fail("configure io_uring backend", &e.to_string()),
    }
}

#[cfg(not(target_os = "linux"))]
fn test_uring(t: &mut TestRunner, _dir: &Path) {
    t.section("Part B: UringBackend");
    println!("  not Linux, skipping");
}

fn main() {
    kprint::init();
    println!("=== asyncio End-to-End Smoke Test ===");
    let dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir);
    println!("    scratch: {}", dir.display());

    let mut t = TestRunner::new();
    test_pool(&mut t, &dir);
    test_uring(&mut t, &dir);

    t.summary();
    std::process::exit(if t.failed > 0 { 1 } else { 0 });
}
