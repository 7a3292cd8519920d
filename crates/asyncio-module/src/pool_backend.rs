//! `PoolBackend`: default `AsyncIoBackend` implementation.
//!
//! Spawns N OS threads at creation. Issuers push work items onto a
//! lock-free MPMC queue and poke a notifier; workers dequeue, perform
//! positional I/O with `pread`/`pwrite` semantics, and push the finished
//! `NativeCompletion` onto the completion queue the request named. The
//! thread blocked in `wait()` on that queue is woken through its
//! platform notifier.
//!
//! No dynamic scaling. Simple, predictable, safe.

use asyncio_core::backend::{AsyncIoBackend, OpenMode};
use asyncio_core::buffer::TransferBuffer;
use asyncio_core::entry::{NativeCompletion, RequestToken, TaskKind};
use asyncio_core::env::env_get;
use asyncio_core::error::{AsyncIoError, Result};
use asyncio_core::notifier::Notifier;
use asyncio_core::{kdebug, kwarn};

use crate::condvar_notifier::CondvarNotifier;
use crate::PlatformNotifier;

use crossbeam_queue::{ArrayQueue, SegQueue};
use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Pool sizing.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Worker threads.
    pub workers: usize,
    /// Max queued-but-not-started work items before issuance is refused.
    pub queue_depth: usize,
}

impl PoolConfig {
    /// Defaults with `ASYNCIO_POOL_WORKERS` / `ASYNCIO_POOL_DEPTH` overrides.
    ///
    /// Default workers: min(8, nproc/2), at least 2.
    pub fn from_env() -> Self {
        let cpus = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            workers: env_get("ASYNCIO_POOL_WORKERS", (cpus / 2).clamp(2, 8)),
            queue_depth: env_get("ASYNCIO_POOL_DEPTH", 1024),
        }
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.workers = n;
        self
    }

    pub fn queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 || self.workers > 64 {
            return Err(AsyncIoError::InvalidArgument("pool workers must be in 1..=64"));
        }
        if self.queue_depth == 0 {
            return Err(AsyncIoError::InvalidArgument("pool queue depth must be > 0"));
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Per-queue state shared between the waiter and the workers.
struct QueueInner {
    completions: SegQueue<NativeCompletion>,
    notifier: PlatformNotifier,
}

/// Native queue handle of the pool backend.
pub struct PoolQueue {
    inner: Arc<QueueInner>,
}

/// Native file handle of the pool backend.
pub type PoolFile = Arc<File>;

enum Op {
    Read { file: PoolFile, offset: u64, buf: TransferBuffer },
    Write { file: PoolFile, offset: u64, buf: TransferBuffer },
    Close { file: PoolFile, flush: bool },
    Load { path: PathBuf },
}

impl Op {
    fn kind(&self) -> TaskKind {
        match self {
            Op::Read { .. } => TaskKind::Read,
            Op::Write { .. } => TaskKind::Write,
            Op::Close { .. } => TaskKind::Close,
            Op::Load { .. } => TaskKind::Load,
        }
    }
}

/// A work item for the pool.
struct WorkItem {
    token: RequestToken,
    queue: Arc<QueueInner>,
    op: Op,
}

/// Shared state between issuers and workers.
struct PoolInner {
    /// Work queue: issuers → workers.
    work_queue: ArrayQueue<WorkItem>,
    /// Wakes idle workers.
    work_ready: CondvarNotifier,
    /// Number of workers currently executing an op.
    active: AtomicUsize,
    shutdown: AtomicBool,
    total: usize,
}

pub struct PoolBackend {
    inner: Arc<PoolInner>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl PoolBackend {
    pub fn new(config: PoolConfig) -> Result<Self> {
        config.validate()?;
        let inner = Arc::new(PoolInner {
            work_queue: ArrayQueue::new(config.queue_depth),
            work_ready: CondvarNotifier::new(),
            active: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            total: config.workers,
        });

        let mut backend = PoolBackend {
            inner,
            handles: Vec::with_capacity(config.workers),
        };
        for worker_id in 0..config.workers {
            let inner = Arc::clone(&backend.inner);
            let handle = thread::Builder::new()
                .name(format!("asyncio-worker-{}", worker_id))
                .spawn(move || worker_loop(inner))
                .map_err(|e| AsyncIoError::Allocation(format!("worker thread: {}", e)))?;
            backend.handles.push(handle);
        }
        kdebug!("pool backend: {} workers, depth {}", config.workers, config.queue_depth);
        Ok(backend)
    }

    /// Workers currently executing an op.
    pub fn active_workers(&self) -> usize {
        self.inner.active.load(Ordering::Relaxed)
    }

    pub fn total_workers(&self) -> usize {
        self.inner.total
    }

    fn enqueue(&self, queue: &PoolQueue, token: RequestToken, op: Op) -> Result<()> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(AsyncIoError::Issuance("worker pool is shut down".into()));
        }
        let item = WorkItem {
            token,
            queue: Arc::clone(&queue.inner),
            op,
        };
        self.inner
            .work_queue
            .push(item)
            .map_err(|_| AsyncIoError::Issuance("worker queue full".into()))?;
        self.inner.work_ready.notify()
    }
}

impl Drop for PoolBackend {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.work_ready.notify_all();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl AsyncIoBackend for PoolBackend {
    type Queue = PoolQueue;
    type File = PoolFile;

    fn name(&self) -> &'static str {
        "pool"
    }

    fn create_queue(&self) -> Result<PoolQueue> {
        let notifier = new_notifier()?;
        Ok(PoolQueue {
            inner: Arc::new(QueueInner {
                completions: SegQueue::new(),
                notifier,
            }),
        })
    }

    fn wait(&self, queue: &PoolQueue, timeout: Option<Duration>) -> Option<NativeCompletion> {
        if let Some(c) = queue.inner.completions.pop() {
            return Some(c);
        }
        if !queue.inner.notifier.wait(timeout) {
            return None;
        }
        // Woken by a worker or by signal(); the latter leaves the queue empty.
        queue.inner.completions.pop()
    }

    fn signal(&self, queue: &PoolQueue) {
        if let Err(e) = queue.inner.notifier.notify() {
            kwarn!("pool backend: signal failed: {}", e);
        }
    }

    fn destroy_queue(&self, queue: PoolQueue) {
        let mut dropped = 0usize;
        while queue.inner.completions.pop().is_some() {
            dropped += 1;
        }
        if dropped > 0 {
            kdebug!("pool backend: destroyed queue with {} undelivered completions", dropped);
        }
        // Workers still holding the Arc push into a queue nobody reads.
    }

    fn open(&self, path: &Path, mode: OpenMode) -> Result<PoolFile> {
        let file = mode.options().open(path)?;
        Ok(Arc::new(file))
    }

    fn size(&self, file: &PoolFile) -> Result<u64> {
        Ok(file.metadata()?.len())
    }

    fn read(
        &self,
        queue: &PoolQueue,
        file: &PoolFile,
        offset: u64,
        buf: TransferBuffer,
        token: RequestToken,
    ) -> Result<()> {
        self.enqueue(queue, token, Op::Read { file: Arc::clone(file), offset, buf })
    }

    fn write(
        &self,
        queue: &PoolQueue,
        file: &PoolFile,
        offset: u64,
        buf: TransferBuffer,
        token: RequestToken,
    ) -> Result<()> {
        self.enqueue(queue, token, Op::Write { file: Arc::clone(file), offset, buf })
    }

    fn close(&self, queue: &PoolQueue, file: PoolFile, flush: bool, token: RequestToken) -> Result<()> {
        self.enqueue(queue, token, Op::Close { file, flush })
    }

    fn load(&self, queue: &PoolQueue, path: &Path, token: RequestToken) -> Result<()> {
        self.enqueue(queue, token, Op::Load { path: path.to_path_buf() })
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        fn new_notifier() -> Result<PlatformNotifier> {
            PlatformNotifier::create()
        }
    } else {
        fn new_notifier() -> Result<PlatformNotifier> {
            Ok(PlatformNotifier::new())
        }
    }
}

/// Worker thread main loop.
fn worker_loop(inner: Arc<PoolInner>) {
    loop {
        match inner.work_queue.pop() {
            Some(item) => {
                inner.active.fetch_add(1, Ordering::Relaxed);
                let completion = execute(item.token, item.op);
                inner.active.fetch_sub(1, Ordering::Relaxed);

                item.queue.completions.push(completion);
                if let Err(e) = item.queue.notifier.notify() {
                    kwarn!("pool worker: completion notify failed: {}", e);
                }
            }
            None => {
                if inner.shutdown.load(Ordering::Acquire) {
                    break;
                }
                // Timeout is a backstop; issuers notify on every push.
                inner.work_ready.wait(Some(Duration::from_millis(50)));
            }
        }
    }
}

/// Run one op to completion on the current (worker) thread.
///
/// This MAY block. That's the point.
fn execute(token: RequestToken, op: Op) -> NativeCompletion {
    let kind = op.kind();
    match op {
        Op::Read { file, offset, mut buf } => {
            let requested = buf.capacity() as u64;
            match read_full_at(&file, buf.spare_mut(), offset) {
                Ok(n) => {
                    buf.set_len(n);
                    NativeCompletion::complete(token, kind, Some(buf), offset, requested, n as u64)
                }
                Err(e) => NativeCompletion::failure(token, kind, requested, e.to_string()),
            }
        }
        Op::Write { file, offset, buf } => {
            let requested = buf.len() as u64;
            match file.write_all_at(buf.as_slice(), offset) {
                Ok(()) => NativeCompletion::complete(token, kind, Some(buf), offset, requested, requested),
                Err(e) => NativeCompletion::failure(token, kind, requested, e.to_string()),
            }
        }
        Op::Close { file, flush } => {
            if flush {
                if let Err(e) = file.sync_all() {
                    return NativeCompletion::failure(token, kind, 0, format!("flush: {}", e));
                }
            }
            // Last reference closes the descriptor; in-flight reads keep it alive.
            drop(file);
            NativeCompletion::complete(token, kind, None, 0, 0, 0)
        }
        Op::Load { path } => match std::fs::read(&path) {
            Ok(data) => {
                let n = data.len() as u64;
                NativeCompletion::complete(token, kind, Some(TransferBuffer::from_vec(data)), 0, n, n)
            }
            Err(e) => NativeCompletion::failure(token, kind, 0, format!("{}: {}", path.display(), e)),
        },
    }
}

/// `pread` until the buffer is full or EOF. Returns bytes read.
fn read_full_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    let mut done = 0;
    while done < buf.len() {
        match file.read_at(&mut buf[done..], offset + done as u64) {
            Ok(0) => break,
            Ok(n) => done += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(done)
}

#[cfg(test)]
mod tests {
    use super::*;
    use asyncio_core::entry::result_code;
    use std::io::Write;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("asyncio-pool-{}-{}", std::process::id(), name))
    }

    fn backend() -> PoolBackend {
        PoolBackend::new(PoolConfig::from_env().workers(2).queue_depth(64)).unwrap()
    }

    fn wait_one(b: &PoolBackend, q: &PoolQueue) -> NativeCompletion {
        for _ in 0..100 {
            if let Some(c) = b.wait(q, Some(Duration::from_millis(50))) {
                return c;
            }
        }
        panic!("no completion within 5s");
    }

    #[test]
    fn test_config_validation() {
        assert!(PoolConfig::from_env().workers(0).validate().is_err());
        assert!(PoolConfig::from_env().workers(2).queue_depth(0).validate().is_err());
        assert!(PoolConfig::from_env().workers(2).queue_depth(8).validate().is_ok());
    }

    #[test]
    fn test_short_read_reports_transferred() {
        let path = temp_path("short");
        std::fs::File::create(&path).unwrap().write_all(&[7u8; 50]).unwrap();

        let b = backend();
        let q = b.create_queue().unwrap();
        let f = b.open(&path, OpenMode::Read).unwrap();
        assert_eq!(b.size(&f).unwrap(), 50);

        let token = RequestToken::new(1, 0);
        b.read(&q, &f, 0, TransferBuffer::for_read(100).unwrap(), token).unwrap();
        let c = wait_one(&b, &q);
        assert_eq!(c.token, token);
        assert_eq!(c.code, result_code::COMPLETE);
        assert_eq!(c.bytes_requested, 100);
        assert_eq!(c.bytes_transferred, 50);
        assert_eq!(c.buffer.unwrap().into_vec(), vec![7u8; 50]);

        b.destroy_queue(q);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_write_then_close_with_flush() {
        let path = temp_path("write");
        let b = backend();
        let q = b.create_queue().unwrap();
        let f = b.open(&path, OpenMode::Write).unwrap();

        b.write(&q, &f, 3, TransferBuffer::for_write(b"xyz").unwrap(), RequestToken::new(2, 0)).unwrap();
        let c = wait_one(&b, &q);
        assert_eq!(c.kind, TaskKind::Write);
        assert_eq!(c.bytes_transferred, 3);

        b.close(&q, f, true, RequestToken::new(3, 0)).unwrap();
        let c = wait_one(&b, &q);
        assert_eq!(c.kind, TaskKind::Close);
        assert_eq!(c.code, result_code::COMPLETE);

        assert_eq!(std::fs::read(&path).unwrap(), b"\0\0\0xyz");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let b = backend();
        let q = b.create_queue().unwrap();
        b.load(&q, Path::new("/nonexistent/asyncio/file"), RequestToken::new(4, 0)).unwrap();
        let c = wait_one(&b, &q);
        assert_eq!(c.code, result_code::FAILURE);
        assert!(c.message.contains("/nonexistent/asyncio/file"));
    }

    #[test]
    fn test_signal_wakes_waiter_without_completion() {
        let b = Arc::new(backend());
        let q = Arc::new(b.create_queue().unwrap());
        let (b2, q2) = (Arc::clone(&b), Arc::clone(&q));
        let waiter = thread::spawn(move || b2.wait(&q2, None));
        thread::sleep(Duration::from_millis(20));
        b.signal(&q);
        assert!(waiter.join().unwrap().is_none());
    }

    #[test]
    fn test_queue_full_refuses_issuance() {
        // Park the only worker in open() on a fifo with no writer.
        let fifo = temp_path("fifo");
        let _ = std::fs::remove_file(&fifo);
        let c_path = std::ffi::CString::new(fifo.to_str().unwrap()).unwrap();
        assert_eq!(unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) }, 0);

        let b = PoolBackend::new(PoolConfig::from_env().workers(1).queue_depth(1)).unwrap();
        let q = b.create_queue().unwrap();
        b.load(&q, &fifo, RequestToken::new(1, 0)).unwrap();
        for _ in 0..500 {
            if b.active_workers() == 1 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(b.active_workers(), 1);

        b.load(&q, Path::new("/dev/null"), RequestToken::new(2, 0)).unwrap();
        let err = b.load(&q, Path::new("/dev/null"), RequestToken::new(3, 0)).unwrap_err();
        assert!(matches!(err, AsyncIoError::Issuance(_)));

        // Unblock the worker: opening the write end and closing it gives EOF.
        drop(std::fs::OpenOptions::new().write(true).open(&fifo).unwrap());
        let first = wait_one(&b, &q);
        let second = wait_one(&b, &q);
        assert_eq!(first.code, result_code::COMPLETE);
        assert_eq!(second.code, result_code::COMPLETE);
        let _ = std::fs::remove_file(&fifo);
    }
}
