//! `UringBackend`: Linux `AsyncIoBackend` implementation over io_uring.
//!
//! One ring per completion queue. Issuers push SQEs under a short lock and
//! call `io_uring_enter()` immediately; the poll thread is the only reader
//! of the CQ. No SQPOLL, no fixed files, no fixed buffers.
//!
//! Buffers and file references for every in-flight SQE live in a per-ring
//! table keyed by `user_data` until their CQE is reaped, so the kernel
//! never writes into freed memory.

use asyncio_core::backend::{AsyncIoBackend, OpenMode};
use asyncio_core::buffer::TransferBuffer;
use asyncio_core::entry::{NativeCompletion, RequestToken, TaskKind};
use asyncio_core::error::{AsyncIoError, Result};
use asyncio_core::{kdebug, ktrace, kwarn};

use io_uring::{opcode, types, IoUring};
use nix::errno::Errno;
use std::collections::HashMap;
use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Configuration for UringBackend.
#[derive(Debug, Clone)]
pub struct UringConfig {
    /// Number of SQ entries per ring. Rounded up to a power of 2 by the kernel.
    pub sq_entries: u32,
}

impl Default for UringConfig {
    fn default() -> Self {
        Self { sq_entries: 256 }
    }
}

/// What a CQE needs to become a `NativeCompletion`.
struct Inflight {
    kind: TaskKind,
    offset: u64,
    requested: u64,
    buffer: Option<TransferBuffer>,
    /// Keeps the fd open until the kernel is done with it. For close,
    /// this is the last reference and the fd closes at reap.
    _file: Option<Arc<File>>,
}

/// Native queue handle of the io_uring backend.
pub struct UringQueue {
    ring: IoUring,
    /// Serializes SQ producers.
    sq_lock: Mutex<()>,
    inflight: Mutex<HashMap<u64, Inflight>>,
    ext_arg: bool,
}

// Safety: the SQ is only touched under `sq_lock`; the CQ is only touched by
// the single thread calling `wait()` (the queue's poll thread).
unsafe impl Send for UringQueue {}
unsafe impl Sync for UringQueue {}

pub type UringFile = Arc<File>;

/// Pushes tried for a wake NOP before giving up on a full ring.
const SIGNAL_PUSH_ATTEMPTS: usize = 64;

/// 10ms wait rounds spent reaping before a ring is torn down.
const DESTROY_DRAIN_ROUNDS: usize = 100;

pub struct UringBackend {
    config: UringConfig,
}

impl UringBackend {
    pub fn new(config: UringConfig) -> Result<Self> {
        if config.sq_entries == 0 {
            return Err(AsyncIoError::InvalidArgument("sq_entries must be > 0"));
        }
        Ok(Self { config })
    }

    /// True if the running kernel lets us build a ring at all.
    pub fn is_supported() -> bool {
        IoUring::new(2).is_ok()
    }

    /// Push one SQE and submit it. The in-flight entry is inserted first so
    /// a fast CQE always finds it.
    fn push(&self, queue: &UringQueue, sqe: io_uring::squeue::Entry, token: RequestToken, entry: Inflight) -> Result<()> {
        let key = token.0;
        lock(&queue.inflight).insert(key, entry);

        let _guard = lock(&queue.sq_lock);
        // Safety: SQ access is serialized by sq_lock; the SQE's buffer
        // and fd are owned by the in-flight table until reaped.
        let pushed = unsafe { queue.ring.submission_shared().push(&sqe.user_data(key)).is_ok() };
        if !pushed {
            lock(&queue.inflight).remove(&key);
            return Err(AsyncIoError::Issuance("submission ring full".into()));
        }
        // Once pushed the SQE is committed: the next io_uring_enter from any
        // thread submits it, so a failed enter here is not a rejection.
        if let Err(e) = queue.ring.submitter().submit() {
            kwarn!("uring: submit after push failed: {}", e);
        }
        Ok(())
    }

    fn reap(queue: &UringQueue) -> Option<NativeCompletion> {
        loop {
            // Safety: only the poll thread reads the CQ.
            let cqe = unsafe { queue.ring.completion_shared().next() }?;
            let key = cqe.user_data();
            if key == RequestToken::NONE.0 {
                // Wake-up NOP from signal().
                return None;
            }
            let Some(entry) = lock(&queue.inflight).remove(&key) else {
                kwarn!("uring: CQE for unknown user_data {:#x}", key);
                continue;
            };
            return Some(to_completion(RequestToken(key), entry, cqe.result()));
        }
    }
}

impl Default for UringBackend {
    fn default() -> Self {
        Self { config: UringConfig::default() }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn to_completion(token: RequestToken, entry: Inflight, res: i32) -> NativeCompletion {
    if res < 0 {
        let errno = Errno::from_raw(-res);
        if errno == Errno::ECANCELED {
            return NativeCompletion::canceled(token, entry.kind, entry.requested);
        }
        return NativeCompletion::failure(token, entry.kind, entry.requested, errno.desc().to_string());
    }
    let transferred = res as u64;
    let buffer = entry.buffer.map(|mut buf| {
        if entry.kind.returns_buffer() {
            buf.set_len(res as usize);
        }
        buf
    });
    match entry.kind {
        TaskKind::Close => NativeCompletion::complete(token, entry.kind, None, 0, 0, 0),
        _ => NativeCompletion::complete(token, entry.kind, buffer, entry.offset, entry.requested, transferred),
    }
}

impl AsyncIoBackend for UringBackend {
    type Queue = UringQueue;
    type File = UringFile;

    fn name(&self) -> &'static str {
        "io_uring"
    }

    fn create_queue(&self) -> Result<UringQueue> {
        let ring = IoUring::builder()
            .build(self.config.sq_entries)
            .map_err(|e| AsyncIoError::Allocation(format!("io_uring_setup: {}", e)))?;
        let ext_arg = ring.params().is_feature_ext_arg();
        if !ext_arg {
            kdebug!("uring: kernel lacks EXT_ARG, wait timeouts are ignored");
        }
        Ok(UringQueue {
            ring,
            sq_lock: Mutex::new(()),
            inflight: Mutex::new(HashMap::new()),
            ext_arg,
        })
    }

    fn wait(&self, queue: &UringQueue, timeout: Option<Duration>) -> Option<NativeCompletion> {
        if let Some(c) = Self::reap(queue) {
            return Some(c);
        }
        let waited = match timeout {
            Some(t) if queue.ext_arg => {
                let ts = types::Timespec::new().sec(t.as_secs()).nsec(t.subsec_nanos());
                let args = types::SubmitArgs::new().timespec(&ts);
                queue.ring.submitter().submit_with_args(1, &args)
            }
            _ => queue.ring.submitter().submit_and_wait(1),
        };
        match waited {
            Ok(_) => {}
            Err(e) if matches!(e.raw_os_error(), Some(libc::ETIME) | Some(libc::EINTR)) => {}
            Err(e) => {
                kwarn!("uring: wait failed: {}", e);
                return None;
            }
        }
        Self::reap(queue)
    }

    fn signal(&self, queue: &UringQueue) {
        let _guard = lock(&queue.sq_lock);
        let nop = opcode::Nop::new().build().user_data(RequestToken::NONE.0);
        for attempt in 0..SIGNAL_PUSH_ATTEMPTS {
            // Safety: serialized by sq_lock; NOP carries no memory.
            let pushed = unsafe { queue.ring.submission_shared().push(&nop).is_ok() };
            if pushed {
                if let Err(e) = queue.ring.submitter().submit() {
                    kwarn!("uring: signal submit failed: {}", e);
                }
                return;
            }
            // Ring full: hand queued entries to the kernel to free slots.
            ktrace!("uring: signal ring full, flushing (attempt {})", attempt + 1);
            if let Err(e) = queue.ring.submitter().submit() {
                kwarn!("uring: flush for signal failed: {}", e);
                std::thread::yield_now();
            }
        }
        kwarn!("uring: signal dropped after {} attempts, submission ring full", SIGNAL_PUSH_ATTEMPTS);
    }

    fn destroy_queue(&self, queue: UringQueue) {
        // Reap what is still in flight so no buffer is freed under the kernel.
        for _ in 0..DESTROY_DRAIN_ROUNDS {
            if lock(&queue.inflight).is_empty() {
                break;
            }
            let _ = self.wait(&queue, Some(Duration::from_millis(10)));
        }
        let UringQueue { ring, inflight, .. } = queue;
        let left = lock(&inflight).len();
        drop(ring);
        if left > 0 {
            kwarn!("uring: {} requests still in flight at destroy, leaking their buffers", left);
            std::mem::forget(inflight);
        }
    }

    fn open(&self, path: &Path, mode: OpenMode) -> Result<UringFile> {
        Ok(Arc::new(mode.options().open(path)?))
    }

    fn size(&self, file: &UringFile) -> Result<u64> {
        Ok(file.metadata()?.len())
    }

    fn read(
        &self,
        queue: &UringQueue,
        file: &UringFile,
        offset: u64,
        mut buf: TransferBuffer,
        token: RequestToken,
    ) -> Result<()> {
        let len = u32::try_from(buf.capacity())
            .map_err(|_| AsyncIoError::Issuance("read larger than 4 GiB".into()))?;
        let sqe = opcode::Read::new(types::Fd(file.as_raw_fd()), buf.as_mut_ptr(), len)
            .offset(offset)
            .build();
        ktrace!("uring: read {} @{} {}", len, offset, token);
        self.push(queue, sqe, token, Inflight {
            kind: TaskKind::Read,
            offset,
            requested: u64::from(len),
            buffer: Some(buf),
            _file: Some(Arc::clone(file)),
        })
    }

    fn write(
        &self,
        queue: &UringQueue,
        file: &UringFile,
        offset: u64,
        buf: TransferBuffer,
        token: RequestToken,
    ) -> Result<()> {
        let len = u32::try_from(buf.len())
            .map_err(|_| AsyncIoError::Issuance("write larger than 4 GiB".into()))?;
        let sqe = opcode::Write::new(types::Fd(file.as_raw_fd()), buf.as_ptr(), len)
            .offset(offset)
            .build();
        ktrace!("uring: write {} @{} {}", len, offset, token);
        self.push(queue, sqe, token, Inflight {
            kind: TaskKind::Write,
            offset,
            requested: u64::from(len),
            buffer: Some(buf),
            _file: Some(Arc::clone(file)),
        })
    }

    fn close(&self, queue: &UringQueue, file: UringFile, flush: bool, token: RequestToken) -> Result<()> {
        // The descriptor closes when the last Arc drops at reap, after any
        // read or write still in flight on it.
        let sqe = if flush {
            opcode::Fsync::new(types::Fd(file.as_raw_fd())).build()
        } else {
            opcode::Nop::new().build()
        };
        self.push(queue, sqe, token, Inflight {
            kind: TaskKind::Close,
            offset: 0,
            requested: 0,
            buffer: None,
            _file: Some(file),
        })
    }

    fn load(&self, queue: &UringQueue, path: &Path, token: RequestToken) -> Result<()> {
        let file = File::open(path)
            .map_err(|e| AsyncIoError::Issuance(format!("{}: {}", path.display(), e)))?;
        let size = file
            .metadata()
            .map_err(|e| AsyncIoError::Issuance(format!("{}: {}", path.display(), e)))?
            .len();
        let len = u32::try_from(size)
            .map_err(|_| AsyncIoError::Issuance("file larger than 4 GiB".into()))?;
        let mut buf = TransferBuffer::for_read(len as usize)
            .ok_or_else(|| AsyncIoError::Allocation(format!("{} byte load buffer", len)))?;
        let file = Arc::new(file);
        let sqe = opcode::Read::new(types::Fd(file.as_raw_fd()), buf.as_mut_ptr(), len)
            .offset(0)
            .build();
        self.push(queue, sqe, token, Inflight {
            kind: TaskKind::Load,
            offset: 0,
            requested: u64::from(len),
            buffer: Some(buf),
            _file: Some(file),
        })
    }
}
