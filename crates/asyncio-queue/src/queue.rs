//! # CompletionQueue: the completion poller
//!
//! Each queue owns one native completion queue and one dedicated poll
//! thread. The poll thread:
//! 1. Blocks in `backend.wait()` until a completion or a wake signal
//! 2. Retrieves-and-clears the waiter registered under the token
//! 3. Classifies the native result code and builds a `CompletionOutcome`
//! 4. Resumes the waiter through its one-shot channel
//!
//! Issuers register their waiter *before* handing the request to the
//! backend, so a completion can never race ahead of its registration.
//! A request the backend refuses is resolved on the issuing thread with a
//! synthesized failure; the poll thread is not involved.

use crate::config::QueueConfig;
use crate::oneshot;
use crate::outcome::{CompletionOutcome, OutcomeResult};
use crate::registry::PendingRegistry;

use asyncio_core::backend::AsyncIoBackend;
use asyncio_core::buffer::{BufferProvider, TransferBuffer};
use asyncio_core::entry::{NativeCompletion, RequestToken, TaskKind};
use asyncio_core::error::{AsyncIoError, Result};
use asyncio_core::{kdebug, kinfo, ktrace, kwarn};
use asyncio_module::HeapBuffers;

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock, RwLockReadGuard};
use std::task::{Context, Poll};
use std::thread;
use std::time::Duration;

/// A registered caller.
struct Waiter {
    sender: oneshot::Sender<CompletionOutcome>,
    kind: TaskKind,
    requested: u64,
    /// The transfer buffer came from the queue's provider.
    holds_buffer: bool,
}

/// State shared between the queue handle and its poll thread.
struct Shared<B: AsyncIoBackend> {
    backend: Arc<B>,
    /// `None` once shutdown has destroyed it.
    native: RwLock<Option<B::Queue>>,
    registry: PendingRegistry<Waiter>,
    running: AtomicBool,
    buffers: Box<dyn BufferProvider>,
    poll_timeout: Option<Duration>,
}

impl<B: AsyncIoBackend> Shared<B> {
    fn read_native(&self) -> RwLockReadGuard<'_, Option<B::Queue>> {
        self.native.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Route one native completion to its waiter.
    fn dispatch(&self, mut native: NativeCompletion) {
        let Some(waiter) = self.registry.take(native.token) else {
            kdebug!(
                "dropping {} completion for stale {}",
                native.kind.as_str(),
                native.token
            );
            return;
        };
        let result = OutcomeResult::classify(native.code, &native.message);
        let bytes = self.settle_buffer(&waiter, &result, native.buffer.take());
        // Loads are sized by the backend; everything else keeps the
        // issue-time request.
        let requested = match waiter.kind {
            TaskKind::Load => native.bytes_requested,
            _ => waiter.requested,
        };
        ktrace!("{} {} resolved: {:?}", waiter.kind.as_str(), native.token, result);
        let outcome = CompletionOutcome::new(
            result,
            waiter.kind,
            native.offset,
            requested,
            native.bytes_transferred,
            bytes,
        );
        waiter.sender.send(outcome);
    }

    /// Every provider buffer is either released or detached exactly once.
    fn settle_buffer(
        &self,
        waiter: &Waiter,
        result: &OutcomeResult,
        returned: Option<TransferBuffer>,
    ) -> Option<Vec<u8>> {
        let keep = *result == OutcomeResult::Complete && waiter.kind.returns_buffer();
        match returned {
            Some(buf) if keep => {
                if waiter.holds_buffer {
                    self.buffers.detach();
                }
                Some(buf.into_vec())
            }
            Some(buf) => {
                if waiter.holds_buffer {
                    self.buffers.release(buf);
                }
                None
            }
            None => {
                if waiter.holds_buffer {
                    self.buffers.detach();
                }
                None
            }
        }
    }

    /// Resolve a waiter the backend will never report on.
    fn resolve_locally(&self, waiter: Waiter, outcome: CompletionOutcome) {
        if waiter.holds_buffer {
            self.buffers.detach();
        }
        waiter.sender.send(outcome);
    }
}

/// Future for one issued request. Resolves exactly once.
pub struct Completion {
    rx: oneshot::Receiver<CompletionOutcome>,
    kind: TaskKind,
    requested: u64,
}

impl Completion {
    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    /// True once the outcome is available.
    pub fn is_resolved(&self) -> bool {
        self.rx.is_resolved()
    }

    /// Block the calling thread until the outcome arrives.
    pub fn wait(self) -> CompletionOutcome {
        let (kind, requested) = (self.kind, self.requested);
        self.rx
            .recv_blocking()
            .unwrap_or_else(|| CompletionOutcome::canceled(kind, requested))
    }
}

impl Future for Completion {
    type Output = CompletionOutcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<CompletionOutcome> {
        let this = self.get_mut();
        let (kind, requested) = (this.kind, this.requested);
        Pin::new(&mut this.rx)
            .poll(cx)
            .map(|o| o.unwrap_or_else(|| CompletionOutcome::canceled(kind, requested)))
    }
}

/// Completion queue over backend `B`.
pub struct CompletionQueue<B: AsyncIoBackend> {
    shared: Arc<Shared<B>>,
    poller: Mutex<Option<thread::JoinHandle<()>>>,
}

impl<B: AsyncIoBackend> CompletionQueue<B> {
    /// Create with `QueueConfig::from_env()` and heap buffers.
    pub fn new(backend: Arc<B>) -> Result<Self> {
        Self::with_config(backend, QueueConfig::from_env())
    }

    pub fn with_config(backend: Arc<B>, config: QueueConfig) -> Result<Self> {
        Self::with_buffers(backend, config, Box::new(HeapBuffers::default()))
    }

    /// Create the native queue and start the poll thread.
    ///
    /// Fails with `Allocation` if the backend cannot create a queue, in
    /// which case no thread is started.
    pub fn with_buffers(
        backend: Arc<B>,
        config: QueueConfig,
        buffers: Box<dyn BufferProvider>,
    ) -> Result<Self> {
        config.validate()?;
        let native = backend.create_queue().map_err(|e| match e {
            AsyncIoError::Allocation(msg) => AsyncIoError::Allocation(msg),
            other => AsyncIoError::Allocation(other.to_string()),
        })?;

        let shared = Arc::new(Shared {
            backend: Arc::clone(&backend),
            native: RwLock::new(Some(native)),
            registry: PendingRegistry::new(config.max_pending),
            running: AtomicBool::new(true),
            buffers,
            poll_timeout: config.poll_timeout,
        });

        let poller_shared = Arc::clone(&shared);
        let spawned = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || poll_loop(poller_shared));
        let handle = match spawned {
            Ok(h) => h,
            Err(e) => {
                shared.running.store(false, Ordering::SeqCst);
                let native = shared.native.write().unwrap_or_else(|e| e.into_inner()).take();
                if let Some(q) = native {
                    backend.destroy_queue(q);
                }
                return Err(AsyncIoError::Allocation(format!("poll thread: {}", e)));
            }
        };

        kinfo!(
            "completion queue started: backend={} max_pending={} thread={}",
            backend.name(),
            config.max_pending,
            config.thread_name
        );
        Ok(Self {
            shared,
            poller: Mutex::new(Some(handle)),
        })
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.shared.backend
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Requests registered and not yet resolved.
    pub fn pending(&self) -> usize {
        self.shared.registry.pending()
    }

    /// Provider buffers currently in flight.
    pub fn buffers_in_use(&self) -> usize {
        self.shared.buffers.in_use()
    }

    /// Register a waiter for a request about to start.
    ///
    /// Refusals here (queue shut down, registry full) happen before the
    /// backend sees anything and return `Err(Issuance)`.
    fn register<'a>(
        &self,
        native: &'a Option<B::Queue>,
        kind: TaskKind,
        requested: u64,
        holds_buffer: bool,
    ) -> Result<(&'a B::Queue, RequestToken, oneshot::Receiver<CompletionOutcome>)> {
        let queue = match native.as_ref() {
            Some(q) if self.is_running() => q,
            _ => {
                if holds_buffer {
                    self.shared.buffers.detach();
                }
                return Err(AsyncIoError::Issuance("completion queue is shut down".into()));
            }
        };

        let (sender, rx) = oneshot::channel();
        let waiter = Waiter {
            sender,
            kind,
            requested,
            holds_buffer,
        };
        match self.shared.registry.register(waiter) {
            Ok(token) => Ok((queue, token, rx)),
            Err(e) => {
                if holds_buffer {
                    self.shared.buffers.detach();
                }
                Err(e)
            }
        }
    }

    /// Hand a registered request to the backend. A rejection resolves the
    /// returned `Completion` immediately with a failure.
    fn start<F>(
        &self,
        queue: &B::Queue,
        token: RequestToken,
        rx: oneshot::Receiver<CompletionOutcome>,
        kind: TaskKind,
        requested: u64,
        op: F,
    ) -> Completion
    where
        F: FnOnce(&B, &B::Queue, RequestToken) -> Result<()>,
    {
        ktrace!("issuing {} {} ({} bytes)", kind.as_str(), token, requested);
        if let Err(e) = op(&self.shared.backend, queue, token) {
            kdebug!("{} {} rejected by {}: {}", kind.as_str(), token, self.shared.backend.name(), e);
            if let Some(waiter) = self.shared.registry.take(token) {
                self.shared
                    .resolve_locally(waiter, CompletionOutcome::failed(kind, requested, e.to_string()));
            }
        }
        Completion { rx, kind, requested }
    }

    fn issue<F>(&self, kind: TaskKind, requested: u64, holds_buffer: bool, op: F) -> Result<Completion>
    where
        F: FnOnce(&B, &B::Queue, RequestToken) -> Result<()>,
    {
        let native = self.shared.read_native();
        let (queue, token, rx) = self.register(&native, kind, requested, holds_buffer)?;
        Ok(self.start(queue, token, rx, kind, requested, op))
    }

    /// Issue a read of up to `len` bytes at `offset`.
    pub fn submit_read(&self, file: &B::File, offset: u64, len: usize) -> Result<Completion> {
        let buf = self
            .shared
            .buffers
            .acquire_read(len)
            .ok_or_else(|| AsyncIoError::Allocation(format!("{} byte read buffer", len)))?;
        self.issue(TaskKind::Read, len as u64, true, move |b, q, t| b.read(q, file, offset, buf, t))
    }

    /// Issue a write of `bytes` at `offset`. The bytes are copied.
    pub fn submit_write(&self, file: &B::File, offset: u64, bytes: &[u8]) -> Result<Completion> {
        let buf = self
            .shared
            .buffers
            .acquire_write(bytes)
            .ok_or_else(|| AsyncIoError::Allocation(format!("{} byte write buffer", bytes.len())))?;
        self.issue(TaskKind::Write, bytes.len() as u64, true, move |b, q, t| {
            b.write(q, file, offset, buf, t)
        })
    }

    /// Issue a close, optionally syncing data first.
    ///
    /// The handle is consumed once the close is registered. A refusal
    /// before that hands it back with the error.
    pub fn submit_close(
        &self,
        file: B::File,
        flush: bool,
    ) -> std::result::Result<Completion, (AsyncIoError, B::File)> {
        let native = self.shared.read_native();
        let (queue, token, rx) = match self.register(&native, TaskKind::Close, 0, false) {
            Ok(registered) => registered,
            Err(e) => return Err((e, file)),
        };
        Ok(self.start(queue, token, rx, TaskKind::Close, 0, move |b, q, t| {
            b.close(q, file, flush, t)
        }))
    }

    /// Issue a whole-file read.
    pub fn submit_load(&self, path: &Path) -> Result<Completion> {
        self.issue(TaskKind::Load, 0, false, |b, q, t| b.load(q, path, t))
    }

    pub async fn read(&self, file: &B::File, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.submit_read(file, offset, len)?.await.into_bytes()
    }

    /// Returns bytes written.
    pub async fn write(&self, file: &B::File, offset: u64, bytes: &[u8]) -> Result<u64> {
        self.submit_write(file, offset, bytes)?.await.into_count()
    }

    pub async fn close(&self, file: B::File, flush: bool) -> Result<()> {
        self.submit_close(file, flush)
            .map_err(|(e, _)| e)?
            .await
            .into_result()
    }

    pub async fn load(&self, path: impl AsRef<Path>) -> Result<Vec<u8>> {
        self.submit_load(path.as_ref())?.await.into_bytes()
    }

    /// Stop the poll thread, cancel what is still pending, destroy the
    /// native queue. Idempotent.
    pub fn shutdown(&self) {
        let handle = self.poller.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some(handle) = handle else {
            return;
        };

        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(q) = self.shared.read_native().as_ref() {
            self.shared.backend.signal(q);
        }
        if handle.join().is_err() {
            kwarn!("poll thread panicked");
        }

        // Waits out issuers that passed the running check before the flip.
        let native = self.shared.native.write().unwrap_or_else(|e| e.into_inner()).take();

        let drained = self.shared.registry.drain();
        if !drained.is_empty() {
            kinfo!("shutdown: canceling {} pending requests", drained.len());
        }
        for (token, waiter) in drained {
            ktrace!("canceling {} {}", waiter.kind.as_str(), token);
            let outcome = CompletionOutcome::canceled(waiter.kind, waiter.requested);
            self.shared.resolve_locally(waiter, outcome);
        }

        if let Some(q) = native {
            self.shared.backend.destroy_queue(q);
        }
        kdebug!("completion queue shut down ({})", self.shared.backend.name());
    }
}

impl<B: AsyncIoBackend> Drop for CompletionQueue<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A completion queue started by the first request that needs it.
pub struct LazyQueue<B: AsyncIoBackend> {
    backend: Arc<B>,
    config: QueueConfig,
    cell: OnceLock<CompletionQueue<B>>,
    init: Mutex<()>,
}

impl<B: AsyncIoBackend> LazyQueue<B> {
    pub fn new(backend: Arc<B>, config: QueueConfig) -> Self {
        Self {
            backend,
            config,
            cell: OnceLock::new(),
            init: Mutex::new(()),
        }
    }

    /// The queue, creating it on first use. A failed creation is not
    /// cached; the next call tries again.
    pub fn get(&self) -> Result<&CompletionQueue<B>> {
        if let Some(q) = self.cell.get() {
            return Ok(q);
        }
        let _guard = self.init.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(q) = self.cell.get() {
            return Ok(q);
        }
        let queue = CompletionQueue::with_config(Arc::clone(&self.backend), self.config.clone())?;
        Ok(self.cell.get_or_init(move || queue))
    }

    pub fn is_started(&self) -> bool {
        self.cell.get().is_some()
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }
}

/// The poll loop: runs on the queue's dedicated thread.
fn poll_loop<B: AsyncIoBackend>(shared: Arc<Shared<B>>) {
    kdebug!("poll loop started ({})", shared.backend.name());
    let mut delivered: u64 = 0;
    loop {
        // A wake signal can be consumed together with a completion, so the
        // flag is checked every turn, not only on an empty wait.
        if !shared.running.load(Ordering::Acquire) {
            break;
        }
        let event = {
            let native = shared.read_native();
            match native.as_ref() {
                Some(q) => shared.backend.wait(q, shared.poll_timeout),
                None => break,
            }
        };
        if let Some(completion) = event {
            shared.dispatch(completion);
            delivered += 1;
        }
    }
    kdebug!("poll loop exiting after {} completions", delivered);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_on;
    use asyncio_core::backend::OpenMode;
    use asyncio_module::scripted::ScriptedBackend;
    use asyncio_module::{PoolBackend, PoolConfig};
    use std::path::PathBuf;
    use std::time::Duration;

    const SECOND: Duration = Duration::from_secs(1);

    fn scripted_queue(backend: ScriptedBackend) -> (Arc<ScriptedBackend>, CompletionQueue<ScriptedBackend>) {
        let backend = Arc::new(backend);
        let queue = CompletionQueue::with_config(Arc::clone(&backend), QueueConfig::from_env()).unwrap();
        (backend, queue)
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("asyncio-queue-{}-{}", std::process::id(), name))
    }

    #[test]
    fn test_creation_failure_is_allocation_error() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.fail_queue_creation(true);
        let err = CompletionQueue::new(Arc::clone(&backend)).err().unwrap();
        assert!(matches!(err, AsyncIoError::Allocation(_)));
        assert_eq!(backend.queues_created(), 0);
        assert_eq!(backend.queues_destroyed(), 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let backend = Arc::new(ScriptedBackend::new());
        let err = CompletionQueue::with_config(backend, QueueConfig::from_env().max_pending(0))
            .err()
            .unwrap();
        assert!(matches!(err, AsyncIoError::InvalidArgument(_)));
    }

    #[test]
    fn test_short_read_returns_available_bytes() {
        let (backend, queue) = scripted_queue(ScriptedBackend::new().with_file("/f", &[9u8; 50]));
        let file = backend.open(Path::new("/f"), OpenMode::Read).unwrap();
        let pending = queue.submit_read(&file, 0, 100).unwrap();
        assert!(backend.wait_for_issued(1, SECOND));
        for op in backend.take_issued() {
            backend.complete(op);
        }

        let mut outcome = pending.wait();
        assert!(outcome.is_complete());
        assert_eq!(outcome.bytes_requested, 100);
        assert_eq!(outcome.bytes_transferred, 50);
        assert_eq!(outcome.take_buffer().unwrap(), vec![9u8; 50]);
        assert_eq!(outcome.take_buffer(), None);
        assert_eq!(queue.buffers_in_use(), 0);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn test_completions_in_permuted_order() {
        let data: Vec<u8> = (0..=255u8).collect();
        let (backend, queue) = scripted_queue(ScriptedBackend::new().with_file("/f", &data));
        let file = backend.open(Path::new("/f"), OpenMode::Read).unwrap();

        let pending: Vec<_> = (0..8u64)
            .map(|i| (i, queue.submit_read(&file, i * 32, 32).unwrap()))
            .collect();
        assert!(backend.wait_for_issued(8, SECOND));

        let mut ops = backend.take_issued();
        // 7, 0, 6, 1, 5, 2, 4, 3
        let mut order = Vec::new();
        while !ops.is_empty() {
            order.push(ops.pop().unwrap());
            if !ops.is_empty() {
                order.push(ops.remove(0));
            }
        }
        for op in order {
            backend.complete(op);
        }

        for (i, completion) in pending {
            let bytes = completion.wait().into_bytes().unwrap();
            let start = (i * 32) as u8;
            let expected: Vec<u8> = (start..start + 32).collect();
            assert_eq!(bytes, expected, "read #{}", i);
        }
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn test_issuance_failure_resolves_immediately() {
        let (backend, queue) = scripted_queue(ScriptedBackend::new().with_file("/f", b"abc"));
        let file = backend.open(Path::new("/f"), OpenMode::Read).unwrap();
        backend.reject_issues(true);

        let completion = queue.submit_read(&file, 0, 3).unwrap();
        // Resolved on this thread, before returning.
        assert!(completion.is_resolved());
        match block_on(completion).into_bytes() {
            Err(AsyncIoError::OperationFailed(msg)) => assert!(msg.contains("scripted rejection")),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(queue.pending(), 0);
        assert_eq!(queue.buffers_in_use(), 0);
    }

    #[test]
    fn test_duplicate_delivery_resolves_once() {
        let (backend, queue) = scripted_queue(ScriptedBackend::new().with_file("/f", b"hello"));
        let file = backend.open(Path::new("/f"), OpenMode::Read).unwrap();
        let completion = queue.submit_read(&file, 0, 5).unwrap();
        assert!(backend.wait_for_issued(1, SECOND));
        let op = backend.take_issued().pop().unwrap();

        // A forged success with no buffer arrives first; the real one is stale.
        backend.deliver_raw(&op, NativeCompletion::complete(op.token, TaskKind::Read, None, 0, 5, 0));
        backend.complete(op);

        let outcome = completion.wait();
        assert!(outcome.is_complete());
        assert_eq!(outcome.bytes_transferred, 0);
        // The stale one is dropped by the poll thread without effect.
        thread::sleep(Duration::from_millis(20));
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn test_result_code_classification() {
        let (backend, queue) = scripted_queue(ScriptedBackend::new());
        let a = queue.submit_load(Path::new("/a")).unwrap();
        let b = queue.submit_load(Path::new("/b")).unwrap();
        let c = queue.submit_load(Path::new("/c")).unwrap();
        assert!(backend.wait_for_issued(3, SECOND));
        let mut ops = backend.take_issued().into_iter();
        backend.fail(ops.next().unwrap(), "media error");
        backend.cancel(ops.next().unwrap());
        backend.complete_with_code(ops.next().unwrap(), 42);

        assert_eq!(
            a.wait().into_bytes(),
            Err(AsyncIoError::OperationFailed("media error".into()))
        );
        assert_eq!(b.wait().into_bytes(), Err(AsyncIoError::Canceled));
        match c.wait().into_bytes() {
            Err(AsyncIoError::OperationFailed(msg)) => assert!(msg.contains("42")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_shutdown_cancels_pending_and_refuses_new() {
        let (backend, queue) = scripted_queue(ScriptedBackend::new().with_file("/f", b"abc"));
        let file = backend.open(Path::new("/f"), OpenMode::Read).unwrap();
        let r = queue.submit_read(&file, 0, 3).unwrap();
        let l = queue.submit_load(Path::new("/f")).unwrap();
        assert!(backend.wait_for_issued(2, SECOND));
        assert_eq!(queue.pending(), 2);

        queue.shutdown();
        assert!(!queue.is_running());
        assert_eq!(r.wait().into_bytes(), Err(AsyncIoError::Canceled));
        assert_eq!(l.wait().into_bytes(), Err(AsyncIoError::Canceled));
        assert_eq!(queue.pending(), 0);
        assert_eq!(queue.buffers_in_use(), 0);
        assert_eq!(backend.queues_destroyed(), 1);

        assert!(matches!(queue.submit_load(Path::new("/f")), Err(AsyncIoError::Issuance(_))));
        assert!(matches!(queue.submit_read(&file, 0, 1), Err(AsyncIoError::Issuance(_))));
        assert_eq!(queue.buffers_in_use(), 0);

        // Idempotent, including the implicit one from Drop.
        queue.shutdown();
        drop(queue);
        assert_eq!(backend.queues_destroyed(), 1);
    }

    #[test]
    fn test_refused_close_returns_handle() {
        let (backend, queue) = scripted_queue(ScriptedBackend::new().with_file("/f", b"abc"));
        let file = backend.open(Path::new("/f"), OpenMode::Read).unwrap();
        queue.shutdown();
        let touched = backend.touches();

        let (err, file) = queue.submit_close(file, true).err().unwrap();
        assert!(matches!(err, AsyncIoError::Issuance(_)));
        assert_eq!(backend.size(&file).unwrap(), 3);
        assert_eq!(backend.touches(), touched + 1);
    }

    #[test]
    fn test_lazy_queue_starts_on_first_use() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.fail_queue_creation(true);
        let lazy = LazyQueue::new(Arc::clone(&backend), QueueConfig::from_env());
        assert!(!lazy.is_started());
        assert!(matches!(lazy.get(), Err(AsyncIoError::Allocation(_))));

        backend.fail_queue_creation(false);
        let first = lazy.get().unwrap() as *const _;
        let second = lazy.get().unwrap() as *const _;
        assert!(lazy.is_started());
        assert_eq!(first, second);
        assert_eq!(backend.queues_created(), 1);
    }

    #[test]
    fn test_max_pending_refuses_issuance() {
        let backend = Arc::new(ScriptedBackend::new());
        let queue =
            CompletionQueue::with_config(Arc::clone(&backend), QueueConfig::from_env().max_pending(1)).unwrap();
        let _first = queue.submit_load(Path::new("/x")).unwrap();
        assert!(matches!(queue.submit_load(Path::new("/y")), Err(AsyncIoError::Issuance(_))));
    }

    #[test]
    fn test_concurrent_issue_and_complete() {
        const THREADS: usize = 4;
        const PER_THREAD: usize = 50;
        let (backend, queue) = scripted_queue(ScriptedBackend::new().with_file("/f", b"0123456789"));
        let queue = Arc::new(queue);

        let completer = {
            let backend = Arc::clone(&backend);
            thread::spawn(move || {
                let mut done = 0;
                while done < THREADS * PER_THREAD {
                    backend.wait_for_issued(1, Duration::from_millis(50));
                    for op in backend.take_issued() {
                        backend.complete(op);
                        done += 1;
                    }
                }
            })
        };

        let issuers: Vec<_> = (0..THREADS)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let backend = Arc::clone(&backend);
                thread::spawn(move || {
                    let file = backend.open(Path::new("/f"), OpenMode::Read).unwrap();
                    let pending: Vec<_> = (0..PER_THREAD)
                        .map(|i| queue.submit_read(&file, (i % 10) as u64, 1).unwrap())
                        .collect();
                    pending
                        .into_iter()
                        .enumerate()
                        .map(|(i, c)| {
                            let bytes = c.wait().into_bytes().unwrap();
                            assert_eq!(bytes, vec![b'0' + (i % 10) as u8]);
                        })
                        .count()
                })
            })
            .collect();

        let resolved: usize = issuers.into_iter().map(|h| h.join().unwrap()).sum();
        completer.join().unwrap();
        assert_eq!(resolved, THREADS * PER_THREAD);
        assert_eq!(queue.pending(), 0);
        assert_eq!(queue.buffers_in_use(), 0);
    }

    #[test]
    fn test_pool_backend_round_trip() {
        let path = temp_path("pool");
        let backend = Arc::new(PoolBackend::new(PoolConfig::from_env().workers(2)).unwrap());
        let queue = CompletionQueue::new(Arc::clone(&backend)).unwrap();

        let file = backend.open(&path, OpenMode::ReadWriteTruncate).unwrap();
        assert_eq!(block_on(queue.write(&file, 0, b"completion queue")).unwrap(), 16);
        assert_eq!(block_on(queue.read(&file, 11, 100)).unwrap(), b"queue");
        block_on(queue.close(file, true)).unwrap();
        assert_eq!(block_on(queue.load(&path)).unwrap(), b"completion queue");

        let err = block_on(queue.load("/nonexistent/asyncio/queue")).unwrap_err();
        assert!(matches!(err, AsyncIoError::OperationFailed(_)));
        assert_eq!(queue.buffers_in_use(), 0);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_tokio_concurrent_reads() {
        let path = temp_path("tokio");
        let data: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        let backend = Arc::new(PoolBackend::new(PoolConfig::from_env().workers(4)).unwrap());
        let queue = Arc::new(CompletionQueue::new(Arc::clone(&backend)).unwrap());
        let file = Arc::new(backend.open(&path, OpenMode::Read).unwrap());

        let mut tasks = Vec::new();
        for i in 0..32u64 {
            let queue = Arc::clone(&queue);
            let file = Arc::clone(&file);
            tasks.push(tokio::spawn(async move { (i, queue.read(&file, i * 128, 128).await) }));
        }
        for task in tasks {
            let (i, bytes) = task.await.unwrap();
            let start = (i * 128) as usize;
            assert_eq!(bytes.unwrap(), &data[start..start + 128]);
        }
        let _ = std::fs::remove_file(&path);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_uring_backend_round_trip() {
        use asyncio_module::{UringBackend, UringConfig};
        if !UringBackend::is_supported() {
            eprintln!("io_uring unavailable, skipping");
            return;
        }
        let path = temp_path("uring");
        let backend = Arc::new(UringBackend::new(UringConfig::default()).unwrap());
        let queue = CompletionQueue::new(Arc::clone(&backend)).unwrap();

        let file = backend.open(&path, OpenMode::ReadWriteTruncate).unwrap();
        assert_eq!(block_on(queue.write(&file, 0, &[1u8; 50])).unwrap(), 50);
        let bytes = block_on(queue.read(&file, 0, 100)).unwrap();
        assert_eq!(bytes.len(), 50);
        block_on(queue.close(file, false)).unwrap();
        assert_eq!(block_on(queue.load(&path)).unwrap().len(), 50);
        let _ = std::fs::remove_file(&path);
    }

    /// Issue a burst of loads and shut down while they are completing.
    /// Each round runs under a watchdog so a lost wake signal fails fast.
    fn shutdown_while_completing<B: AsyncIoBackend>(backend: Arc<B>, path: &Path, rounds: usize) {
        for round in 0..rounds {
            let backend = Arc::clone(&backend);
            let path = path.to_path_buf();
            let (done_tx, done_rx) = std::sync::mpsc::channel();
            thread::spawn(move || {
                let queue = CompletionQueue::new(backend).unwrap();
                let inflight: Vec<_> = (0..64).map(|_| queue.submit_load(&path).unwrap()).collect();
                queue.shutdown();
                let settled = inflight
                    .into_iter()
                    .map(Completion::wait)
                    .filter(|o| o.is_complete() || o.result == OutcomeResult::Canceled)
                    .count();
                let _ = done_tx.send((settled, queue.pending(), queue.buffers_in_use()));
            });
            let (settled, pending, buffers) = done_rx
                .recv_timeout(Duration::from_secs(3))
                .unwrap_or_else(|_| panic!("shutdown did not return in round {}", round));
            assert_eq!(settled, 64);
            assert_eq!(pending, 0);
            assert_eq!(buffers, 0);
        }
    }

    #[test]
    fn test_pool_shutdown_while_completing() {
        let path = temp_path("pool-shutdown");
        std::fs::write(&path, [7u8; 64]).unwrap();
        let backend = Arc::new(PoolBackend::new(PoolConfig::from_env().workers(4)).unwrap());
        shutdown_while_completing(backend, &path, 200);
        let _ = std::fs::remove_file(&path);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_uring_shutdown_while_completing() {
        use asyncio_module::{UringBackend, UringConfig};
        if !UringBackend::is_supported() {
            eprintln!("io_uring unavailable, skipping");
            return;
        }
        let path = temp_path("uring-shutdown");
        std::fs::write(&path, [7u8; 64]).unwrap();
        let backend = Arc::new(UringBackend::new(UringConfig::default()).unwrap());
        shutdown_while_completing(backend, &path, 50);
        let _ = std::fs::remove_file(&path);
    }
}
