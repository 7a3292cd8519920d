//! `ScriptedBackend`: in-memory `AsyncIoBackend` for deterministic tests.
//!
//! Performs no I/O. Files are byte vectors registered up front; every
//! issued op is recorded and stays pending until the test resolves it
//! with `complete`, `fail`, `cancel` or `complete_with_code`, in whatever
//! order the test wants. With `auto_complete` set, ops resolve as soon
//! as they are issued.

use asyncio_core::backend::{AsyncIoBackend, OpenMode};
use asyncio_core::buffer::TransferBuffer;
use asyncio_core::entry::{result_code, NativeCompletion, RequestToken, TaskKind};
use asyncio_core::error::{AsyncIoError, Result};

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<NativeCompletion>,
    signaled: bool,
}

#[derive(Default)]
struct QueueInner {
    state: Mutex<QueueState>,
    cond: Condvar,
}

impl QueueInner {
    fn deliver(&self, c: NativeCompletion) {
        lock(&self.state).ready.push_back(c);
        self.cond.notify_all();
    }
}

pub struct ScriptedQueue {
    inner: Arc<QueueInner>,
}

/// Handle to a virtual file.
#[derive(Debug, Clone)]
pub struct ScriptedFile {
    path: PathBuf,
}

impl ScriptedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// One op the backend accepted and has not resolved yet.
pub struct IssuedOp {
    pub token: RequestToken,
    pub kind: TaskKind,
    pub path: PathBuf,
    pub offset: u64,
    pub flush: bool,
    buffer: Option<TransferBuffer>,
    queue: Arc<QueueInner>,
}

impl IssuedOp {
    /// Bytes requested: buffer capacity for reads, payload for writes.
    pub fn requested(&self) -> u64 {
        match (&self.kind, &self.buffer) {
            (TaskKind::Read, Some(b)) => b.capacity() as u64,
            (TaskKind::Write, Some(b)) => b.len() as u64,
            _ => 0,
        }
    }
}

impl std::fmt::Debug for IssuedOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedOp")
            .field("token", &self.token)
            .field("kind", &self.kind)
            .field("path", &self.path)
            .field("offset", &self.offset)
            .finish()
    }
}

#[derive(Default)]
pub struct ScriptedBackend {
    files: Mutex<HashMap<PathBuf, Vec<u8>>>,
    issued: Mutex<Vec<IssuedOp>>,
    issued_cond: Condvar,
    fail_queue_creation: AtomicBool,
    reject_issues: AtomicBool,
    auto_complete: AtomicBool,
    touches: AtomicUsize,
    queues_created: AtomicUsize,
    queues_destroyed: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a virtual file.
    pub fn with_file(self, path: impl Into<PathBuf>, bytes: &[u8]) -> Self {
        lock(&self.files).insert(path.into(), bytes.to_vec());
        self
    }

    pub fn fail_queue_creation(&self, on: bool) {
        self.fail_queue_creation.store(on, Ordering::SeqCst);
    }

    /// Make every issue call return an error.
    pub fn reject_issues(&self, on: bool) {
        self.reject_issues.store(on, Ordering::SeqCst);
    }

    pub fn auto_complete(&self, on: bool) {
        self.auto_complete.store(on, Ordering::SeqCst);
    }

    /// Contents of a virtual file.
    pub fn file_contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        lock(&self.files).get(path.as_ref()).cloned()
    }

    /// Number of backend calls of any kind, except queue management.
    pub fn touches(&self) -> usize {
        self.touches.load(Ordering::SeqCst)
    }

    pub fn queues_created(&self) -> usize {
        self.queues_created.load(Ordering::SeqCst)
    }

    pub fn queues_destroyed(&self) -> usize {
        self.queues_destroyed.load(Ordering::SeqCst)
    }

    /// Ops issued and not yet taken.
    pub fn issued_count(&self) -> usize {
        lock(&self.issued).len()
    }

    /// Block until at least `n` ops are outstanding. False on timeout.
    pub fn wait_for_issued(&self, n: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut issued = lock(&self.issued);
        while issued.len() < n {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .issued_cond
                .wait_timeout(issued, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            issued = guard;
        }
        true
    }

    /// Take every outstanding op, in issue order.
    pub fn take_issued(&self) -> Vec<IssuedOp> {
        std::mem::take(&mut *lock(&self.issued))
    }

    /// Resolve with the result the op would have against the virtual files.
    pub fn complete(&self, op: IssuedOp) {
        let c = self.perform(&op.path, op.kind, op.token, op.offset, op.buffer);
        op.queue.deliver(c);
    }

    pub fn fail(&self, op: IssuedOp, message: &str) {
        let requested = op.requested();
        op.queue
            .deliver(NativeCompletion::failure(op.token, op.kind, requested, message.to_string()));
    }

    pub fn cancel(&self, op: IssuedOp) {
        let requested = op.requested();
        op.queue.deliver(NativeCompletion::canceled(op.token, op.kind, requested));
    }

    /// Resolve with an arbitrary result code and no buffer.
    pub fn complete_with_code(&self, op: IssuedOp, code: i32) {
        let requested = op.requested();
        let mut c = NativeCompletion::canceled(op.token, op.kind, requested);
        c.code = code;
        op.queue.deliver(c);
    }

    /// Push an arbitrary record onto the queue `op` was issued on, leaving
    /// `op` outstanding. Used to simulate duplicate or forged deliveries.
    pub fn deliver_raw(&self, op: &IssuedOp, completion: NativeCompletion) {
        op.queue.deliver(completion);
    }

    fn touch(&self) {
        self.touches.fetch_add(1, Ordering::SeqCst);
    }

    fn perform(
        &self,
        path: &Path,
        kind: TaskKind,
        token: RequestToken,
        offset: u64,
        buffer: Option<TransferBuffer>,
    ) -> NativeCompletion {
        let mut files = lock(&self.files);
        match (kind, buffer) {
            (TaskKind::Read, Some(mut buf)) => {
                let requested = buf.capacity() as u64;
                let Some(data) = files.get(path) else {
                    return NativeCompletion::failure(token, kind, requested, "no such file");
                };
                let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
                let n = (data.len() - start).min(buf.capacity());
                buf.spare_mut()[..n].copy_from_slice(&data[start..start + n]);
                buf.set_len(n);
                NativeCompletion::complete(token, kind, Some(buf), offset, requested, n as u64)
            }
            (TaskKind::Write, Some(buf)) => {
                let requested = buf.len() as u64;
                let Some((start, end)) = usize::try_from(offset)
                    .ok()
                    .and_then(|start| Some((start, start.checked_add(buf.len())?)))
                else {
                    return NativeCompletion::failure(token, kind, requested, "offset out of range");
                };
                let data = files.entry(path.to_path_buf()).or_default();
                if data.len() < end {
                    data.resize(end, 0);
                }
                data[start..end].copy_from_slice(buf.as_slice());
                NativeCompletion::complete(token, kind, Some(buf), offset, requested, requested)
            }
            (TaskKind::Load, _) => match files.get(path) {
                Some(data) => {
                    let n = data.len() as u64;
                    let buf = TransferBuffer::from_vec(data.clone());
                    NativeCompletion::complete(token, kind, Some(buf), 0, n, n)
                }
                None => NativeCompletion::failure(token, kind, 0, "no such file"),
            },
            (kind, _) => NativeCompletion::complete(token, kind, None, 0, 0, 0),
        }
    }

    fn issue(
        &self,
        queue: &ScriptedQueue,
        kind: TaskKind,
        path: &Path,
        offset: u64,
        flush: bool,
        buffer: Option<TransferBuffer>,
        token: RequestToken,
    ) -> Result<()> {
        self.touch();
        if self.reject_issues.load(Ordering::SeqCst) {
            return Err(AsyncIoError::Issuance("scripted rejection".into()));
        }
        let op = IssuedOp {
            token,
            kind,
            path: path.to_path_buf(),
            offset,
            flush,
            buffer,
            queue: Arc::clone(&queue.inner),
        };
        if self.auto_complete.load(Ordering::SeqCst) {
            self.complete(op);
            return Ok(());
        }
        lock(&self.issued).push(op);
        self.issued_cond.notify_all();
        Ok(())
    }
}

impl AsyncIoBackend for ScriptedBackend {
    type Queue = ScriptedQueue;
    type File = ScriptedFile;

    fn name(&self) -> &'static str {
        "scripted"
    }

    fn create_queue(&self) -> Result<ScriptedQueue> {
        if self.fail_queue_creation.load(Ordering::SeqCst) {
            return Err(AsyncIoError::Allocation("scripted queue creation failure".into()));
        }
        self.queues_created.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptedQueue {
            inner: Arc::new(QueueInner::default()),
        })
    }

    fn wait(&self, queue: &ScriptedQueue, timeout: Option<Duration>) -> Option<NativeCompletion> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = lock(&queue.inner.state);
        loop {
            if let Some(c) = state.ready.pop_front() {
                return Some(c);
            }
            if state.signaled {
                state.signaled = false;
                return None;
            }
            match deadline {
                None => {
                    state = queue.inner.cond.wait(state).unwrap_or_else(|e| e.into_inner());
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    let (guard, _) = queue
                        .inner
                        .cond
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(|e| e.into_inner());
                    state = guard;
                }
            }
        }
    }

    fn signal(&self, queue: &ScriptedQueue) {
        lock(&queue.inner.state).signaled = true;
        queue.inner.cond.notify_all();
    }

    fn destroy_queue(&self, _queue: ScriptedQueue) {
        self.queues_destroyed.fetch_add(1, Ordering::SeqCst);
    }

    fn open(&self, path: &Path, mode: OpenMode) -> Result<ScriptedFile> {
        self.touch();
        let mut files = lock(&self.files);
        if mode.truncates() {
            files.insert(path.to_path_buf(), Vec::new());
        } else if !files.contains_key(path) {
            return Err(AsyncIoError::Os(nix::errno::Errno::ENOENT as i32));
        }
        Ok(ScriptedFile { path: path.to_path_buf() })
    }

    fn size(&self, file: &ScriptedFile) -> Result<u64> {
        self.touch();
        lock(&self.files)
            .get(&file.path)
            .map(|d| d.len() as u64)
            .ok_or(AsyncIoError::Os(nix::errno::Errno::ENOENT as i32))
    }

    fn read(
        &self,
        queue: &ScriptedQueue,
        file: &ScriptedFile,
        offset: u64,
        buf: TransferBuffer,
        token: RequestToken,
    ) -> Result<()> {
        self.issue(queue, TaskKind::Read, &file.path, offset, false, Some(buf), token)
    }

    fn write(
        &self,
        queue: &ScriptedQueue,
        file: &ScriptedFile,
        offset: u64,
        buf: TransferBuffer,
        token: RequestToken,
    ) -> Result<()> {
        self.issue(queue, TaskKind::Write, &file.path, offset, false, Some(buf), token)
    }

    fn close(&self, queue: &ScriptedQueue, file: ScriptedFile, flush: bool, token: RequestToken) -> Result<()> {
        self.issue(queue, TaskKind::Close, &file.path, 0, flush, None, token)
    }

    fn load(&self, queue: &ScriptedQueue, path: &Path, token: RequestToken) -> Result<()> {
        self.issue(queue, TaskKind::Load, path, 0, false, None, token)
    }
}
