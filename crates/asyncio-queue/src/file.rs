//! Async file handle over a completion queue.
//!
//! `AsyncFile` owns the backend's native handle until `close` is issued,
//! which clears it synchronously. From then on every operation fails with
//! `AlreadyClosed` on the calling thread without reaching the backend,
//! even while the close itself is still in flight.

use crate::queue::{Completion, CompletionQueue};

use asyncio_core::backend::{AsyncIoBackend, OpenMode};
use asyncio_core::error::{AsyncIoError, Result};
use asyncio_core::kdebug;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

pub struct AsyncFile<B: AsyncIoBackend> {
    handle: Mutex<Option<B::File>>,
    backend: Arc<B>,
    path: PathBuf,
}

impl<B: AsyncIoBackend> AsyncFile<B> {
    /// Open `path` with an fopen-style mode: `r`, `w`, `r+`, `w+`
    /// (optionally with `b`).
    pub fn open(path: impl AsRef<Path>, mode: &str, queue: &CompletionQueue<B>) -> Result<Self> {
        let path = path.as_ref();
        let mode = OpenMode::parse(mode)?;
        let backend = Arc::clone(queue.backend());
        let handle = backend.open(path, mode)?;
        kdebug!("opened {} ({:?}) on {}", path.display(), mode, backend.name());
        Ok(Self::from_handle(backend, handle, path))
    }

    /// Wrap a handle already opened on `backend`.
    pub fn from_handle(backend: Arc<B>, handle: B::File, path: impl Into<PathBuf>) -> Self {
        Self {
            handle: Mutex::new(Some(handle)),
            backend,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True once close has been issued.
    pub fn is_closed(&self) -> bool {
        self.lock().is_none()
    }

    fn lock(&self) -> MutexGuard<'_, Option<B::File>> {
        self.handle.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn same_backend(&self, queue: &CompletionQueue<B>) -> Result<()> {
        if Arc::ptr_eq(&self.backend, queue.backend()) {
            Ok(())
        } else {
            Err(AsyncIoError::InvalidArgument("queue and file use different backends"))
        }
    }

    /// Current size in bytes. Synchronous.
    pub fn size(&self) -> Result<u64> {
        let handle = self.lock();
        let file = handle.as_ref().ok_or(AsyncIoError::AlreadyClosed)?;
        self.backend.size(file)
    }

    pub fn submit_read(&self, queue: &CompletionQueue<B>, offset: u64, len: usize) -> Result<Completion> {
        let handle = self.lock();
        let file = handle.as_ref().ok_or(AsyncIoError::AlreadyClosed)?;
        self.same_backend(queue)?;
        queue.submit_read(file, offset, len)
    }

    pub fn submit_write(&self, queue: &CompletionQueue<B>, offset: u64, bytes: &[u8]) -> Result<Completion> {
        let handle = self.lock();
        let file = handle.as_ref().ok_or(AsyncIoError::AlreadyClosed)?;
        self.same_backend(queue)?;
        queue.submit_write(file, offset, bytes)
    }

    /// Clear the handle and issue the close. A second close, or any other
    /// operation afterwards, fails with `AlreadyClosed`.
    ///
    /// If the queue refuses the close the handle stays open.
    pub fn submit_close(&self, queue: &CompletionQueue<B>, flush: bool) -> Result<Completion> {
        let mut handle = self.lock();
        if handle.is_none() {
            return Err(AsyncIoError::AlreadyClosed);
        }
        self.same_backend(queue)?;
        let file = handle.take().ok_or(AsyncIoError::AlreadyClosed)?;
        match queue.submit_close(file, flush) {
            Ok(completion) => Ok(completion),
            Err((e, file)) => {
                kdebug!("close of {} refused, handle kept: {}", self.path.display(), e);
                *handle = Some(file);
                Err(e)
            }
        }
    }

    /// Read up to `len` bytes at `offset`. Fewer bytes come back at EOF.
    pub async fn read(&self, queue: &CompletionQueue<B>, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.submit_read(queue, offset, len)?.await.into_bytes()
    }

    /// Write `bytes` at `offset`; returns the count written.
    pub async fn write(&self, queue: &CompletionQueue<B>, offset: u64, bytes: &[u8]) -> Result<u64> {
        self.submit_write(queue, offset, bytes)?.await.into_count()
    }

    pub async fn close(&self, queue: &CompletionQueue<B>, flush: bool) -> Result<()> {
        self.submit_close(queue, flush)?.await.into_result()
    }
}

/// Read a whole file through `queue`.
pub async fn load_file<B: AsyncIoBackend>(path: impl AsRef<Path>, queue: &CompletionQueue<B>) -> Result<Vec<u8>> {
    queue.load(path).await
}
