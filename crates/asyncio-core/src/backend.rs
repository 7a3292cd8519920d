//! Native asynchronous I/O facility abstraction.
//!
//! An `AsyncIoBackend` is the only thing the completion-queue bridge talks
//! to. It owns the native queue objects and the open files, accepts
//! requests tagged with a [`RequestToken`], and later reports each one as a
//! [`NativeCompletion`] through `wait()`.
//!
//! # Implementors
//!
//! - `PoolBackend` (default): a fixed pool of worker threads performing
//!   positional I/O; completions are pushed onto a per-queue lock-free
//!   queue and the waiter is woken through a `Notifier`.
//!
//! - `UringBackend` (Linux): one io_uring per queue. Tokens travel in
//!   `user_data`; `signal()` submits a NOP with a sentinel token.
//!
//! - `ScriptedBackend` (testing): performs no I/O. Tests decide when and
//!   in which order requests complete.

use crate::buffer::TransferBuffer;
use crate::entry::{NativeCompletion, RequestToken};
use crate::error::{AsyncIoError, Result};

use std::path::Path;
use std::time::Duration;

/// How a file is opened.
///
/// | mode | meaning                                  |
/// |------|------------------------------------------|
/// | `r`  | read only; file must exist               |
/// | `w`  | write only; create or truncate           |
/// | `r+` | read and write; file must exist          |
/// | `w+` | read and write; create or truncate       |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
    ReadWrite,
    ReadWriteTruncate,
}

impl OpenMode {
    pub fn parse(mode: &str) -> Result<Self> {
        match mode {
            "r" | "rb" => Ok(Self::Read),
            "w" | "wb" => Ok(Self::Write),
            "r+" | "rb+" | "r+b" => Ok(Self::ReadWrite),
            "w+" | "wb+" | "w+b" => Ok(Self::ReadWriteTruncate),
            _ => Err(AsyncIoError::InvalidArgument("open mode must be one of r, w, r+, w+")),
        }
    }

    #[inline]
    pub fn readable(self) -> bool {
        !matches!(self, Self::Write)
    }

    #[inline]
    pub fn writable(self) -> bool {
        !matches!(self, Self::Read)
    }

    /// Create the file if missing and truncate it.
    #[inline]
    pub fn truncates(self) -> bool {
        matches!(self, Self::Write | Self::ReadWriteTruncate)
    }

    /// Equivalent `std::fs::OpenOptions`.
    pub fn options(self) -> std::fs::OpenOptions {
        let mut opts = std::fs::OpenOptions::new();
        opts.read(self.readable())
            .write(self.writable())
            .create(self.truncates())
            .truncate(self.truncates());
        opts
    }
}

/// Asynchronous I/O submission and completion.
///
/// **Contract:**
/// - Issue calls (`read`, `write`, `close`, `load`) must NEVER block on the
///   I/O itself. `Ok(())` means "queued", not "done". An `Err` means the
///   operation never started and no completion will ever be reported for
///   its token.
/// - Every queued operation produces exactly one `NativeCompletion` with the
///   token it was issued under, unless the queue is destroyed first.
/// - `wait()` is called by exactly one thread per queue.
/// - `signal()` must be callable from any thread and must wake a thread
///   blocked in `wait()` on the same queue; that `wait()` may return `None`.
/// - `destroy_queue()` is only called after the last `wait()` returned.
pub trait AsyncIoBackend: Send + Sync + 'static {
    /// Native queue handle.
    type Queue: Send + Sync + 'static;
    /// Native open-file handle.
    type File: Send + Sync + 'static;

    /// Short backend name for diagnostics.
    fn name(&self) -> &'static str;

    /// Allocate a completion queue.
    fn create_queue(&self) -> Result<Self::Queue>;

    /// Block until one completion is available, the timeout elapses, or the
    /// queue is signaled. `None` timeout waits indefinitely.
    fn wait(&self, queue: &Self::Queue, timeout: Option<Duration>) -> Option<NativeCompletion>;

    /// Wake a waiter early. Never blocks.
    fn signal(&self, queue: &Self::Queue);

    /// Release the queue. Completions still inside it are dropped.
    fn destroy_queue(&self, queue: Self::Queue);

    /// Open a file. Synchronous.
    fn open(&self, path: &Path, mode: OpenMode) -> Result<Self::File>;

    /// Current size of an open file in bytes. Synchronous and fast.
    fn size(&self, file: &Self::File) -> Result<u64>;

    /// Read up to `buf.capacity()` bytes at `offset` into `buf`.
    fn read(
        &self,
        queue: &Self::Queue,
        file: &Self::File,
        offset: u64,
        buf: TransferBuffer,
        token: RequestToken,
    ) -> Result<()>;

    /// Write `buf` at `offset`.
    fn write(
        &self,
        queue: &Self::Queue,
        file: &Self::File,
        offset: u64,
        buf: TransferBuffer,
        token: RequestToken,
    ) -> Result<()>;

    /// Close `file`, syncing its data first when `flush` is set.
    /// The handle is consumed even if issuance fails.
    fn close(
        &self,
        queue: &Self::Queue,
        file: Self::File,
        flush: bool,
        token: RequestToken,
    ) -> Result<()>;

    /// Read the whole file at `path` into a buffer the backend allocates.
    fn load(&self, queue: &Self::Queue, path: &Path, token: RequestToken) -> Result<()>;
}
