//! Correlation and completion record types.
//!
//! These are the *lingua franca* between the bridge and every backend:
//! a request is issued with a [`RequestToken`], and the backend later hands
//! back a [`NativeCompletion`] carrying the same token.

use crate::buffer::TransferBuffer;

/// Correlation token, packed as:
///
/// ```text
/// ┌────────────────────────┬────────────────────────┐
/// │  generation (u32)      │   slot (u32)           │
/// │  MSB: reuse counter   │   LSB: arena index    │
/// └────────────────────────┴────────────────────────┘
/// ```
///
/// Backends treat the value as opaque (it travels in io_uring's
/// `user_data`, or alongside a work item). Only the registry that minted
/// it interprets the halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct RequestToken(pub u64);

impl RequestToken {
    /// Never minted by a registry. Backends use it for internal wakeups.
    pub const NONE: Self = Self(u64::MAX);

    #[inline]
    pub const fn new(slot: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | (slot as u64))
    }

    #[inline]
    pub const fn slot(self) -> u32 {
        self.0 as u32
    }

    #[inline]
    pub const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == u64::MAX
    }
}

impl std::fmt::Display for RequestToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_none() {
            write!(f, "token:none")
        } else {
            write!(f, "token:{}@{}", self.slot(), self.generation())
        }
    }
}

/// What kind of task a completion belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskKind {
    Read = 0,
    Write = 1,
    Close = 2,
    /// Whole-file read; the backend sizes and allocates the buffer.
    Load = 3,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Read => "read",
            TaskKind::Write => "write",
            TaskKind::Close => "close",
            TaskKind::Load => "load",
        }
    }

    /// Only reads hand a buffer back to the caller.
    #[inline]
    pub fn returns_buffer(self) -> bool {
        matches!(self, TaskKind::Read | TaskKind::Load)
    }
}

/// Native result codes reported in [`NativeCompletion::code`].
pub mod result_code {
    pub const COMPLETE: i32 = 0;
    pub const FAILURE: i32 = 1;
    pub const CANCELED: i32 = 2;
}

/// One finished asynchronous operation, as reported by a backend's
/// `wait()` call. The bridge classifies `code` and routes the record to
/// the waiter registered under `token`.
#[derive(Debug)]
pub struct NativeCompletion {
    pub token: RequestToken,
    pub kind: TaskKind,
    /// One of [`result_code`]; anything else is treated as a failure.
    pub code: i32,
    /// Read/load destination, handed back so ownership returns to Rust.
    /// Write buffers may be returned too; the bridge drops them.
    pub buffer: Option<TransferBuffer>,
    pub offset: u64,
    pub bytes_requested: u64,
    pub bytes_transferred: u64,
    /// Native diagnostic for failures. Empty otherwise.
    pub message: String,
}

impl NativeCompletion {
    /// A successful completion.
    pub fn complete(
        token: RequestToken,
        kind: TaskKind,
        buffer: Option<TransferBuffer>,
        offset: u64,
        bytes_requested: u64,
        bytes_transferred: u64,
    ) -> Self {
        Self {
            token,
            kind,
            code: result_code::COMPLETE,
            buffer,
            offset,
            bytes_requested,
            bytes_transferred,
            message: String::new(),
        }
    }

    /// A failed completion with a diagnostic message.
    pub fn failure(token: RequestToken, kind: TaskKind, bytes_requested: u64, message: impl Into<String>) -> Self {
        Self {
            token,
            kind,
            code: result_code::FAILURE,
            buffer: None,
            offset: 0,
            bytes_requested,
            bytes_transferred: 0,
            message: message.into(),
        }
    }

    /// A completion for an operation torn down before it ran.
    pub fn canceled(token: RequestToken, kind: TaskKind, bytes_requested: u64) -> Self {
        Self {
            token,
            kind,
            code: result_code::CANCELED,
            buffer: None,
            offset: 0,
            bytes_requested,
            bytes_transferred: 0,
            message: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_pack_unpack() {
        let t = RequestToken::new(42, 7);
        assert_eq!(t.slot(), 42);
        assert_eq!(t.generation(), 7);
        assert!(!t.is_none());
    }

    #[test]
    fn token_none_is_distinct() {
        assert!(RequestToken::NONE.is_none());
        assert_ne!(RequestToken::new(0, 0), RequestToken::NONE);
        assert_eq!(format!("{}", RequestToken::NONE), "token:none");
        assert_eq!(format!("{}", RequestToken::new(3, 1)), "token:3@1");
    }

    #[test]
    fn only_reads_return_buffers() {
        assert!(TaskKind::Read.returns_buffer());
        assert!(TaskKind::Load.returns_buffer());
        assert!(!TaskKind::Write.returns_buffer());
        assert!(!TaskKind::Close.returns_buffer());
    }

    #[test]
    fn failure_constructor() {
        let c = NativeCompletion::failure(RequestToken::new(1, 0), TaskKind::Write, 16, "disk full");
        assert_eq!(c.code, result_code::FAILURE);
        assert!(c.buffer.is_none());
        assert_eq!(c.bytes_requested, 16);
        assert_eq!(c.message, "disk full");
    }
}
