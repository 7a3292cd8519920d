//! asyncio error types.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsyncIoError {
    /// A queue or a transfer buffer could not be allocated.
    Allocation(String),
    /// The request was refused before it was registered
    /// (queue shut down, registry full).
    Issuance(String),
    /// The backend reported the operation as failed, or it could not start.
    OperationFailed(String),
    /// The operation was canceled before completion.
    Canceled,
    /// The file handle's close has already been issued.
    AlreadyClosed,
    /// Bad open mode, bad configuration value.
    InvalidArgument(&'static str),
    /// OS error with errno.
    Os(i32),
}

impl AsyncIoError {
    /// Errno of the calling thread, as an `Os` error.
    pub fn last_os_error() -> Self {
        Self::Os(nix::errno::Errno::last() as i32)
    }
}

impl fmt::Display for AsyncIoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allocation(what) => write!(f, "allocation failed: {}", what),
            Self::Issuance(why) => write!(f, "could not issue request: {}", why),
            Self::OperationFailed(msg) => write!(f, "operation failed: {}", msg),
            Self::Canceled => write!(f, "operation canceled"),
            Self::AlreadyClosed => write!(f, "resource already closed"),
            Self::InvalidArgument(what) => write!(f, "invalid argument: {}", what),
            Self::Os(e) => write!(f, "OS error: {}", nix::errno::Errno::from_raw(*e).desc()),
        }
    }
}

impl std::error::Error for AsyncIoError {}

impl From<nix::errno::Errno> for AsyncIoError {
    fn from(e: nix::errno::Errno) -> Self {
        Self::Os(e as i32)
    }
}

impl From<std::io::Error> for AsyncIoError {
    fn from(e: std::io::Error) -> Self {
        match e.raw_os_error() {
            Some(errno) => Self::Os(errno),
            None => Self::OperationFailed(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, AsyncIoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(AsyncIoError::Canceled.to_string(), "operation canceled");
        assert_eq!(AsyncIoError::AlreadyClosed.to_string(), "resource already closed");
        assert!(AsyncIoError::OperationFailed("short read".into())
            .to_string()
            .contains("short read"));
    }

    #[test]
    fn io_error_keeps_errno() {
        let e = std::io::Error::from_raw_os_error(libc_enoent());
        assert_eq!(AsyncIoError::from(e), AsyncIoError::Os(libc_enoent()));
    }

    #[test]
    fn io_error_without_errno() {
        let e = std::io::Error::new(std::io::ErrorKind::Other, "custom");
        assert!(matches!(AsyncIoError::from(e), AsyncIoError::OperationFailed(_)));
    }

    #[test]
    fn errno_conversion() {
        let e: AsyncIoError = nix::errno::Errno::EAGAIN.into();
        assert_eq!(e, AsyncIoError::Os(nix::errno::Errno::EAGAIN as i32));
    }

    fn libc_enoent() -> i32 {
        nix::errno::Errno::ENOENT as i32
    }
}
