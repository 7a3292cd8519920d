//! Completion outcome: the settled result of one request.

use asyncio_core::entry::{result_code, TaskKind};
use asyncio_core::error::{AsyncIoError, Result};
use asyncio_core::kwarn;

/// How a request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeResult {
    Complete,
    Failure(String),
    Canceled,
}

impl OutcomeResult {
    /// Map a native result code. Unknown codes become failures.
    pub fn classify(code: i32, message: &str) -> Self {
        match code {
            result_code::COMPLETE => Self::Complete,
            result_code::FAILURE => Self::Failure(if message.is_empty() {
                "native operation failed".to_string()
            } else {
                message.to_string()
            }),
            result_code::CANCELED => Self::Canceled,
            other => {
                kwarn!("unrecognized completion result code {}", other);
                Self::Failure(format!("unrecognized result code {}", other))
            }
        }
    }
}

/// One finished unit of asynchronous work.
///
/// Holds the read bytes only when the request was a read or load and it
/// completed; the bytes can be taken once.
#[derive(Debug)]
pub struct CompletionOutcome {
    pub result: OutcomeResult,
    pub kind: TaskKind,
    pub offset: u64,
    pub bytes_requested: u64,
    pub bytes_transferred: u64,
    buffer: Option<Vec<u8>>,
}

impl CompletionOutcome {
    pub fn new(
        result: OutcomeResult,
        kind: TaskKind,
        offset: u64,
        bytes_requested: u64,
        bytes_transferred: u64,
        buffer: Option<Vec<u8>>,
    ) -> Self {
        let buffer = match result {
            OutcomeResult::Complete if kind.returns_buffer() => buffer,
            _ => None,
        };
        Self {
            result,
            kind,
            offset,
            bytes_requested,
            bytes_transferred,
            buffer,
        }
    }

    /// Failure synthesized by the bridge for a request that never started.
    pub fn failed(kind: TaskKind, bytes_requested: u64, message: impl Into<String>) -> Self {
        Self::new(OutcomeResult::Failure(message.into()), kind, 0, bytes_requested, 0, None)
    }

    pub fn canceled(kind: TaskKind, bytes_requested: u64) -> Self {
        Self::new(OutcomeResult::Canceled, kind, 0, bytes_requested, 0, None)
    }

    pub fn is_complete(&self) -> bool {
        self.result == OutcomeResult::Complete
    }

    pub fn has_buffer(&self) -> bool {
        self.buffer.is_some()
    }

    /// The read bytes, once. Later calls return `None`.
    pub fn take_buffer(&mut self) -> Option<Vec<u8>> {
        self.buffer.take()
    }

    /// `Ok(())` for complete, the matching error otherwise.
    pub fn into_result(self) -> Result<()> {
        match self.result {
            OutcomeResult::Complete => Ok(()),
            OutcomeResult::Failure(msg) => Err(AsyncIoError::OperationFailed(msg)),
            OutcomeResult::Canceled => Err(AsyncIoError::Canceled),
        }
    }

    /// Bytes of a completed read or load.
    pub fn into_bytes(mut self) -> Result<Vec<u8>> {
        let buffer = self.take_buffer();
        self.into_result()?;
        Ok(buffer.unwrap_or_default())
    }

    /// Byte count of a completed write.
    pub fn into_count(self) -> Result<u64> {
        let n = self.bytes_transferred;
        self.into_result().map(|()| n)
    }
}
