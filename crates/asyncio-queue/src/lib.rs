//! # asyncio-queue: native async I/O completions as Rust futures
//!
//! This crate bridges a callback/poll style native completion facility
//! (any `AsyncIoBackend`) to task-based code. Every request gets a token,
//! a registered one-shot waiter, and exactly one resolution.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │          Caller (any thread, any executor)               │
//! │   file.read(&queue, 0, 4096).await                       │
//! └──────────────────┬──────────────────────────────────────┘
//!                    │ register waiter → token, then issue
//!                    ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │         CompletionQueue                                  │
//! │   PendingRegistry (slot + generation tokens)             │
//! │   issue refused → synthesized failure, resolved inline   │
//! └──────────────────┬──────────────────────────────────────┘
//!                    │ backend.read/write/close/load(token)
//! ┌──────────────────▼──────────────────────────────────────┐
//! │         AsyncIoBackend (pool / io_uring / scripted)       │
//! └──────────────────┬──────────────────────────────────────┘
//!                    │ NativeCompletion { token, code, buffer }
//! ┌──────────────────▼──────────────────────────────────────┐
//! │         Poll thread (one per queue)                      │
//! │   wait → take(token) → classify → one-shot send          │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use asyncio_queue::{block_on, AsyncFile, CompletionQueue};
//! use asyncio_module::{PoolBackend, PoolConfig};
//! use std::sync::Arc;
//!
//! let backend = Arc::new(PoolBackend::new(PoolConfig::from_env())?);
//! let queue = CompletionQueue::new(backend)?;
//!
//! let file = AsyncFile::open("/tmp/data", "w+", &queue)?;
//! block_on(file.write(&queue, 0, b"hello"))?;
//! let bytes = block_on(file.read(&queue, 0, 100))?;   // 5 bytes
//! block_on(file.close(&queue, true))?;
//! ```
//!
//! ## Design Decisions
//!
//! - **Register before issue**: a completion can never arrive for a token
//!   the registry does not know yet
//! - **Generation tokens**: a late or duplicate completion finds a stale
//!   slot and is dropped, never resumes a waiter twice
//! - **Shutdown drains**: requests still pending when the queue stops are
//!   resolved as `Canceled` before the native queue is destroyed
//! - **Executor-agnostic**: `Completion` is a plain `Future`; `block_on`
//!   and `Completion::wait` cover threads without a runtime

pub mod block_on;
pub mod config;
pub mod file;
pub mod oneshot;
pub mod outcome;
pub mod queue;
pub mod registry;

pub use block_on::block_on;
pub use config::{ConfigError, QueueConfig};
pub use file::{load_file, AsyncFile};
pub use outcome::{CompletionOutcome, OutcomeResult};
pub use queue::{Completion, CompletionQueue, LazyQueue};
pub use registry::PendingRegistry;

pub use asyncio_core::{AsyncIoBackend, AsyncIoError, OpenMode, Result};
