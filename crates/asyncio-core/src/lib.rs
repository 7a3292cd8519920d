//! # asyncio-core: Trait definitions for the asyncio completion bridge
//!
//! This crate defines the boundary between the completion-queue bridge
//! (`asyncio-queue`) and whatever native facility actually performs
//! asynchronous file I/O. Each trait models one capability dimension:
//!
//! | Trait            | Role                                              |
//! |------------------|---------------------------------------------------|
//! | `AsyncIoBackend` | create/wait/signal/destroy queues, issue file ops |
//! | `Notifier`       | wake a thread blocked waiting for completions     |
//! | `BufferProvider` | hand out transfer buffers for reads and writes    |
//!
//! Default implementations live in `asyncio-module`.
//!
//! ## Design principle
//!
//! > "Program to the interface. Start safe. Optimize with a new impl,
//! >  not by modifying the existing one."
//!
//! The bridge depends only on the traits here. Swapping the thread-pool
//! backend for io_uring (or a scripted one in tests) is a type change at
//! the construction site.

pub mod entry;
pub mod backend;
pub mod notifier;
pub mod buffer;
pub mod error;
pub mod env;
#[macro_use]
pub mod kprint;

pub use backend::{AsyncIoBackend, OpenMode};
pub use buffer::{BufferProvider, TransferBuffer};
pub use entry::{NativeCompletion, RequestToken, TaskKind};
pub use error::{AsyncIoError, Result};
