//! # asyncio-module: Default (safe) implementations
//!
//! This crate provides the default implementation for every asyncio-core
//! trait. Each impl prioritizes correctness and simplicity over performance.
//!
//! ## Default stack
//!
//! | Trait            | Default Impl       | Alternatives                      |
//! |------------------|--------------------|-----------------------------------|
//! | AsyncIoBackend   | PoolBackend        | UringBackend (linux), ScriptedBackend (tests) |
//! | Notifier         | EventFdNotifier    | CondvarNotifier (non-linux)       |
//! | BufferProvider   | HeapBuffers        |                                   |

pub mod condvar_notifier;
pub mod heap_buffers;
pub mod pool_backend;
pub mod scripted;

#[cfg(target_os = "linux")]
pub mod eventfd_notifier;
#[cfg(target_os = "linux")]
pub mod uring_backend;

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        /// Notifier used for per-queue completion wakeups on this platform.
        pub type PlatformNotifier = eventfd_notifier::EventFdNotifier;
    } else {
        /// Notifier used for per-queue completion wakeups on this platform.
        pub type PlatformNotifier = condvar_notifier::CondvarNotifier;
    }
}

pub use heap_buffers::HeapBuffers;
pub use pool_backend::{PoolBackend, PoolConfig};
pub use scripted::ScriptedBackend;
#[cfg(target_os = "linux")]
pub use uring_backend::{UringBackend, UringConfig};
