//! `HeapBuffers`: default `BufferProvider` implementation.
//!
//! Each transfer buffer is a fresh heap allocation. No pre-registration,
//! no page pinning. The provider only keeps counters so leaks and double
//! releases show up in diagnostics and tests.

use asyncio_core::buffer::{BufferProvider, TransferBuffer};

use std::sync::atomic::{AtomicUsize, Ordering};

pub struct HeapBuffers {
    /// Refuse single requests larger than this.
    max_size: usize,
    /// Buffers currently in flight.
    in_use: AtomicUsize,
    /// Total handed out.
    total: AtomicUsize,
}

impl HeapBuffers {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            in_use: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
        }
    }

    fn account(&self, buf: Option<TransferBuffer>) -> Option<TransferBuffer> {
        if buf.is_some() {
            self.in_use.fetch_add(1, Ordering::Relaxed);
            self.total.fetch_add(1, Ordering::Relaxed);
        }
        buf
    }

    fn leave(&self) {
        let prev = self.in_use.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(prev > 0, "buffer released more times than acquired");
    }
}

impl Default for HeapBuffers {
    fn default() -> Self {
        Self::new(1 << 30) // 1 GiB per request
    }
}

impl BufferProvider for HeapBuffers {
    fn acquire_read(&self, size: usize) -> Option<TransferBuffer> {
        if size > self.max_size {
            return None;
        }
        self.account(TransferBuffer::for_read(size))
    }

    fn acquire_write(&self, bytes: &[u8]) -> Option<TransferBuffer> {
        if bytes.len() > self.max_size {
            return None;
        }
        self.account(TransferBuffer::for_write(bytes))
    }

    fn release(&self, buf: TransferBuffer) {
        drop(buf);
        self.leave();
    }

    fn detach(&self) {
        self.leave();
    }

    fn pool_size(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }

    fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }
}
