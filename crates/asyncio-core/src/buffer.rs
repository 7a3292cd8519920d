//! Transfer buffer management.
//!
//! Every read or write travels with an owned [`TransferBuffer`]. The
//! backend holds it while the operation is in flight and hands it back in
//! the completion, so the native side never sees memory it does not own
//! and the bridge never frees memory twice.
//!
//! # Implementors of `BufferProvider`
//!
//! - `HeapBuffers` (default): one heap allocation per request, with
//!   in-use accounting. Simple, safe, works everywhere.
//!
//! - `RegisteredBuffers` (future): pre-registered io_uring buffers for
//!   `READ_FIXED` / `WRITE_FIXED`.

/// An owned I/O buffer.
///
/// `capacity` is what the native layer may write into; `len` is the number
/// of valid bytes. For reads `len` starts at zero and is set from the
/// completion's transferred count. For writes `len == capacity`.
pub struct TransferBuffer {
    data: Vec<u8>,
    len: usize,
}

impl TransferBuffer {
    /// A zero-filled destination buffer of `capacity` bytes.
    ///
    /// Fails instead of aborting when the allocation cannot be satisfied.
    pub fn for_read(capacity: usize) -> Option<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(capacity).ok()?;
        data.resize(capacity, 0);
        Some(Self { data, len: 0 })
    }

    /// An owned copy of the caller's bytes, kept alive for the whole write.
    pub fn for_write(bytes: &[u8]) -> Option<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(bytes.len()).ok()?;
        data.extend_from_slice(bytes);
        let len = data.len();
        Some(Self { data, len })
    }

    /// Wrap an already-filled vector.
    pub fn from_vec(data: Vec<u8>) -> Self {
        let len = data.len();
        Self { data, len }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Record how many bytes the native layer produced. Clamped to capacity.
    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(self.data.len());
    }

    /// Valid bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// The whole writable region, for backends that fill it in place.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.data[..]
    }

    /// Raw destination pointer for native submission.
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.data.as_mut_ptr()
    }

    /// Raw source pointer for native submission.
    pub fn as_ptr(&self) -> *const u8 {
        self.data.as_ptr()
    }

    /// Consume into a vector holding exactly the valid bytes.
    pub fn into_vec(mut self) -> Vec<u8> {
        self.data.truncate(self.len);
        self.data
    }
}

impl std::fmt::Debug for TransferBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferBuffer")
            .field("len", &self.len)
            .field("capacity", &self.data.len())
            .finish()
    }
}

/// Hands out transfer buffers.
///
/// **Contract:**
/// - `acquire_*()` returns `None` when memory cannot be obtained; the
///   caller reports that as an allocation error.
/// - `release()` is called exactly once per acquired buffer that comes
///   back from the backend. Buffers the caller keeps (read results) are
///   accounted via `detach()`.
pub trait BufferProvider: Send + Sync {
    /// Acquire a zeroed destination buffer of `size` bytes.
    fn acquire_read(&self, size: usize) -> Option<TransferBuffer>;

    /// Acquire a buffer holding a copy of `bytes`.
    fn acquire_write(&self, bytes: &[u8]) -> Option<TransferBuffer>;

    /// Return a buffer to the provider.
    fn release(&self, buf: TransferBuffer);

    /// Note that a buffer left the provider's custody (handed to a caller).
    fn detach(&self);

    /// Total number of buffers handed out so far.
    fn pool_size(&self) -> usize;

    /// Number of buffers currently in flight.
    fn in_use(&self) -> usize;
}
