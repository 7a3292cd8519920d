//! Pending-request registry: token → waiting caller.
//!
//! A slab of slots behind one mutex. Each slot carries a generation that
//! is bumped when the slot is vacated, and the token handed out encodes
//! `(generation, slot)`. `take` succeeds at most once per registration;
//! a stale or forged token finds either an empty slot or a generation
//! mismatch and yields `None`.

use asyncio_core::entry::RequestToken;
use asyncio_core::error::{AsyncIoError, Result};

use std::sync::{Mutex, MutexGuard};

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

struct Slab<T> {
    slots: Vec<Slot<T>>,
    /// Vacant slot indices, reused LIFO.
    free: Vec<u32>,
    pending: usize,
}

pub struct PendingRegistry<T> {
    slab: Mutex<Slab<T>>,
    max_pending: usize,
}

impl<T> PendingRegistry<T> {
    /// `max_pending` is clamped to `u32::MAX`.
    pub fn new(max_pending: usize) -> Self {
        Self {
            slab: Mutex::new(Slab {
                slots: Vec::new(),
                free: Vec::new(),
                pending: 0,
            }),
            max_pending: max_pending.min(u32::MAX as usize),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slab<T>> {
        self.slab.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store `value` and return the token that retrieves it.
    pub fn register(&self, value: T) -> Result<RequestToken> {
        let mut slab = self.lock();
        if slab.pending >= self.max_pending {
            return Err(AsyncIoError::Issuance(format!(
                "{} requests already pending",
                slab.pending
            )));
        }
        let index = match slab.free.pop() {
            Some(i) => i,
            None => {
                slab.slots.push(Slot { generation: 0, value: None });
                (slab.slots.len() - 1) as u32
            }
        };
        let slot = &mut slab.slots[index as usize];
        debug_assert!(slot.value.is_none());
        slot.value = Some(value);
        let token = RequestToken::new(index, slot.generation);
        slab.pending += 1;
        Ok(token)
    }

    /// Retrieve-and-clear. `None` for stale, unknown or already-taken tokens.
    pub fn take(&self, token: RequestToken) -> Option<T> {
        if token.is_none() {
            return None;
        }
        let mut slab = self.lock();
        let index = token.slot();
        let slot = slab.slots.get_mut(index as usize)?;
        if slot.generation != token.generation() {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        slab.free.push(index);
        slab.pending -= 1;
        Some(value)
    }

    /// Remove every pending entry.
    pub fn drain(&self) -> Vec<(RequestToken, T)> {
        let mut slab = self.lock();
        let mut out = Vec::with_capacity(slab.pending);
        let Slab { slots, free, pending } = &mut *slab;
        for (index, slot) in slots.iter_mut().enumerate() {
            if let Some(value) = slot.value.take() {
                out.push((RequestToken::new(index as u32, slot.generation), value));
                slot.generation = slot.generation.wrapping_add(1);
                free.push(index as u32);
            }
        }
        *pending = 0;
        out
    }

    /// Registered and not yet taken.
    pub fn pending(&self) -> usize {
        self.lock().pending
    }

    pub fn capacity(&self) -> usize {
        self.max_pending
    }
}
