//! Reusable scratch buffers for rejection sampling.
//!
//! Every buffer handed out by [Pool] has the same size class ([MAX_POOLED_SIZE] bytes) and
//! carries no identity: whoever takes it next may observe nothing of the previous holder
//! because buffers are zeroed before they are returned. Requests larger than the size class
//! are served by a fresh allocation that is dropped (not pooled) when released.

use std::{
    ops::{Deref, DerefMut},
    sync::Mutex,
};

/// Largest scratch buffer kept in the pool (enough for a 521-bit modulus).
pub const MAX_POOLED_SIZE: usize = 521_usize.div_ceil(8);

/// Default number of idle buffers retained by a [Pool].
pub const DEFAULT_RETAINED: usize = 64;

enum Storage {
    Pooled(Box<[u8; MAX_POOLED_SIZE]>),
    Owned(Vec<u8>),
}

/// A bounded freelist of [MAX_POOLED_SIZE]-byte buffers.
pub struct Pool {
    free: Mutex<Vec<Box<[u8; MAX_POOLED_SIZE]>>>,
    retained: usize,
}

impl Default for Pool {
    fn default() -> Self {
        Self::new(DEFAULT_RETAINED)
    }
}

impl Pool {
    /// Create a pool that keeps at most `retained` idle buffers.
    pub fn new(retained: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            retained,
        }
    }

    /// Borrow a zeroed buffer of exactly `len` bytes.
    pub fn take(&self, len: usize) -> Scratch<'_> {
        let storage = if len <= MAX_POOLED_SIZE {
            let buffer = self.free.lock().unwrap().pop();
            Storage::Pooled(buffer.unwrap_or_else(|| Box::new([0; MAX_POOLED_SIZE])))
        } else {
            Storage::Owned(vec![0; len])
        };
        Scratch {
            pool: self,
            storage: Some(storage),
            len,
        }
    }

    /// Number of idle buffers currently held.
    pub fn idle(&self) -> usize {
        self.free.lock().unwrap().len()
    }

    fn release(&self, mut buffer: Box<[u8; MAX_POOLED_SIZE]>) {
        buffer.fill(0);
        let mut free = self.free.lock().unwrap();
        if free.len() < self.retained {
            free.push(buffer);
        }
    }
}

/// A buffer borrowed from a [Pool], returned on drop.
pub struct Scratch<'a> {
    pool: &'a Pool,
    storage: Option<Storage>,
    len: usize,
}

impl Deref for Scratch<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match &self.storage {
            Some(Storage::Pooled(buffer)) => &buffer[..self.len],
            Some(Storage::Owned(buffer)) => buffer,
            None => &[],
        }
    }
}

impl DerefMut for Scratch<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        match &mut self.storage {
            Some(Storage::Pooled(buffer)) => &mut buffer[..self.len],
            Some(Storage::Owned(buffer)) => buffer,
            None => &mut [],
        }
    }
}

impl Drop for Scratch<'_> {
    fn drop(&mut self) {
        if let Some(Storage::Pooled(buffer)) = self.storage.take() {
            self.pool.release(buffer);
        }
    }
}
