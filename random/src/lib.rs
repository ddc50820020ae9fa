//! Sample unbiased random integers and strings from a cryptographically secure source.
//!
//! All values produced by a [Sampler] are drawn with rejection sampling: for a domain `[0, n)`,
//! the sampler reads the smallest number of bytes that covers `n - 1`, masks the excess high
//! bits of the first byte, and redraws whenever the result is `>= n`. Because the window is at
//! most one bit wider than required, fewer than half of all draws are rejected. No value is ever
//! reduced with `% n`, which would favor small residues whenever `n` is not a power of two.
//!
//! # Entropy Failures
//!
//! A failed read from the underlying source surfaces as [Error::Entropy]. Callers must treat it
//! as fatal for the computation that requested randomness (never retry with a weaker source).
//!
//! # Example
//!
//! ```rust
//! use threshold_random::Sampler;
//!
//! let sampler = Sampler::new();
//! let die = sampler.uniform_int(6).unwrap();
//! assert!(die < 6);
//!
//! let id = sampler.string(20).unwrap();
//! assert_eq!(id.len(), 20);
//! ```

use num_bigint::BigUint;
use rand::{rngs::OsRng, CryptoRng, RngCore};
use std::sync::Mutex;
use thiserror::Error;

pub mod pool;
use pool::Pool;

/// Characters produced by [Sampler::string].
pub const ALPHABET: &[u8; 62] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Bits consumed per character candidate.
const LETTER_BITS: u32 = 6;

/// Mask selecting one character candidate.
const LETTER_MASK: u64 = (1 << LETTER_BITS) - 1;

/// Candidates extracted from one 63-bit draw.
const LETTERS_PER_DRAW: usize = 63 / LETTER_BITS as usize;

/// Errors that can occur when sampling.
#[derive(Error, Debug)]
pub enum Error {
    #[error("bound must be positive")]
    InvalidBound,
    #[error("entropy source failed: {0}")]
    Entropy(#[from] rand::Error),
}

/// Draws uniformly distributed values from a cryptographically secure source.
///
/// A [Sampler] is built once and shared by reference (typically behind an `Arc`). The source
/// is guarded by a mutex, so a single instance may be used from many tasks at once.
pub struct Sampler<R = OsRng> {
    source: Mutex<R>,
    pool: Pool,
}

impl Sampler<OsRng> {
    /// Create a sampler backed by the operating system's entropy source.
    pub fn new() -> Self {
        Self::from_source(OsRng)
    }
}

impl Default for Sampler<OsRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: RngCore + CryptoRng> Sampler<R> {
    /// Create a sampler backed by `source`.
    ///
    /// Tests use this to substitute a seeded or scripted source.
    pub fn from_source(source: R) -> Self {
        Self {
            source: Mutex::new(source),
            pool: Pool::default(),
        }
    }

    /// Recover the underlying source.
    pub fn into_source(self) -> R {
        self.source.into_inner().unwrap()
    }

    /// Fill `dst` with random bytes.
    pub fn fill(&self, dst: &mut [u8]) -> Result<(), Error> {
        self.source.lock().unwrap().try_fill_bytes(dst)?;
        Ok(())
    }

    /// Return `size` random bytes.
    pub fn bytes(&self, size: usize) -> Result<Vec<u8>, Error> {
        let mut bytes = vec![0; size];
        self.fill(&mut bytes)?;
        Ok(bytes)
    }

    /// Return an integer uniformly distributed in `[0, bound)`.
    pub fn uniform_int(&self, bound: u64) -> Result<u64, Error> {
        if bound == 0 {
            return Err(Error::InvalidBound);
        }
        let bits = u64::BITS - (bound - 1).leading_zeros();
        if bits == 0 {
            return Ok(0);
        }
        let start = (u64::BITS - bits.div_ceil(8) * 8) as usize / 8;
        let mut buffer = [0u8; 8];
        loop {
            self.fill(&mut buffer[start..])?;
            buffer[start] &= top_mask(bits);
            let value = u64::from_be_bytes(buffer);
            if value < bound {
                return Ok(value);
            }
        }
    }

    /// Return an index uniformly distributed in `[0, bound)`.
    pub fn uniform_usize(&self, bound: usize) -> Result<usize, Error> {
        Ok(self.uniform_int(bound as u64)? as usize)
    }

    /// Return a non-negative integer uniformly distributed in `[0, i64::MAX]`.
    pub fn int(&self) -> Result<i64, Error> {
        Ok(self.uniform_int(1 << 63)? as i64)
    }

    /// Return an integer uniformly distributed in `[0, n)`.
    ///
    /// Uses the same rejection algorithm as [Sampler::uniform_int] with scratch space borrowed
    /// from the sampler's buffer pool.
    pub fn uniform_bigint(&self, n: &BigUint) -> Result<BigUint, Error> {
        if n.bits() == 0 {
            return Err(Error::InvalidBound);
        }
        let max = n - 1u32;
        let bits = max.bits();
        if bits == 0 {
            return Ok(BigUint::default());
        }
        let mask = top_mask((bits % 8) as u32);
        let mut scratch = self.pool.take(bits.div_ceil(8) as usize);
        loop {
            self.fill(&mut scratch)?;
            scratch[0] &= mask;
            let value = BigUint::from_bytes_be(&scratch);
            if &value < n {
                return Ok(value);
            }
        }
    }

    /// Return a string of `length` characters drawn uniformly from [ALPHABET].
    ///
    /// Each 8-byte read yields up to ten 6-bit candidates; candidates outside the alphabet are
    /// skipped.
    pub fn string(&self, length: usize) -> Result<String, Error> {
        let mut out = vec![0u8; length];
        let mut remaining = length;
        let mut cache = 0u64;
        let mut candidates = 0;
        while remaining > 0 {
            if candidates == 0 {
                let mut draw = [0u8; 8];
                self.fill(&mut draw)?;
                cache = u64::from_be_bytes(draw);
                candidates = LETTERS_PER_DRAW;
            }
            let index = (cache & LETTER_MASK) as usize;
            if index < ALPHABET.len() {
                remaining -= 1;
                out[remaining] = ALPHABET[index];
            }
            cache >>= LETTER_BITS;
            candidates -= 1;
        }
        Ok(out.into_iter().map(char::from).collect())
    }

    /// Apply a uniformly random permutation to `items` (Fisher-Yates).
    pub fn shuffle<T>(&self, items: &mut [T]) -> Result<(), Error> {
        for i in (1..items.len()).rev() {
            let j = self.uniform_usize(i + 1)?;
            items.swap(i, j);
        }
        Ok(())
    }
}

/// Mask keeping the low `bits % 8` bits of the leading byte (all bits on a byte boundary).
const fn top_mask(bits: u32) -> u8 {
    match bits % 8 {
        0 => u8::MAX,
        rem => (1 << rem) - 1,
    }
}
