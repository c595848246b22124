//! Reproducible random streams.
//!
//! # Algorithm
//!
//! Every stream is a ChaCha8 keystream (`rand_chacha::ChaCha8Rng`) keyed by
//! `SeedableRng::seed_from_u64(seed)`. Its position is the 32-bit word
//! offset into that keystream, so the pair `(seed, word_pos)` identifies the
//! generator state completely and is portable across platforms and
//! processes. That pair is what [`StreamState`] carries.
//!
//! Derived values are computed here rather than through `rand::Rng` so the
//! mapping from raw words to values is pinned to this crate:
//!
//! - `draw_float`: the top 53 bits of one `u64`, scaled by `2^-53`.
//! - `draw_int`: rejection sampling. With `span = high - low + 1`, draw a
//!   `u64` until it falls below `floor(2^64 / span) * span`, then return
//!   `low + x % span`. The full `i64` range takes one draw, unreduced.

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::KernelError;

/// Algorithm tag written into every exported [`StreamState`].
pub const STREAM_ALGORITHM: &str = "chacha8";
/// Version of the [`StreamState`] layout.
pub const STREAM_STATE_VERSION: u32 = 1;

/// ChaCha addresses blocks with a 64-bit counter of 16-word blocks.
const MAX_WORD_POS_BITS: u32 = 68;

/// Exported position of a [`RandomStream`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamState {
    pub algorithm: String,
    pub version: u32,
    pub seed: u64,
    pub word_pos: u128,
}

impl StreamState {
    /// Check that this token was produced by a compatible stream.
    pub fn validate(&self) -> Result<(), KernelError> {
        if self.algorithm != STREAM_ALGORITHM {
            return Err(KernelError::InvalidState(format!(
                "unsupported stream algorithm {:?}",
                self.algorithm
            )));
        }
        if self.version != STREAM_STATE_VERSION {
            return Err(KernelError::InvalidState(format!(
                "unsupported stream state version {}",
                self.version
            )));
        }
        if self.word_pos >> MAX_WORD_POS_BITS != 0 {
            return Err(KernelError::InvalidState(format!(
                "stream position {} out of range",
                self.word_pos
            )));
        }
        Ok(())
    }
}

/// A single seeded, reproducible source of random values.
#[derive(Debug, Clone)]
pub struct RandomStream {
    seed: u64,
    inner: ChaCha8Rng,
}

impl RandomStream {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            inner: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// The seed this stream was created (or last reseeded) with.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Raw 64-bit draw.
    pub fn next_u64(&mut self) -> u64 {
        self.inner.next_u64()
    }

    /// Uniform float in `[0, 1)`.
    pub fn draw_float(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Uniform integer in `[low, high]`, both inclusive.
    ///
    /// Fails without consuming anything when `low > high`.
    pub fn draw_int(&mut self, low: i64, high: i64) -> Result<i64, KernelError> {
        if low > high {
            return Err(KernelError::EmptyRange { low, high });
        }
        let span = (high as i128 - low as i128 + 1) as u128;
        if span > u64::MAX as u128 {
            return Ok(self.next_u64() as i64);
        }
        let span = span as u64;
        let zone = (u64::MAX / span) * span;
        loop {
            let x = self.next_u64();
            if x < zone {
                return Ok(low.wrapping_add((x % span) as i64));
            }
        }
    }

    pub fn export_state(&self) -> StreamState {
        StreamState {
            algorithm: STREAM_ALGORITHM.to_string(),
            version: STREAM_STATE_VERSION,
            seed: self.seed,
            word_pos: self.inner.get_word_pos(),
        }
    }

    /// Restore a position previously produced by [`export_state`].
    ///
    /// A foreign or out-of-range token is rejected and the stream is left
    /// as it was.
    ///
    /// [`export_state`]: RandomStream::export_state
    pub fn import_state(&mut self, state: &StreamState) -> Result<(), KernelError> {
        state.validate()?;
        *self = Self::from_state_unchecked(state);
        Ok(())
    }

    /// Discard the current position and start over from `seed`.
    pub fn reseed(&mut self, seed: u64) {
        *self = Self::new(seed);
    }

    /// Build a stream directly from a token that already passed
    /// [`StreamState::validate`].
    pub(crate) fn from_state_unchecked(state: &StreamState) -> Self {
        let mut stream = Self::new(state.seed);
        stream.inner.set_word_pos(state.word_pos);
        stream
    }
}
