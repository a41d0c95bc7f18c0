//! World-wide random number generator.
//!
//! The whole generator state is four `u32` words, sent to every client in
//! the RNG bootstrap command. After that the client draws the same
//! sequence the server does.

use rand::Rng;

use crate::WorldError;

/// Marsaglia xorshift128.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldRng {
    state: [u32; 4],
}

impl WorldRng {
    pub const STATE_WORDS: usize = 4;

    /// Seeds from the thread-local OS-backed generator.
    pub fn from_entropy() -> Self {
        let mut rng = rand::rng();
        loop {
            let state: [u32; 4] = rng.random();
            // The all-zero state is a fixed point.
            if state != [0; 4] {
                return Self { state };
            }
        }
    }

    /// Restores a generator from its state words.
    ///
    /// # Errors
    /// Returns [`WorldError::BadRecord`] unless there are exactly four
    /// words and at least one is non-zero.
    pub fn from_state(words: &[u32]) -> Result<Self, WorldError> {
        let state: [u32; 4] = words.try_into().map_err(|_| {
            WorldError::BadRecord(format!(
                "rng state has {} words, expected {}",
                words.len(),
                Self::STATE_WORDS
            ))
        })?;
        if state == [0; 4] {
            return Err(WorldError::BadRecord("rng state is all zero".into()));
        }
        Ok(Self { state })
    }

    pub fn state(&self) -> [u32; 4] {
        self.state
    }

    pub fn next_u32(&mut self) -> u32 {
        let [x, y, z, w] = self.state;
        let t = x ^ (x << 11);
        let next = w ^ (w >> 19) ^ (t ^ (t >> 8));
        self.state = [y, z, w, next];
        next
    }

    /// Uniform in `[0, 1)`.
    pub fn next_f64(&mut self) -> f64 {
        f64::from(self.next_u32()) / (f64::from(u32::MAX) + 1.0)
    }
}

impl Default for WorldRng {
    fn default() -> Self {
        Self::from_entropy()
    }
}
