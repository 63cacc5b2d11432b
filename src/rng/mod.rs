//! Counter-based random number state.
//!
//! A `Generator` owns `(seed, offset)`. Launches reserve a span of counter
//! words before they start; the lock covers only that reservation, never the
//! kernel body.

pub mod philox;

use std::sync::Mutex;

use log::trace;

pub use philox::Philox4x32;

use crate::error::{Error, Result};

/// Inputs a random kernel captures: the seed and the first counter word of
/// its reserved span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhiloxSeed {
    pub seed: u64,
    pub offset: u64,
}

#[derive(Debug, Clone, Copy)]
struct State {
    seed: u64,
    offset: u64,
}

/// Explicit generator handle.
#[derive(Debug)]
pub struct Generator {
    state: Mutex<State>,
}

impl Generator {
    pub fn new(seed: u64) -> Self {
        Self {
            state: Mutex::new(State { seed, offset: 0 }),
        }
    }

    /// Seeds from the thread-local entropy source.
    pub fn from_entropy() -> Self {
        Self::new(rand::random::<u64>())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| Error::Msg("generator state poisoned".to_string()))
    }

    pub fn seed(&self) -> Result<u64> {
        Ok(self.lock()?.seed)
    }

    pub fn offset(&self) -> Result<u64> {
        Ok(self.lock()?.offset)
    }

    /// Resets the seed and rewinds the counter.
    pub fn manual_seed(&self, seed: u64) -> Result<()> {
        *self.lock()? = State { seed, offset: 0 };
        Ok(())
    }

    /// Restores a previously observed state. The offset must be a multiple
    /// of 4 so lane streams start on a block boundary.
    pub fn set_state(&self, seed: u64, offset: u64) -> Result<()> {
        if offset % 4 != 0 {
            return Err(Error::precondition(
                "set_state",
                format!("offset {offset} is not a multiple of 4"),
            ));
        }
        *self.lock()? = State { seed, offset };
        Ok(())
    }

    /// Reserves `increment` counter words and returns the span's start.
    /// Spans handed out by one generator never overlap.
    pub fn reserve(&self, increment: u64) -> Result<PhiloxSeed> {
        let increment = increment.div_ceil(4) * 4;
        let mut state = self.lock()?;
        let reserved = PhiloxSeed {
            seed: state.seed,
            offset: state.offset,
        };
        state.offset += increment;
        drop(state);
        trace!(
            "reserved counter words {}..{} for seed {}",
            reserved.offset,
            reserved.offset + increment,
            reserved.seed
        );
        Ok(reserved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_reservations_advance_in_blocks() {
        let g = Generator::new(9);
        assert_eq!(g.reserve(4).unwrap(), PhiloxSeed { seed: 9, offset: 0 });
        assert_eq!(g.reserve(5).unwrap().offset, 4);
        assert_eq!(g.offset().unwrap(), 12);
    }

    #[test]
    fn test_concurrent_spans_do_not_overlap() {
        let g = Arc::new(Generator::new(1));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let g = Arc::clone(&g);
                thread::spawn(move || (0..50).map(|_| g.reserve(8).unwrap().offset).collect::<Vec<_>>())
            })
            .collect();
        let mut offsets: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        offsets.sort_unstable();
        offsets.dedup();
        assert_eq!(offsets.len(), 400);
        assert!(offsets.windows(2).all(|w| w[1] - w[0] >= 8));
    }

    #[test]
    fn test_manual_seed_rewinds() {
        let g = Generator::new(3);
        g.reserve(16).unwrap();
        g.manual_seed(4).unwrap();
        assert_eq!(g.seed().unwrap(), 4);
        assert_eq!(g.offset().unwrap(), 0);
        assert!(g.set_state(4, 6).is_err());
    }
}
