//! Choosing which hosting peer to fetch from

use super::PeerId;

use parking_lot::Mutex;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::fmt;

/// The single decision point for picking a peer among candidates
///
/// Returns the index of the chosen candidate, `None` when there are none.
pub trait PeerSelector: Send + Sync {
    fn select(&self, candidates: &[PeerId]) -> Option<usize>;
}

/// Uniformly random choice from a seedable generator
pub struct RandomSelector {
    rng: Mutex<ChaCha8Rng>,
}

impl RandomSelector {
    /// Deterministic sequence of choices for a given seed
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
        }
    }

    pub fn from_entropy() -> Self {
        Self::seeded(rand::random())
    }
}

impl Default for RandomSelector {
    fn default() -> Self {
        Self::from_entropy()
    }
}

impl fmt::Debug for RandomSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RandomSelector")
    }
}

impl PeerSelector for RandomSelector {
    fn select(&self, candidates: &[PeerId]) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }
        Some(self.rng.lock().gen_range(0..candidates.len()))
    }
}

/// Always the first candidate, in directory order
#[derive(Debug, Default, Clone, Copy)]
pub struct InOrderSelector;

impl PeerSelector for InOrderSelector {
    fn select(&self, candidates: &[PeerId]) -> Option<usize> {
        if candidates.is_empty() {
            None
        } else {
            Some(0)
        }
    }
}
