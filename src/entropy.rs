//! Random source for synthetic failures, replenishment and external events

use rand::Rng;
use std::ops::Range;

/// Source of randomness used by the engine.
pub trait EntropySource: Send + Sync {
    /// True with probability `p`
    fn chance(&self, p: f64) -> bool;

    /// Uniform integer in `range` (end exclusive)
    fn between(&self, range: Range<i64>) -> i64;
}

/// `rand::thread_rng` backed source
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadEntropy;

impl EntropySource for ThreadEntropy {
    fn chance(&self, p: f64) -> bool {
        if p <= 0.0 {
            return false;
        }
        if p >= 1.0 {
            return true;
        }
        rand::thread_rng().gen_bool(p)
    }

    fn between(&self, range: Range<i64>) -> i64 {
        if range.is_empty() {
            return range.start;
        }
        rand::thread_rng().gen_range(range)
    }
}

/// Fixed answers. `chance` is always `hit`, `between` always returns the lower bound.
#[derive(Debug, Clone, Copy)]
pub struct FixedEntropy {
    pub hit: bool,
}

impl EntropySource for FixedEntropy {
    fn chance(&self, _p: f64) -> bool {
        self.hit
    }

    fn between(&self, range: Range<i64>) -> i64 {
        range.start
    }
}
