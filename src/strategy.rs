//! Selection strategies for single-target pool operations.

use rand::Rng;

use crate::error::{Error, Result};

/// Chooses one pool member key from a candidate set.
pub trait SelectionStrategy: Send {
    /// Picks a key from `candidates`. Fails on an empty candidate set.
    fn pick_one(&mut self, candidates: &[String]) -> Result<String>;
}

/// Cycles through the candidate set in order.
///
/// The cursor survives across calls while the key set is unchanged; a
/// membership change clamps the cursor back into bounds (resetting to the
/// first key) rather than failing.
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: usize,
    last_seen: Vec<String>,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SelectionStrategy for RoundRobin {
    fn pick_one(&mut self, candidates: &[String]) -> Result<String> {
        if candidates.is_empty() {
            return Err(Error::invalid("empty candidate set"));
        }

        if self.last_seen != candidates {
            self.last_seen = candidates.to_vec();
            if self.cursor >= candidates.len() {
                self.cursor = 0;
            }
        }

        let picked = candidates[self.cursor].clone();
        self.cursor = (self.cursor + 1) % candidates.len();

        Ok(picked)
    }
}

/// Picks uniformly at random. Stateless; a single-key set short-circuits
/// without touching the random source.
#[derive(Debug, Default)]
pub struct Random;

impl Random {
    pub fn new() -> Self {
        Self
    }
}

impl SelectionStrategy for Random {
    fn pick_one(&mut self, candidates: &[String]) -> Result<String> {
        match candidates {
            [] => Err(Error::invalid("empty candidate set")),
            [only] => Ok(only.clone()),
            _ => {
                let idx = rand::rng().random_range(0..candidates.len());
                Ok(candidates[idx].clone())
            },
        }
    }
}
