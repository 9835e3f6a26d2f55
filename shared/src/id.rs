//! Object id generation

use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Length of each alphanumeric group in a generated id
pub const ID_SEGMENT_LENGTH: usize = 8;

/// Source of fresh object ids. Worlds are configured with one so tests can
/// supply deterministic ids.
pub trait IdGenerator {
    fn next_id(&mut self) -> String;
}

/// Generates `XXXXXXXX-XXXXXXXX` tokens: short, random and readable in logs.
pub struct RandomIdGenerator {
    rng: StdRng,
}

impl RandomIdGenerator {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn segment(&mut self) -> String {
        (&mut self.rng)
            .sample_iter(&Alphanumeric)
            .take(ID_SEGMENT_LENGTH)
            .map(char::from)
            .collect()
    }
}

impl Default for RandomIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for RandomIdGenerator {
    fn next_id(&mut self) -> String {
        format!("{}-{}", self.segment(), self.segment())
    }
}

/// Counts upwards: `prefix-1`, `prefix-2`, ...
#[derive(Debug, Clone)]
pub struct SequentialIdGenerator {
    prefix: String,
    next: u64,
}

impl SequentialIdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: 1,
        }
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn next_id(&mut self) -> String {
        let id = format!("{}-{}", self.prefix, self.next);
        self.next += 1;
        id
    }
}
