//! Primary key generation for sharded inserts.
//!
//! Rows of a sharded table cannot rely on a per-database auto-increment, so
//! inserts that do not carry a primary key get one from an [`IdGenerator`].

use rand::Rng;
use std::sync::atomic::{AtomicI64, Ordering};

/// Source of primary key values for sharded inserts.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> i64;
}

/// Uniformly random ids over the full non-negative `i64` range.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIdGenerator;

impl IdGenerator for RandomIdGenerator {
    fn next_id(&self) -> i64 {
        rand::thread_rng().gen_range(0..=i64::MAX)
    }
}

/// Monotonic ids starting at a fixed value. Deterministic, for tests and
/// single-process tooling.
#[derive(Debug)]
pub struct SequenceIdGenerator {
    next: AtomicI64,
}

impl SequenceIdGenerator {
    pub fn starting_at(first: i64) -> Self {
        Self {
            next: AtomicI64::new(first),
        }
    }
}

impl IdGenerator for SequenceIdGenerator {
    fn next_id(&self) -> i64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}
