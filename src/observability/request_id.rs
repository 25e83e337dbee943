use std::sync::atomic::{AtomicU64, Ordering};

/// Cheap per-generation identifiers for log correlation.
///
/// One random seed per process, XORed with a monotonically increasing
/// sequence, so ids are unique within a process without hitting the OS RNG
/// on every call.
pub struct RequestIdGenerator {
    seed: u128,
    counter: AtomicU64,
}

impl Default for RequestIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestIdGenerator {
    #[must_use]
    pub fn new() -> Self {
        let seed_hi = u128::from(fastrand::u64(..));
        let seed_lo = u128::from(fastrand::u64(..));
        Self {
            seed: (seed_hi << 64) | seed_lo,
            counter: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub fn next_id(&self) -> uuid::Uuid {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        uuid::Uuid::from_u128(self.seed ^ u128::from(seq))
    }
}
