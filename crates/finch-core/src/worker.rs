use serde::{Deserialize, Serialize};

/// Per-process worker identity, created once at startup and alive for the
/// whole run. Each worker owns its own model replica, optimizer and step
/// executor; the only cross-worker channel is the synchronizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerContext {
    /// Rank in `0..world_size`.
    pub rank: usize,
    /// Total number of workers in the process group.
    pub world_size: usize,
    /// Compute device this worker is bound to.
    pub device_id: usize,
}

impl WorkerContext {
    #[must_use]
    pub fn new(rank: usize, world_size: usize) -> Self {
        // One device per worker, rank-indexed.
        Self { rank, world_size, device_id: rank }
    }

    /// Rank 0 is the only checkpoint writer.
    #[must_use]
    pub fn is_chief(&self) -> bool {
        self.rank == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chief_is_rank_zero_only() {
        assert!(WorkerContext::new(0, 4).is_chief());
        assert!(!WorkerContext::new(3, 4).is_chief());
    }
}
