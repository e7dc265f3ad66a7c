use crate::{SyncResult, Synchronizer};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Barrier;

/// In-process synchronizer: all workers share one cyclic barrier. Used by
/// tests and by single-process runs where every worker is a task in the
/// same runtime.
#[derive(Debug, Clone)]
pub struct LocalSynchronizer {
    rank: usize,
    world_size: usize,
    barrier: Arc<Barrier>,
}

impl LocalSynchronizer {
    /// Build one handle per rank, all backed by the same barrier.
    #[must_use]
    pub fn group(world_size: usize) -> Vec<Self> {
        let barrier = Arc::new(Barrier::new(world_size));
        (0..world_size)
            .map(|rank| Self { rank, world_size, barrier: Arc::clone(&barrier) })
            .collect()
    }
}

#[async_trait]
impl Synchronizer for LocalSynchronizer {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    async fn barrier(&self) -> SyncResult<()> {
        self.barrier.wait().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_no_worker_passes_until_all_arrive() {
        let world_size = 4;
        let arrived = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = LocalSynchronizer::group(world_size)
            .into_iter()
            .map(|sync| {
                let arrived = Arc::clone(&arrived);
                tokio::spawn(async move {
                    for round in 1..=3usize {
                        arrived.fetch_add(1, Ordering::SeqCst);
                        sync.barrier().await.unwrap();
                        // Everyone must have arrived at this round's barrier.
                        assert!(arrived.load(Ordering::SeqCst) >= round * world_size);
                        sync.barrier().await.unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(arrived.load(Ordering::SeqCst), 3 * world_size);
    }
}
