//! Task queue seam.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;

use qrscan_queue::{Delivery, Disposition, QueueResult, Settlement, TopologyReport, VideoQueue};

/// Source of deliveries and sink of their dispositions.
///
/// Every delivery handed out by [`consume`](Self::consume) or
/// [`claim_pending`](Self::claim_pending) must be passed to
/// [`settle`](Self::settle) exactly once.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    fn consumer_name(&self) -> &str;

    /// Upper bound on deliveries fetched per read.
    fn read_count(&self) -> usize;

    /// Declare the topology and adopt its dead-letter path.
    async fn ensure_topology(&self) -> TopologyReport;

    /// Read up to `count` new deliveries, blocking for a bounded time.
    async fn consume(&self, count: usize) -> QueueResult<Vec<Delivery>>;

    /// Take over deliveries idle for at least `min_idle`, skipping `in_flight`.
    async fn claim_pending(
        &self,
        min_idle: Duration,
        count: usize,
        in_flight: &HashSet<String>,
    ) -> QueueResult<Vec<Delivery>>;

    /// Mark deliveries as still being worked on.
    async fn touch(&self, ids: &[String]) -> QueueResult<usize>;

    async fn settle(&self, delivery: Delivery, disposition: Disposition)
        -> QueueResult<Settlement>;

    /// Apply TTL and max-length bounds. Returns the number of entries dropped.
    async fn enforce_bounds(&self) -> QueueResult<u64>;
}

#[async_trait]
impl TaskQueue for VideoQueue {
    fn consumer_name(&self) -> &str {
        VideoQueue::consumer_name(self)
    }

    fn read_count(&self) -> usize {
        self.config().read_count.max(1)
    }

    async fn ensure_topology(&self) -> TopologyReport {
        VideoQueue::ensure_topology(self).await
    }

    async fn consume(&self, count: usize) -> QueueResult<Vec<Delivery>> {
        VideoQueue::consume(self, count, self.config().block_ms).await
    }

    async fn claim_pending(
        &self,
        min_idle: Duration,
        count: usize,
        in_flight: &HashSet<String>,
    ) -> QueueResult<Vec<Delivery>> {
        VideoQueue::claim_pending(self, min_idle.as_millis() as u64, count, in_flight).await
    }

    async fn touch(&self, ids: &[String]) -> QueueResult<usize> {
        VideoQueue::touch(self, ids).await
    }

    async fn settle(
        &self,
        delivery: Delivery,
        disposition: Disposition,
    ) -> QueueResult<Settlement> {
        VideoQueue::settle(self, delivery, disposition).await
    }

    async fn enforce_bounds(&self) -> QueueResult<u64> {
        self.topology().enforce_bounds().await
    }
}
