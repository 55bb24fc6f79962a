//! Video task queue on Redis Streams.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use redis::aio::MultiplexedConnection;
use redis::streams::{
    StreamClaimReply, StreamId, StreamPendingCountReply, StreamPendingId, StreamReadReply,
};
use redis::AsyncCommands;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use qrscan_models::VideoTask;

use crate::config::QueueConfig;
use crate::delivery::{
    Delivery, Disposition, Settlement, FIELD_DELIVERY_COUNT, FIELD_ENQUEUED_AT, FIELD_PAYLOAD,
};
use crate::error::{QueueError, QueueResult};
use crate::topology::{QueueTopology, TopologyReport};

/// A message parked in the dead-letter stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterEntry {
    pub id: String,
    pub payload: String,
    pub delivery_count: u32,
    pub reason: Option<String>,
    pub error: Option<String>,
    pub original_id: Option<String>,
    pub dead_lettered_at: Option<i64>,
}

impl DeadLetterEntry {
    fn from_entry(entry: &StreamId) -> Self {
        let delivery = Delivery::from_entry(entry, 0);
        let text = |key: &str| entry.get::<String>(key);
        Self {
            id: entry.id.clone(),
            payload: delivery.payload_lossy(),
            delivery_count: delivery.delivery_count,
            reason: text("reason"),
            error: text("error"),
            original_id: text("original_id"),
            dead_lettered_at: entry.get::<i64>("dead_lettered_at"),
        }
    }
}

/// Consumer-side handle on the video queue.
#[derive(Clone)]
pub struct VideoQueue {
    client: redis::Client,
    config: QueueConfig,
    consumer_name: String,
    /// Dead-letter stream verified by the last topology check
    dead_letter_target: Arc<RwLock<Option<String>>>,
}

impl VideoQueue {
    /// Create a queue handle. No connection is made until first use.
    pub fn new(config: QueueConfig, consumer_name: impl Into<String>) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            config,
            consumer_name: consumer_name.into(),
            dead_letter_target: Arc::new(RwLock::new(None)),
        })
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Verify the broker is reachable.
    pub async fn connect(&self) -> QueueResult<()> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;
        info!(redis_url = %redacted(&self.config.redis_url), "Connected to broker");
        Ok(())
    }

    /// Topology manager sharing this queue's client and config.
    pub fn topology(&self) -> QueueTopology {
        QueueTopology::new(self.client.clone(), self.config.clone())
    }

    /// Ensure the topology and adopt its dead-letter target for settlement.
    ///
    /// Until a report with a usable dead-letter path has been adopted,
    /// dead-lettered messages are dropped.
    pub async fn ensure_topology(&self) -> TopologyReport {
        let report = self.topology().ensure().await;
        let target = report.dead_letter_target().map(str::to_string);
        *self.dead_letter_target.write().await = target;
        report
    }

    /// Stream dead-lettered messages currently go to.
    pub async fn dead_letter_target(&self) -> Option<String> {
        self.dead_letter_target.read().await.clone()
    }

    async fn conn(&self) -> QueueResult<MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Enqueue a task. Returns the entry ID.
    pub async fn publish(&self, task: &VideoTask) -> QueueResult<String> {
        let payload = task.to_payload()?;
        let id = self.publish_raw(payload.as_bytes()).await?;
        info!(video_id = %task.id(), message_id = %id, "Enqueued video task");
        Ok(id)
    }

    /// Enqueue an arbitrary body as a fresh message.
    pub async fn publish_raw(&self, payload: &[u8]) -> QueueResult<String> {
        let mut conn = self.conn().await?;
        let id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.config.max_length)
            .arg("*")
            .arg(FIELD_PAYLOAD)
            .arg(payload)
            .arg(FIELD_DELIVERY_COUNT)
            .arg(0)
            .arg(FIELD_ENQUEUED_AT)
            .arg(Utc::now().timestamp_millis())
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::publish_failed(e.to_string()))?;

        metrics::counter!("qrscan_queue_published_total").increment(1);
        Ok(id)
    }

    /// Read new messages for this consumer, blocking up to `block_ms`.
    pub async fn consume(&self, count: usize, block_ms: u64) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.conn().await?;

        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(&self.consumer_name)
            .arg("COUNT")
            .arg(count.max(1))
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let deliveries: Vec<Delivery> = reply
            .into_iter()
            .flat_map(|r| r.keys)
            .flat_map(|key| key.ids)
            .map(|entry| Delivery::from_entry(&entry, 0))
            .collect();

        if !deliveries.is_empty() {
            debug!(count = deliveries.len(), "Consumed messages");
            metrics::counter!("qrscan_queue_consumed_total").increment(deliveries.len() as u64);
        }
        Ok(deliveries)
    }

    /// Take over messages held longer than `min_idle_ms` without settling.
    ///
    /// Entries in `in_flight` are still being handled by this consumer and
    /// are never claimed. Each hand-out to a consumer that never settled
    /// counts as a prior delivery, so crash loops still reach the retry
    /// ceiling.
    pub async fn claim_pending(
        &self,
        min_idle_ms: u64,
        count: usize,
        in_flight: &HashSet<String>,
    ) -> QueueResult<Vec<Delivery>> {
        let mut conn = self.conn().await?;

        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(count.max(1) + in_flight.len())
            .query_async(&mut conn)
            .await?;

        let ids = claimable_ids(&pending.ids, in_flight, count.max(1));
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(&self.consumer_name)
            .arg(min_idle_ms);
        for id in &ids {
            cmd.arg(id);
        }
        let claimed: StreamClaimReply = cmd.query_async(&mut conn).await?;

        let deliveries: Vec<Delivery> = claimed
            .ids
            .iter()
            .map(|entry| {
                let redeliveries = pending
                    .ids
                    .iter()
                    .find(|p| p.id == entry.id)
                    .map(|p| p.times_delivered as u32)
                    .unwrap_or(1);
                Delivery::from_entry(entry, redeliveries)
            })
            .collect();

        if !deliveries.is_empty() {
            info!(
                count = deliveries.len(),
                consumer = %self.consumer_name,
                "Claimed messages from stalled consumers"
            );
            metrics::counter!("qrscan_queue_claimed_total").increment(deliveries.len() as u64);
        }
        Ok(deliveries)
    }

    /// Reset the idle time of entries this consumer is still handling.
    ///
    /// Keeps long-running deliveries out of every consumer's
    /// [`claim_pending`](Self::claim_pending). The delivery counter is
    /// left unchanged. Returns the number of entries still pending.
    pub async fn touch(&self, ids: &[String]) -> QueueResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;

        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(&self.consumer_name)
            .arg(0);
        for id in ids {
            cmd.arg(id);
        }
        cmd.arg("JUSTID");

        let touched: Vec<String> = cmd.query_async(&mut conn).await?;
        Ok(touched.len())
    }

    /// Apply the terminal disposition of a delivery.
    ///
    /// The message leaves the primary queue in the same transaction that
    /// requeues or dead-letters it. Dead-lettering only targets the stream
    /// verified by [`ensure_topology`](Self::ensure_topology).
    pub async fn settle(&self, delivery: Delivery, disposition: Disposition) -> QueueResult<Settlement> {
        let mut conn = self.conn().await?;
        let label = disposition.label();
        let message_id = delivery.id.clone();

        let result = match disposition {
            Disposition::Ack => self.ack(&mut conn, &delivery).await,
            Disposition::Requeue => self.requeue(&mut conn, &delivery).await,
            Disposition::DeadLetter { reason, error } => {
                self.dead_letter(&mut conn, &delivery, reason.as_str(), &error)
                    .await
            }
        };

        match result {
            Ok(settlement) => {
                metrics::counter!("qrscan_queue_settled_total", "disposition" => label)
                    .increment(1);
                debug!(message_id = %message_id, ?settlement, "Settled message");
                Ok(settlement)
            }
            Err(source) => Err(QueueError::SettleFailed { message_id, source }),
        }
    }

    fn remove_from_primary(&self, pipe: &mut redis::Pipeline, id: &str) {
        pipe.xack(&self.config.stream_name, &self.config.consumer_group, &[id])
            .ignore()
            .xdel(&self.config.stream_name, &[id])
            .ignore();
    }

    async fn ack(
        &self,
        conn: &mut MultiplexedConnection,
        delivery: &Delivery,
    ) -> redis::RedisResult<Settlement> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        self.remove_from_primary(&mut pipe, &delivery.id);
        let _: () = pipe.query_async(conn).await?;
        Ok(Settlement::Acked)
    }

    async fn requeue(
        &self,
        conn: &mut MultiplexedConnection,
        delivery: &Delivery,
    ) -> redis::RedisResult<Settlement> {
        let enqueued_at = delivery
            .enqueued_at
            .unwrap_or_else(|| Utc::now().timestamp_millis());

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.config.max_length)
            .arg("*")
            .arg(FIELD_PAYLOAD)
            .arg(&delivery.payload)
            .arg(FIELD_DELIVERY_COUNT)
            .arg(delivery.delivery_count.saturating_add(1))
            .arg(FIELD_ENQUEUED_AT)
            .arg(enqueued_at);
        self.remove_from_primary(&mut pipe, &delivery.id);

        let (new_id,): (String,) = pipe.query_async(conn).await?;
        Ok(Settlement::Requeued { new_id })
    }

    async fn dead_letter(
        &self,
        conn: &mut MultiplexedConnection,
        delivery: &Delivery,
        reason: &str,
        error_text: &str,
    ) -> redis::RedisResult<Settlement> {
        let target = self.dead_letter_target().await;

        let mut pipe = redis::pipe();
        pipe.atomic();

        let Some(target) = target else {
            error!(
                message_id = %delivery.id,
                reason,
                error = %error_text,
                "No dead-letter binding, dropping message"
            );
            self.remove_from_primary(&mut pipe, &delivery.id);
            let _: () = pipe.query_async(conn).await?;
            return Ok(Settlement::Dropped);
        };

        pipe.cmd("XADD")
            .arg(&target)
            .arg("*")
            .arg(FIELD_PAYLOAD)
            .arg(&delivery.payload)
            .arg(FIELD_DELIVERY_COUNT)
            .arg(delivery.delivery_count)
            .arg("reason")
            .arg(reason)
            .arg("error")
            .arg(error_text)
            .arg("original_id")
            .arg(&delivery.id)
            .arg("dead_lettered_at")
            .arg(Utc::now().timestamp_millis());
        self.remove_from_primary(&mut pipe, &delivery.id);

        let (dlq_id,): (String,) = pipe.query_async(conn).await?;
        warn!(
            message_id = %delivery.id,
            dlq_id = %dlq_id,
            reason,
            "Moved message to dead-letter queue"
        );
        Ok(Settlement::DeadLettered { dlq_id })
    }

    /// Messages waiting in the primary queue.
    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        Ok(conn.xlen(&self.config.stream_name).await?)
    }

    /// Messages parked in the dead-letter queue.
    pub async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        Ok(conn.xlen(&self.config.dlq_stream_name).await?)
    }

    /// Oldest `count` dead-lettered messages, without consuming them.
    pub async fn peek_dead_letters(&self, count: usize) -> QueueResult<Vec<DeadLetterEntry>> {
        let mut conn = self.conn().await?;
        let reply: redis::streams::StreamRangeReply = conn
            .xrange_count(&self.config.dlq_stream_name, "-", "+", count)
            .await?;
        Ok(reply.ids.iter().map(DeadLetterEntry::from_entry).collect())
    }
}

/// Pending entries that may be claimed, oldest first, at most `limit`.
fn claimable_ids(
    pending: &[StreamPendingId],
    in_flight: &HashSet<String>,
    limit: usize,
) -> Vec<String> {
    pending
        .iter()
        .filter(|entry| !in_flight.contains(&entry.id))
        .take(limit)
        .map(|entry| entry.id.clone())
        .collect()
}

/// Hide credentials in a connection URL for logging.
fn redacted(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme), Some(at)) if at > scheme => {
            format!("{}://***@{}", &url[..scheme], &url[at + 1..])
        }
        _ => url.to_string(),
    }
}
