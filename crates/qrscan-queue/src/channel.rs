//! Real-time completion notifications via Redis Pub/Sub.

use std::sync::atomic::{AtomicBool, Ordering};

use redis::aio::MultiplexedConnection;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use qrscan_models::{NotificationPayload, VideoId};

use crate::error::{is_connection_level, QueueError, QueueResult};

/// Default channel prefix.
pub const DEFAULT_CHANNEL_PREFIX: &str = "qrscan:notifications";

/// Publisher for completion notifications.
///
/// Every payload goes to the shared channel and to a per-video channel
/// (`<prefix>:<videoId>`). The channel must be [`connect`](Self::connect)ed
/// before publishing; a connection-level failure marks it disconnected
/// until [`ensure_connected`](Self::ensure_connected) restores it.
pub struct NotificationChannel {
    client: redis::Client,
    prefix: String,
    conn: RwLock<Option<MultiplexedConnection>>,
    connected: AtomicBool,
}

impl NotificationChannel {
    pub fn new(redis_url: &str) -> QueueResult<Self> {
        Self::with_prefix(redis_url, DEFAULT_CHANNEL_PREFIX)
    }

    pub fn with_prefix(redis_url: &str, prefix: impl Into<String>) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            prefix: prefix.into(),
            conn: RwLock::new(None),
            connected: AtomicBool::new(false),
        })
    }

    pub fn channel_name(&self) -> &str {
        &self.prefix
    }

    /// Per-video channel name.
    pub fn video_channel(&self, video_id: VideoId) -> String {
        format!("{}:{}", self.prefix, video_id)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Open the publishing connection.
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

        *self.conn.write().await = Some(conn);
        self.connected.store(true, Ordering::SeqCst);
        info!(channel = %self.prefix, "Notification channel connected");
        Ok(())
    }

    /// Reconnect if the channel is down. Returns whether it is connected.
    pub async fn ensure_connected(&self) -> bool {
        if self.is_connected() {
            return true;
        }
        match self.connect().await {
            Ok(()) => true,
            Err(e) => {
                debug!("Notification channel still unavailable: {}", e);
                false
            }
        }
    }

    /// Publish a completion notification.
    ///
    /// Returns the number of subscribers that received it on the shared
    /// channel.
    pub async fn publish(&self, payload: &NotificationPayload) -> QueueResult<u64> {
        let mut conn = match self.conn.read().await.clone() {
            Some(conn) if self.is_connected() => conn,
            _ => {
                return Err(QueueError::NotConnected(
                    "notification channel is not connected".to_string(),
                ))
            }
        };

        let body = serde_json::to_string(payload)?;
        let video_channel = self.video_channel(payload.video_id);

        let result: redis::RedisResult<(u64, u64)> = redis::pipe()
            .publish(&self.prefix, &body)
            .publish(&video_channel, &body)
            .query_async(&mut conn)
            .await;

        match result {
            Ok((receivers, _)) => {
                debug!(
                    video_id = %payload.video_id,
                    receivers,
                    "Published completion notification"
                );
                Ok(receivers)
            }
            Err(e) => {
                if is_connection_level(&e) {
                    warn!("Notification channel lost: {}", e);
                    self.connected.store(false, Ordering::SeqCst);
                    *self.conn.write().await = None;
                }
                Err(QueueError::Redis(e))
            }
        }
    }
}
