//! Best-effort completion notifications.
//!
//! The real-time channel gets a bounded number of attempts with linear
//! backoff. Only when every attempt failed at the channel level is the
//! HTTP fallback tried, once. Nothing here ever fails the caller.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use qrscan_models::{NotificationPayload, VideoRecord};
use qrscan_queue::NotificationChannel;

use crate::config::NotifierConfig;
use crate::error::NotifyError;
use crate::metrics;
use crate::retry::{retry_async, Backoff, RetryConfig, RetryResult};

/// Primary real-time transport.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RealtimeChannel: Send + Sync {
    fn is_connected(&self) -> bool;

    async fn publish(&self, payload: &NotificationPayload) -> Result<(), NotifyError>;
}

/// Secondary transport used after channel-level failures.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FallbackTransport: Send + Sync {
    async fn send(&self, payload: &NotificationPayload) -> Result<(), NotifyError>;
}

#[async_trait]
impl RealtimeChannel for NotificationChannel {
    fn is_connected(&self) -> bool {
        NotificationChannel::is_connected(self)
    }

    async fn publish(&self, payload: &NotificationPayload) -> Result<(), NotifyError> {
        NotificationChannel::publish(self, payload).await?;
        Ok(())
    }
}

/// `PUT {base}/api/videos/{videoId}/status` with the payload as JSON.
#[derive(Clone)]
pub struct HttpFallback {
    client: reqwest::Client,
    base_url: String,
}

impl HttpFallback {
    pub fn new(base_url: impl Into<String>, timeout: std::time::Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self, payload: &NotificationPayload) -> String {
        format!("{}/api/videos/{}/status", self.base_url, payload.video_id)
    }
}

#[async_trait]
impl FallbackTransport for HttpFallback {
    async fn send(&self, payload: &NotificationPayload) -> Result<(), NotifyError> {
        let response = self
            .client
            .put(self.endpoint(payload))
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::FallbackStatus(status.as_u16()));
        }
        Ok(())
    }
}

/// How a notification ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// Published on the real-time channel
    Delivered { attempts: u32 },
    /// Channel was down; nothing attempted
    Skipped,
    /// Channel attempts failed; the fallback accepted it
    FellBack,
    /// Neither transport took it
    Failed,
}

/// Sends completion notifications.
pub struct Notifier {
    channel: Arc<dyn RealtimeChannel>,
    fallback: Option<Arc<dyn FallbackTransport>>,
    retry: RetryConfig,
}

impl Notifier {
    pub fn new(
        config: &NotifierConfig,
        channel: Arc<dyn RealtimeChannel>,
        fallback: Option<Arc<dyn FallbackTransport>>,
    ) -> Self {
        let retry = RetryConfig::new("notify_completion")
            .with_max_attempts(config.max_retries)
            .with_base_delay(config.retry_delay)
            .with_backoff(Backoff::Linear);
        Self {
            channel,
            fallback,
            retry,
        }
    }

    /// Notify listeners that `record` reached a terminal status.
    pub async fn notify_completion(&self, record: &VideoRecord) -> NotifyOutcome {
        let payload = NotificationPayload::from(record);

        if !self.channel.is_connected() {
            info!(
                video_id = %payload.video_id,
                "Notification channel not connected, skipping notification"
            );
            metrics::record_notification("realtime", "skipped");
            return NotifyOutcome::Skipped;
        }

        let attempts = AtomicU32::new(0);
        let published = retry_async(&self.retry, || {
            attempts.fetch_add(1, Ordering::Relaxed);
            self.channel.publish(&payload)
        })
        .await;

        let error = match published {
            RetryResult::Success(()) => {
                let attempts = attempts.load(Ordering::Relaxed);
                debug!(video_id = %payload.video_id, attempts, "Completion notification published");
                metrics::record_notification("realtime", "delivered");
                return NotifyOutcome::Delivered { attempts };
            }
            RetryResult::Failed { error, attempts } => {
                warn!(
                    video_id = %payload.video_id,
                    attempts,
                    "Completion notification failed: {}", error
                );
                metrics::record_notification("realtime", "failed");
                error
            }
        };

        if !error.is_channel_level() {
            return NotifyOutcome::Failed;
        }
        let Some(fallback) = &self.fallback else {
            return NotifyOutcome::Failed;
        };

        match fallback.send(&payload).await {
            Ok(()) => {
                info!(video_id = %payload.video_id, "Completion notification sent via fallback");
                metrics::record_notification("fallback", "delivered");
                NotifyOutcome::FellBack
            }
            Err(e) => {
                warn!(video_id = %payload.video_id, "Fallback notification failed: {}", e);
                metrics::record_notification("fallback", "failed");
                NotifyOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use qrscan_models::{VideoStatus, VideoTask};

    fn config() -> NotifierConfig {
        NotifierConfig {
            max_retries: 3,
            retry_delay: Duration::from_millis(1),
            fallback_url: None,
            timeout: Duration::from_secs(1),
        }
    }

    fn record() -> VideoRecord {
        let mut record = VideoRecord::queued(&VideoTask::new(1, "/videos/a.mp4"));
        record.apply_status(VideoStatus::Completed, None, Some(10));
        record
    }

    #[tokio::test]
    async fn test_disconnected_channel_skips_without_retry() {
        let mut channel = MockRealtimeChannel::new();
        channel.expect_is_connected().times(1).return_const(false);
        channel.expect_publish().never();
        let mut fallback = MockFallbackTransport::new();
        fallback.expect_send().never();

        let notifier = Notifier::new(&config(), Arc::new(channel), Some(Arc::new(fallback)));
        assert_eq!(notifier.notify_completion(&record()).await, NotifyOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_published_on_first_attempt() {
        let mut channel = MockRealtimeChannel::new();
        channel.expect_is_connected().return_const(true);
        channel
            .expect_publish()
            .withf(|p| p.video_id.get() == 1 && p.duration == 10)
            .times(1)
            .returning(|_| Ok(()));

        let notifier = Notifier::new(&config(), Arc::new(channel), None);
        assert_eq!(
            notifier.notify_completion(&record()).await,
            NotifyOutcome::Delivered { attempts: 1 }
        );
    }

    #[tokio::test]
    async fn test_channel_failures_fall_back_once() {
        let mut channel = MockRealtimeChannel::new();
        channel.expect_is_connected().return_const(true);
        channel
            .expect_publish()
            .times(3)
            .returning(|_| Err(NotifyError::Channel("connection reset".into())));
        let mut fallback = MockFallbackTransport::new();
        fallback.expect_send().times(1).returning(|_| Ok(()));

        let notifier = Notifier::new(&config(), Arc::new(channel), Some(Arc::new(fallback)));
        assert_eq!(notifier.notify_completion(&record()).await, NotifyOutcome::FellBack);
    }

    #[tokio::test]
    async fn test_message_level_failure_skips_fallback() {
        let mut channel = MockRealtimeChannel::new();
        channel.expect_is_connected().return_const(true);
        channel
            .expect_publish()
            .times(3)
            .returning(|_| Err(NotifyError::Rejected("bad payload".into())));
        let mut fallback = MockFallbackTransport::new();
        fallback.expect_send().never();

        let notifier = Notifier::new(&config(), Arc::new(channel), Some(Arc::new(fallback)));
        assert_eq!(notifier.notify_completion(&record()).await, NotifyOutcome::Failed);
    }

    #[tokio::test]
    async fn test_fallback_failure_is_absorbed() {
        let mut channel = MockRealtimeChannel::new();
        channel.expect_is_connected().return_const(true);
        channel
            .expect_publish()
            .returning(|_| Err(NotifyError::NotConnected));
        let mut fallback = MockFallbackTransport::new();
        fallback
            .expect_send()
            .times(1)
            .returning(|_| Err(NotifyError::FallbackStatus(503)));

        let notifier = Notifier::new(&config(), Arc::new(channel), Some(Arc::new(fallback)));
        assert_eq!(notifier.notify_completion(&record()).await, NotifyOutcome::Failed);
    }

    #[tokio::test]
    async fn test_recovers_within_retry_budget() {
        let mut channel = MockRealtimeChannel::new();
        channel.expect_is_connected().return_const(true);
        let mut seq = mockall::Sequence::new();
        channel
            .expect_publish()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(NotifyError::Channel("timeout".into())));
        channel
            .expect_publish()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let notifier = Notifier::new(&config(), Arc::new(channel), None);
        assert_eq!(
            notifier.notify_completion(&record()).await,
            NotifyOutcome::Delivered { attempts: 2 }
        );
    }
}
