//! Per-delivery decision: decode, process, then ack, requeue or dead-letter.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use qrscan_models::VideoTask;
use qrscan_queue::{DeadLetterReason, Delivery, Disposition};

use crate::notifier::Notifier;
use crate::orchestrator::VideoOrchestrator;
use crate::retry::RetryPolicy;

/// Decides the disposition of one delivery.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn handle(&self, delivery: &Delivery) -> Disposition;
}

/// Turns one delivery into exactly one disposition.
pub struct MessageHandler {
    orchestrator: Arc<VideoOrchestrator>,
    notifier: Arc<Notifier>,
    policy: RetryPolicy,
}

impl MessageHandler {
    pub fn new(
        orchestrator: Arc<VideoOrchestrator>,
        notifier: Arc<Notifier>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            orchestrator,
            notifier,
            policy,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Decide the disposition of `delivery`.
    ///
    /// Malformed bodies are dead-lettered without touching the store.
    /// On success the completion notification is sent from a detached
    /// task, so it can never change the outcome.
    pub async fn handle(&self, delivery: &Delivery) -> Disposition {
        let task = match VideoTask::parse(&delivery.payload) {
            Ok(task) => task,
            Err(e) => {
                warn!(
                    message_id = %delivery.id,
                    payload = %delivery.payload_lossy(),
                    "Rejecting malformed message: {}", e
                );
                return Disposition::dead_letter(DeadLetterReason::Malformed, e.to_string());
            }
        };

        info!(
            message_id = %delivery.id,
            video_id = %task.id(),
            delivery_count = delivery.delivery_count,
            "Handling video task"
        );

        match self.orchestrator.process(&task).await {
            Ok(record) => {
                let notifier = Arc::clone(&self.notifier);
                tokio::spawn(async move {
                    notifier.notify_completion(&record).await;
                });
                Disposition::Ack
            }
            Err(e) => {
                warn!(
                    message_id = %delivery.id,
                    video_id = %task.id(),
                    delivery_count = delivery.delivery_count,
                    "Video task failed: {}", e
                );
                self.policy.on_failure(delivery.delivery_count, &e.to_string())
            }
        }
    }
}

#[async_trait]
impl DeliveryHandler for MessageHandler {
    async fn handle(&self, delivery: &Delivery) -> Disposition {
        MessageHandler::handle(self, delivery).await
    }
}
