//! Delivery executor.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use qrscan_queue::{Delivery, NotificationChannel};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::handler::DeliveryHandler;
use crate::metrics;
use crate::queue::TaskQueue;
use crate::retry::{FailureTracker, RetryConfig};

/// IDs of deliveries this worker is handling and has not settled yet.
#[derive(Clone, Default)]
struct InFlight(Arc<Mutex<HashSet<String>>>);

impl InFlight {
    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// False if the ID is already being handled.
    fn insert(&self, id: &str) -> bool {
        self.lock().insert(id.to_string())
    }

    fn remove(&self, id: &str) {
        self.lock().remove(id);
    }

    fn snapshot(&self) -> HashSet<String> {
        self.lock().clone()
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}

/// Runs handlers on their own tasks and settles their deliveries.
#[derive(Clone)]
struct Dispatcher {
    queue: Arc<dyn TaskQueue>,
    handler: Arc<dyn DeliveryHandler>,
    semaphore: Arc<Semaphore>,
    in_flight: InFlight,
}

impl Dispatcher {
    async fn acquire(&self) -> WorkerResult<OwnedSemaphorePermit> {
        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| WorkerError::processing_failed("job semaphore closed"))
    }

    /// Dispatch every delivery, the first one on `permit`.
    ///
    /// Never cancelled midway by the caller: once read, a delivery must
    /// reach a handler.
    async fn dispatch_all(&self, permit: OwnedSemaphorePermit, deliveries: Vec<Delivery>) {
        let mut permit = Some(permit);
        for delivery in deliveries {
            let slot = match permit.take() {
                Some(slot) => slot,
                None => match self.acquire().await {
                    Ok(slot) => slot,
                    Err(e) => {
                        // Stays pending and is reclaimed later
                        error!(message_id = %delivery.id, "Cannot dispatch delivery: {}", e);
                        continue;
                    }
                },
            };
            self.spawn(slot, delivery);
        }
    }

    /// Handle one delivery on its own task, holding `permit` until settled.
    fn spawn(&self, permit: OwnedSemaphorePermit, delivery: Delivery) {
        if !self.in_flight.insert(&delivery.id) {
            warn!(
                message_id = %delivery.id,
                "Delivery already being handled by this worker, skipping"
            );
            return;
        }
        metrics::set_in_flight(self.in_flight.len());

        let this = self.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let message_id = delivery.id.clone();
            let disposition = this.handler.handle(&delivery).await;
            let label = disposition.label();

            match this.queue.settle(delivery, disposition).await {
                Ok(settlement) => {
                    metrics::record_message(label);
                    debug!(message_id = %message_id, ?settlement, "Delivery settled");
                }
                Err(e) => {
                    // Left pending; crash recovery reclaims it
                    error!(message_id = %message_id, "Failed to settle delivery: {}", e);
                }
            }

            this.in_flight.remove(&message_id);
            metrics::set_in_flight(this.in_flight.len());
        });
    }
}

/// Consumes the video queue and settles every delivery.
pub struct VideoExecutor {
    config: WorkerConfig,
    dispatcher: Dispatcher,
    channel: Option<Arc<NotificationChannel>>,
    shutdown: watch::Sender<bool>,
}

impl VideoExecutor {
    pub fn new(
        config: WorkerConfig,
        queue: Arc<dyn TaskQueue>,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));
        let (shutdown, _) = watch::channel(false);

        Self {
            config,
            dispatcher: Dispatcher {
                queue,
                handler,
                semaphore,
                in_flight: InFlight::default(),
            },
            channel: None,
            shutdown,
        }
    }

    /// Reconnect this channel on every maintenance tick.
    pub fn with_notification_channel(mut self, channel: Arc<NotificationChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Ensure topology, then consume until shutdown and drain.
    pub async fn run(&self) -> WorkerResult<()> {
        let queue = Arc::clone(&self.dispatcher.queue);
        info!(
            consumer = %queue.consumer_name(),
            max_jobs = self.config.max_concurrent_jobs,
            "Starting video executor"
        );

        let report = queue.ensure_topology().await;

        let maintenance = tokio::spawn(Self::maintenance_loop(
            self.config.clone(),
            self.dispatcher.clone(),
            self.channel.clone(),
            report.dead_letter_target().is_some(),
            self.shutdown.subscribe(),
        ));

        let mut shutdown_rx = self.shutdown.subscribe();
        let mut failures = FailureTracker::new(5);
        let backoff = RetryConfig::new("consume").with_base_delay(Duration::from_millis(500));

        loop {
            // Only waiting for a free slot may be interrupted; nothing is read yet
            let permit = tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown_rx) => {
                    info!("Shutdown signal received, stopping consumption");
                    break;
                }
                permit = self.dispatcher.acquire() => permit?,
            };

            let wanted = (self.dispatcher.semaphore.available_permits() + 1)
                .min(queue.read_count().max(1));

            match queue.consume(wanted).await {
                Ok(deliveries) => {
                    failures.record_success();
                    if deliveries.is_empty() {
                        continue;
                    }
                    debug!("Consumed {} deliveries", deliveries.len());
                    self.dispatcher.dispatch_all(permit, deliveries).await;
                }
                Err(e) => {
                    drop(permit);
                    if failures.record_failure() {
                        error!("Error consuming deliveries: {}", e);
                    }
                    tokio::select! {
                        _ = shutdown_requested(&mut shutdown_rx) => {}
                        _ = tokio::time::sleep(backoff.delay_after(failures.failure_count())) => {}
                    }
                }
            }
        }

        let deadline = Instant::now() + self.config.shutdown_timeout;
        if tokio::time::timeout_at(deadline, maintenance).await.is_err() {
            warn!("Maintenance tick still running at shutdown deadline");
        }

        info!("Waiting for in-flight deliveries to settle...");
        if !self.drain_until(deadline).await {
            warn!(
                "Shutdown timeout of {:?} reached with {} deliveries still in flight",
                self.config.shutdown_timeout,
                self.in_flight()
            );
        }

        info!("Video executor stopped");
        Ok(())
    }

    async fn maintenance_loop(
        config: WorkerConfig,
        dispatcher: Dispatcher,
        channel: Option<Arc<NotificationChannel>>,
        mut dead_lettering: bool,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let queue = Arc::clone(&dispatcher.queue);
        let mut interval = tokio::time::interval(config.claim_interval);
        let mut claim_failures = FailureTracker::new(3);

        loop {
            tokio::select! {
                _ = shutdown_requested(&mut shutdown_rx) => break,
                _ = interval.tick() => {}
            }

            if !dead_lettering {
                dead_lettering = queue.ensure_topology().await.dead_letter_target().is_some();
            }

            if let Err(e) = queue.enforce_bounds().await {
                debug!("Queue bound enforcement failed: {}", e);
            }

            if let Some(channel) = &channel {
                channel.ensure_connected().await;
            }

            let in_flight = dispatcher.in_flight.snapshot();
            if !in_flight.is_empty() {
                let ids: Vec<String> = in_flight.iter().cloned().collect();
                if let Err(e) = queue.touch(&ids).await {
                    debug!("Failed to refresh in-flight deliveries: {}", e);
                }
            }

            if *shutdown_rx.borrow() {
                break;
            }
            let free = dispatcher.semaphore.available_permits();
            if free == 0 {
                continue;
            }
            match queue.claim_pending(config.claim_min_idle, free, &in_flight).await {
                Ok(claimed) => {
                    claim_failures.record_success();
                    for delivery in claimed {
                        match dispatcher.acquire().await {
                            Ok(permit) => dispatcher.spawn(permit, delivery),
                            Err(_) => return,
                        }
                    }
                }
                Err(e) => {
                    if claim_failures.record_failure() {
                        warn!("Failed to claim pending deliveries: {}", e);
                    }
                }
            }
        }
    }

    /// Wait until every slot is free again. Returns false on timeout.
    async fn drain_until(&self, deadline: Instant) -> bool {
        let all = self.config.max_concurrent_jobs.max(1) as u32;
        match tokio::time::timeout_at(deadline, self.dispatcher.semaphore.acquire_many(all)).await
        {
            Ok(Ok(permits)) => {
                drop(permits);
                true
            }
            Ok(Err(_)) => true,
            Err(_) => false,
        }
    }

    /// Signal shutdown: stop reading and drain.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Deliveries handed to a handler and not yet settled.
    pub fn in_flight(&self) -> usize {
        self.dispatcher.in_flight.len()
    }
}

/// Resolves once shutdown has been signalled.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}
