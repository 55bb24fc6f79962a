//! Executor consume, dispatch and drain against an in-memory queue.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Notify;

use qrscan_queue::{
    Delivery, Disposition, EntityState, QueueResult, Settlement, TopologyReport,
};
use qrscan_worker::{DeliveryHandler, TaskQueue, VideoExecutor, WorkerConfig};

fn entry(id: &str) -> Delivery {
    Delivery {
        id: id.to_string(),
        payload: br#"{"VideoId": 1, "FilePath": "/videos/a.mp4"}"#.to_vec(),
        delivery_count: 0,
        enqueued_at: Some(1_700_000_000_000),
    }
}

fn config(max_jobs: usize) -> WorkerConfig {
    WorkerConfig {
        max_concurrent_jobs: max_jobs,
        claim_interval: Duration::from_millis(20),
        shutdown_timeout: Duration::from_secs(5),
        ..WorkerConfig::default()
    }
}

/// Queue that hands out scripted batches and records every call.
///
/// Claims return every unsettled delivery, ignoring the exclusion set, so
/// the executor's own duplicate guard is what keeps work single.
struct FakeQueue {
    batches: Mutex<VecDeque<Vec<Delivery>>>,
    read_delay: Duration,
    reading: Notify,
    pending: Mutex<Vec<Delivery>>,
    settled: Mutex<Vec<(String, Disposition)>>,
    touched: Mutex<Vec<String>>,
    exclusions: Mutex<Vec<HashSet<String>>>,
    topology_calls: AtomicUsize,
    dead_lettering: bool,
}

impl FakeQueue {
    fn new(batches: Vec<Vec<Delivery>>) -> Self {
        Self {
            batches: Mutex::new(batches.into()),
            read_delay: Duration::ZERO,
            reading: Notify::new(),
            pending: Mutex::new(Vec::new()),
            settled: Mutex::new(Vec::new()),
            touched: Mutex::new(Vec::new()),
            exclusions: Mutex::new(Vec::new()),
            topology_calls: AtomicUsize::new(0),
            dead_lettering: true,
        }
    }

    fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    fn without_dead_lettering(mut self) -> Self {
        self.dead_lettering = false;
        self
    }

    fn settled_ids(&self) -> Vec<String> {
        self.settled
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[async_trait]
impl TaskQueue for FakeQueue {
    fn consumer_name(&self) -> &str {
        "worker-test"
    }

    fn read_count(&self) -> usize {
        10
    }

    async fn ensure_topology(&self) -> TopologyReport {
        self.topology_calls.fetch_add(1, Ordering::SeqCst);
        if self.dead_lettering {
            TopologyReport {
                dead_letter_exchange: EntityState::Existing,
                dead_letter_queue: EntityState::Existing,
                binding: EntityState::Existing,
                bound_queue: Some("videos.dlq".to_string()),
                primary_queue: EntityState::Existing,
            }
        } else {
            TopologyReport {
                dead_letter_exchange: EntityState::Existing,
                dead_letter_queue: EntityState::KindConflict {
                    found: "string".to_string(),
                },
                binding: EntityState::Existing,
                bound_queue: None,
                primary_queue: EntityState::Existing,
            }
        }
    }

    async fn consume(&self, _count: usize) -> QueueResult<Vec<Delivery>> {
        let batch = self.batches.lock().unwrap().pop_front();
        match batch {
            Some(batch) => {
                self.reading.notify_one();
                tokio::time::sleep(self.read_delay).await;
                self.pending.lock().unwrap().extend(batch.iter().cloned());
                Ok(batch)
            }
            None => {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(Vec::new())
            }
        }
    }

    async fn claim_pending(
        &self,
        _min_idle: Duration,
        _count: usize,
        in_flight: &HashSet<String>,
    ) -> QueueResult<Vec<Delivery>> {
        self.exclusions.lock().unwrap().push(in_flight.clone());
        Ok(self.pending.lock().unwrap().clone())
    }

    async fn touch(&self, ids: &[String]) -> QueueResult<usize> {
        self.touched.lock().unwrap().extend(ids.iter().cloned());
        Ok(ids.len())
    }

    async fn settle(
        &self,
        delivery: Delivery,
        disposition: Disposition,
    ) -> QueueResult<Settlement> {
        self.pending.lock().unwrap().retain(|d| d.id != delivery.id);
        self.settled.lock().unwrap().push((delivery.id, disposition));
        Ok(Settlement::Acked)
    }

    async fn enforce_bounds(&self) -> QueueResult<u64> {
        Ok(0)
    }
}

/// Handler that acks after a fixed delay and counts calls per delivery.
struct SlowHandler {
    delay: Duration,
    started: Notify,
    calls: Mutex<HashMap<String, usize>>,
}

impl SlowHandler {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            started: Notify::new(),
            calls: Mutex::new(HashMap::new()),
        }
    }

    fn calls(&self, id: &str) -> usize {
        self.calls.lock().unwrap().get(id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl DeliveryHandler for SlowHandler {
    async fn handle(&self, delivery: &Delivery) -> Disposition {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(delivery.id.clone())
            .or_insert(0) += 1;
        self.started.notify_one();
        tokio::time::sleep(self.delay).await;
        Disposition::Ack
    }
}

fn start(
    config: WorkerConfig,
    queue: &Arc<FakeQueue>,
    handler: &Arc<SlowHandler>,
) -> (Arc<VideoExecutor>, tokio::task::JoinHandle<()>) {
    let executor = Arc::new(VideoExecutor::new(
        config,
        Arc::clone(queue) as Arc<dyn TaskQueue>,
        Arc::clone(handler) as Arc<dyn DeliveryHandler>,
    ));
    let runner = Arc::clone(&executor);
    let run = tokio::spawn(async move {
        runner.run().await.unwrap();
    });
    (executor, run)
}

#[tokio::test]
async fn test_shutdown_waits_for_in_flight_delivery() {
    let queue = Arc::new(FakeQueue::new(vec![vec![entry("1-0")]]));
    let handler = Arc::new(SlowHandler::new(Duration::from_millis(200)));
    let (executor, run) = start(config(2), &queue, &handler);

    handler.started.notified().await;
    executor.shutdown();
    run.await.unwrap();

    assert_eq!(queue.settled_ids(), vec!["1-0".to_string()]);
    assert_eq!(handler.calls("1-0"), 1);
    assert_eq!(executor.in_flight(), 0);
}

#[tokio::test]
async fn test_batch_read_during_shutdown_is_fully_dispatched() {
    let queue = Arc::new(
        FakeQueue::new(vec![vec![entry("1-0"), entry("2-0"), entry("3-0")]])
            .with_read_delay(Duration::from_millis(100)),
    );
    let handler = Arc::new(SlowHandler::new(Duration::from_millis(10)));
    let (executor, run) = start(config(4), &queue, &handler);

    queue.reading.notified().await;
    executor.shutdown();
    run.await.unwrap();

    let mut settled = queue.settled_ids();
    settled.sort();
    assert_eq!(settled, vec!["1-0", "2-0", "3-0"]);
    for id in ["1-0", "2-0", "3-0"] {
        assert_eq!(handler.calls(id), 1, "{id} handled once");
    }
}

#[tokio::test]
async fn test_claim_never_redispatches_local_delivery() {
    let queue = Arc::new(FakeQueue::new(vec![vec![entry("1-0")]]));
    let handler = Arc::new(SlowHandler::new(Duration::from_millis(300)));
    let (executor, run) = start(config(2), &queue, &handler);

    handler.started.notified().await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    executor.shutdown();
    run.await.unwrap();

    assert_eq!(handler.calls("1-0"), 1);
    assert_eq!(queue.settled_ids(), vec!["1-0".to_string()]);
    assert!(queue
        .exclusions
        .lock()
        .unwrap()
        .iter()
        .any(|set| set.contains("1-0")));
    assert!(queue.touched.lock().unwrap().iter().any(|id| id == "1-0"));
}

#[tokio::test]
async fn test_topology_retried_until_dead_lettering_available() {
    let broken = Arc::new(FakeQueue::new(Vec::new()).without_dead_lettering());
    let healthy = Arc::new(FakeQueue::new(Vec::new()));
    let handler = Arc::new(SlowHandler::new(Duration::ZERO));

    let (broken_exec, broken_run) = start(config(1), &broken, &handler);
    let (healthy_exec, healthy_run) = start(config(1), &healthy, &handler);
    tokio::time::sleep(Duration::from_millis(120)).await;
    broken_exec.shutdown();
    healthy_exec.shutdown();
    broken_run.await.unwrap();
    healthy_run.await.unwrap();

    assert!(broken.topology_calls.load(Ordering::SeqCst) >= 2);
    assert_eq!(healthy.topology_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_shutdown_gives_up_at_deadline() {
    let queue = Arc::new(FakeQueue::new(vec![vec![entry("1-0")]]));
    let handler = Arc::new(SlowHandler::new(Duration::from_secs(30)));
    let config = WorkerConfig {
        shutdown_timeout: Duration::from_millis(100),
        ..config(1)
    };
    let (executor, run) = start(config, &queue, &handler);

    handler.started.notified().await;
    let began = Instant::now();
    executor.shutdown();
    run.await.unwrap();

    assert!(began.elapsed() < Duration::from_secs(5));
    assert!(queue.settled_ids().is_empty());
    assert_eq!(executor.in_flight(), 1);
}
