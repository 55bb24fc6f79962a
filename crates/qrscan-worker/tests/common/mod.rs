//! In-memory collaborators for worker integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use qrscan_firestore::FirestoreError;
use qrscan_media::{
    CodeDecoder, FrameFile, FramePipeline, FrameScan, FrameWorkspace, MediaError, MediaResult,
    VideoAnalyzer, VideoInfo,
};
use qrscan_models::{Detection, NotificationPayload, VideoId, VideoRecord, VideoStatus};
use qrscan_queue::Delivery;
use qrscan_worker::{
    MessageHandler, NotifierConfig, NotifyError, Notifier, RealtimeChannel, ResultStore,
    RetryPolicy, VideoOrchestrator, WorkerConfig, WorkerError, WorkerResult,
};

/// One call made against [`FakeStore`].
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    Get(i64),
    Insert(i64),
    Replace(i64),
    UpdateStatus {
        id: i64,
        status: VideoStatus,
        error_message: Option<String>,
        duration: Option<u32>,
    },
    Append {
        id: i64,
        contents: Vec<String>,
    },
    SetDetections {
        id: i64,
        detections: Vec<Detection>,
    },
    EnsureIndexes,
}

/// Result store keeping records in memory and logging every call.
#[derive(Default)]
pub struct FakeStore {
    records: Mutex<HashMap<i64, VideoRecord>>,
    calls: Mutex<Vec<StoreCall>>,
    indexes: Mutex<HashSet<&'static str>>,
    fail_updates: AtomicBool,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record(&self, id: i64) -> Option<VideoRecord> {
        self.records.lock().unwrap().get(&id).cloned()
    }

    pub fn seed(&self, record: VideoRecord) {
        self.records
            .lock()
            .unwrap()
            .insert(record.video_id.get(), record);
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Statuses written through `update_status`, in order.
    pub fn status_writes(&self) -> Vec<(VideoStatus, Option<u32>)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                StoreCall::UpdateStatus {
                    status, duration, ..
                } => Some((status, duration)),
                _ => None,
            })
            .collect()
    }

    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    fn log(&self, call: StoreCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ResultStore for FakeStore {
    async fn get(&self, video_id: VideoId) -> WorkerResult<Option<VideoRecord>> {
        self.log(StoreCall::Get(video_id.get()));
        Ok(self.record(video_id.get()))
    }

    async fn insert(&self, record: &VideoRecord) -> WorkerResult<()> {
        self.log(StoreCall::Insert(record.video_id.get()));
        let mut records = self.records.lock().unwrap();
        if records.contains_key(&record.video_id.get()) {
            return Err(FirestoreError::AlreadyExists(record.video_id.as_key()).into());
        }
        records.insert(record.video_id.get(), record.clone());
        Ok(())
    }

    async fn replace(&self, record: &VideoRecord) -> WorkerResult<()> {
        self.log(StoreCall::Replace(record.video_id.get()));
        self.seed(record.clone());
        Ok(())
    }

    async fn update_status(
        &self,
        video_id: VideoId,
        status: VideoStatus,
        error_message: Option<&str>,
        duration: Option<u32>,
    ) -> WorkerResult<()> {
        self.log(StoreCall::UpdateStatus {
            id: video_id.get(),
            status,
            error_message: error_message.map(str::to_string),
            duration,
        });
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(WorkerError::persistence("datastore unavailable"));
        }
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(&video_id.get())
            .ok_or_else(|| WorkerError::persistence("no such record"))?;
        record.apply_status(status, error_message.map(str::to_string), duration);
        Ok(())
    }

    async fn append_detections(
        &self,
        video_id: VideoId,
        detections: &[Detection],
    ) -> WorkerResult<()> {
        self.log(StoreCall::Append {
            id: video_id.get(),
            contents: detections.iter().map(|d| d.content.clone()).collect(),
        });
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(&video_id.get())
            .ok_or_else(|| WorkerError::persistence("no such record"))?;
        record.detections.extend_from_slice(detections);
        Ok(())
    }

    async fn set_detections(
        &self,
        video_id: VideoId,
        detections: &[Detection],
    ) -> WorkerResult<()> {
        self.log(StoreCall::SetDetections {
            id: video_id.get(),
            detections: detections.to_vec(),
        });
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(&video_id.get())
            .ok_or_else(|| WorkerError::persistence("no such record"))?;
        record.detections = detections.to_vec();
        Ok(())
    }

    async fn ensure_indexes(&self) -> usize {
        self.log(StoreCall::EnsureIndexes);
        let mut indexes = self.indexes.lock().unwrap();
        ["status_last_updated", "status_created_at"]
            .into_iter()
            .filter(|name| indexes.insert(*name))
            .count()
    }
}

/// Decoder reading a frame's symbol from the frame file's text.
///
/// Empty file: no symbol. `!error`: decode failure.
pub struct TextDecoder;

impl CodeDecoder for TextDecoder {
    fn decode(&self, frame: &Path) -> MediaResult<Option<String>> {
        let text = std::fs::read_to_string(frame)?;
        match text.as_str() {
            "" => Ok(None),
            "!error" => Err(MediaError::decode_failed(frame, "corrupt frame")),
            content => Ok(Some(content.to_string())),
        }
    }
}

/// Analyzer simulating ffprobe and ffmpeg.
///
/// Frames are written into the workspace with the symbol visible at
/// their timestamp, then scanned by the real frame pipeline.
pub struct FakeAnalyzer {
    duration: Option<f64>,
    /// Symbol shown at a given second
    symbols: HashMap<u64, String>,
    pipeline: FramePipeline,
    last_fps: Mutex<Option<f64>>,
    last_workspace: Mutex<Option<PathBuf>>,
}

impl FakeAnalyzer {
    pub fn new(duration: Option<f64>, symbols: &[(u64, &str)]) -> Arc<Self> {
        Arc::new(Self {
            duration,
            symbols: symbols
                .iter()
                .map(|(second, content)| (*second, content.to_string()))
                .collect(),
            pipeline: FramePipeline::new(Arc::new(TextDecoder), 2, Duration::from_secs(5)),
            last_fps: Mutex::new(None),
            last_workspace: Mutex::new(None),
        })
    }

    pub fn last_fps(&self) -> Option<f64> {
        *self.last_fps.lock().unwrap()
    }

    pub fn last_workspace(&self) -> Option<PathBuf> {
        self.last_workspace.lock().unwrap().clone()
    }
}

#[async_trait]
impl VideoAnalyzer for FakeAnalyzer {
    async fn probe(&self, _path: &Path) -> MediaResult<VideoInfo> {
        let duration = self.duration.ok_or_else(|| MediaError::InvalidVideo(
            "no duration in container".to_string(),
        ))?;
        Ok(VideoInfo {
            duration,
            width: 1280,
            height: 720,
            fps: 30.0,
            codec: "h264".to_string(),
        })
    }

    async fn extract_and_scan(
        &self,
        _path: &Path,
        fps: f64,
        workspace: &FrameWorkspace,
    ) -> MediaResult<FrameScan> {
        *self.last_fps.lock().unwrap() = Some(fps);
        *self.last_workspace.lock().unwrap() = Some(workspace.path().to_path_buf());

        let count = (self.duration.unwrap_or(0.0) * fps).floor() as u64;
        let mut frames = Vec::new();
        for index in 0..count {
            let second = qrscan_media::frame_timestamp(index, fps);
            let path = workspace.path().join(format!("frame_{:06}.png", index + 1));
            let content = self.symbols.get(&second).cloned().unwrap_or_default();
            std::fs::write(&path, content)?;
            frames.push(FrameFile { index, path });
        }
        self.pipeline.scan_frames(frames, fps).await
    }
}

/// Real-time channel recording what it published.
#[derive(Default)]
pub struct RecordingChannel {
    connected: AtomicBool,
    published: Mutex<Vec<NotificationPayload>>,
}

impl RecordingChannel {
    pub fn new(connected: bool) -> Arc<Self> {
        let channel = Self::default();
        channel.connected.store(connected, Ordering::SeqCst);
        Arc::new(channel)
    }

    pub fn published(&self) -> Vec<NotificationPayload> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl RealtimeChannel for RecordingChannel {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn publish(&self, payload: &NotificationPayload) -> Result<(), NotifyError> {
        if !self.is_connected() {
            return Err(NotifyError::NotConnected);
        }
        self.published.lock().unwrap().push(payload.clone());
        Ok(())
    }
}

/// Everything a handler test needs, wired together.
pub struct Harness {
    pub root: TempDir,
    pub store: Arc<FakeStore>,
    pub analyzer: Arc<FakeAnalyzer>,
    pub channel: Arc<RecordingChannel>,
    pub handler: MessageHandler,
    pub config: WorkerConfig,
}

impl Harness {
    pub fn new(analyzer: Arc<FakeAnalyzer>, connected: bool) -> Self {
        let root = TempDir::new().unwrap();
        let shared = root.path().join("shared");
        std::fs::create_dir_all(shared.join("videos")).unwrap();

        let config = WorkerConfig {
            work_dir: root.path().join("work"),
            video_roots: vec![shared],
            ..WorkerConfig::default()
        };

        let store = FakeStore::new();
        let channel = RecordingChannel::new(connected);
        let notifier_config = NotifierConfig {
            retry_delay: Duration::from_millis(1),
            ..NotifierConfig::default()
        };
        let notifier = Arc::new(Notifier::new(&notifier_config, channel.clone(), None));
        let orchestrator = Arc::new(VideoOrchestrator::new(
            config.clone(),
            store.clone(),
            analyzer.clone(),
        ));
        let handler = MessageHandler::new(orchestrator, notifier, RetryPolicy::new(3));

        Self {
            root,
            store,
            analyzer,
            channel,
            handler,
            config,
        }
    }

    /// Place a video under the shared root at `relative`.
    pub fn add_video(&self, relative: &str) {
        let path = self.root.path().join("shared").join(relative.trim_start_matches('/'));
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, b"video").unwrap();
    }

    /// Frame workspaces left behind under the work dir.
    pub fn leftover_workspaces(&self) -> usize {
        match std::fs::read_dir(&self.config.work_dir) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }

    /// Wait for the detached notification task to publish.
    pub async fn wait_for_notifications(&self, count: usize) -> Vec<NotificationPayload> {
        for _ in 0..100 {
            let published = self.channel.published();
            if published.len() >= count {
                return published;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.channel.published()
    }
}

pub fn delivery(payload: &str, delivery_count: u32) -> Delivery {
    Delivery {
        id: "1700000000000-0".to_string(),
        payload: payload.as_bytes().to_vec(),
        delivery_count,
        enqueued_at: Some(1_700_000_000_000),
    }
}
