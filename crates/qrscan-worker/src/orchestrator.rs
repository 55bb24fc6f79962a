//! Per-video processing state machine.
//!
//! `Queued → Resolving → Processing → {Completed | Error}`. Every step
//! that changes the record goes through the result store's partial
//! updates, and the frame workspace is removed whatever the outcome.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::{warn, Instrument};

use qrscan_media::{FrameWorkspace, VideoAnalyzer};
use qrscan_models::{DetectionUpdate, VideoRecord, VideoStatus, VideoTask};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::VideoLogger;
use crate::metrics;
use crate::resolver::PathResolver;
use crate::store::ResultStore;

/// Drives one video task to a terminal status.
pub struct VideoOrchestrator {
    config: WorkerConfig,
    store: Arc<dyn ResultStore>,
    analyzer: Arc<dyn VideoAnalyzer>,
    resolver: PathResolver,
}

impl VideoOrchestrator {
    pub fn new(
        config: WorkerConfig,
        store: Arc<dyn ResultStore>,
        analyzer: Arc<dyn VideoAnalyzer>,
    ) -> Self {
        let resolver = PathResolver::new(config.video_roots.clone());
        Self {
            config,
            store,
            analyzer,
            resolver,
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.config.work_dir
    }

    /// Process a task and return the record as last written.
    ///
    /// Failures after the record exists are persisted as `Error` with
    /// the failure's message (best effort) and then returned.
    pub async fn process(&self, task: &VideoTask) -> WorkerResult<VideoRecord> {
        let logger = VideoLogger::new(task.id(), "video_scan");
        let span = logger.create_span();
        self.process_logged(task, &logger).instrument(span).await
    }

    async fn process_logged(
        &self,
        task: &VideoTask,
        logger: &VideoLogger,
    ) -> WorkerResult<VideoRecord> {
        let started = Instant::now();
        logger.log_start(&task.file_path);

        let mut record = self.load_or_insert(task).await?;

        match self.run(task, &mut record, logger).await {
            Ok(()) => {
                metrics::record_video("completed", started.elapsed().as_secs_f64());
                logger.log_completion(&format!(
                    "{} detection(s), duration {}s",
                    record.detections.len(),
                    record.duration
                ));
                Ok(record)
            }
            Err(e) => {
                let message = e.to_string();
                logger.log_error(&message);
                if let Err(store_err) = self
                    .store
                    .update_status(record.video_id, VideoStatus::Error, Some(&message), None)
                    .await
                {
                    warn!(
                        video_id = %record.video_id,
                        "Failed to persist error status: {}", store_err
                    );
                }
                record.apply_status(VideoStatus::Error, Some(message), None);
                metrics::record_video(e.kind(), started.elapsed().as_secs_f64());
                Err(e)
            }
        }
    }

    /// Existing record, or a fresh `Queued` one.
    async fn load_or_insert(&self, task: &VideoTask) -> WorkerResult<VideoRecord> {
        if let Some(record) = self.store.get(task.id()).await? {
            return Ok(record);
        }

        let record = VideoRecord::queued(task);
        match self.store.insert(&record).await {
            Ok(()) => Ok(record),
            Err(e) if e.is_already_exists() => self
                .store
                .get(task.id())
                .await?
                .ok_or_else(|| WorkerError::persistence("record vanished after concurrent insert")),
            Err(e) => Err(e),
        }
    }

    async fn run(
        &self,
        task: &VideoTask,
        record: &mut VideoRecord,
        logger: &VideoLogger,
    ) -> WorkerResult<()> {
        let id = task.id();

        let path = self.resolve(&task.file_path)?;
        logger.log_progress(&format!("resolved to {}", path.display()));

        self.store
            .update_status(id, VideoStatus::Processing, None, None)
            .await?;
        record.apply_status(VideoStatus::Processing, None, None);

        let info = self
            .analyzer
            .probe(&path)
            .await
            .map_err(WorkerError::metadata_analysis)?;
        let duration = info.whole_seconds();
        logger.log_progress(&format!(
            "{}s {} {}",
            duration,
            info.codec,
            info.resolution()
        ));

        self.store
            .update_status(id, VideoStatus::Processing, None, Some(duration))
            .await?;
        record.apply_status(VideoStatus::Processing, None, Some(duration));

        let fps = self.config.select_fps(duration);
        let workspace = FrameWorkspace::create(&self.config.work_dir, id).await?;
        let scanned = self.analyzer.extract_and_scan(&path, fps, &workspace).await;
        if let Err(e) = workspace.close() {
            logger.log_warning(&format!("frame workspace cleanup failed: {}", e));
        }
        let scan = scanned?;

        if scan.frames_extracted == 0 {
            logger.log_warning("no frames extracted");
        } else {
            logger.log_progress(&format!(
                "{} frame(s) at {} fps, {} with a code",
                scan.frames_extracted, fps, scan.frames_with_code
            ));
        }

        match record.plan_detections(&scan.detections) {
            DetectionUpdate::Unchanged => {}
            DetectionUpdate::Append(new) => {
                self.store.append_detections(id, &new).await?;
                record.merge_detections(&new);
            }
            DetectionUpdate::Replace(all) => {
                // An earlier attempt stored a later timestamp for some content
                self.store.set_detections(id, &all).await?;
                record.set_detections(all);
            }
        }

        self.store
            .update_status(id, VideoStatus::Completed, None, None)
            .await?;
        record.apply_status(VideoStatus::Completed, None, None);
        Ok(())
    }

    fn resolve(&self, file_path: &str) -> WorkerResult<PathBuf> {
        self.resolver
            .resolve(file_path)
            .ok_or_else(|| WorkerError::file_not_found(file_path))
    }
}
