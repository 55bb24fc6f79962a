//! Result store seam.

use async_trait::async_trait;

use qrscan_firestore::VideoResultRepository;
use qrscan_models::{Detection, VideoId, VideoRecord, VideoStatus};

use crate::error::WorkerResult;

/// Persistence of video records.
///
/// `update_status`, `append_detections` and `set_detections` are partial
/// atomic updates:
/// they never clobber fields they do not name, and they always stamp
/// `lastUpdated`.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn get(&self, video_id: VideoId) -> WorkerResult<Option<VideoRecord>>;

    /// Insert a new record. Fails with an already-exists error if present.
    async fn insert(&self, record: &VideoRecord) -> WorkerResult<()>;

    async fn replace(&self, record: &VideoRecord) -> WorkerResult<()>;

    async fn update_status(
        &self,
        video_id: VideoId,
        status: VideoStatus,
        error_message: Option<&str>,
        duration: Option<u32>,
    ) -> WorkerResult<()>;

    /// Push detections onto the record without replacing existing ones.
    async fn append_detections(&self, video_id: VideoId, detections: &[Detection])
        -> WorkerResult<()>;

    /// Overwrite the detections list, leaving every other field alone.
    async fn set_detections(&self, video_id: VideoId, detections: &[Detection])
        -> WorkerResult<()>;

    /// Create supporting indexes. Idempotent and never fails; returns how
    /// many were created.
    async fn ensure_indexes(&self) -> usize;
}

#[async_trait]
impl ResultStore for VideoResultRepository {
    async fn get(&self, video_id: VideoId) -> WorkerResult<Option<VideoRecord>> {
        Ok(VideoResultRepository::get(self, video_id).await?)
    }

    async fn insert(&self, record: &VideoRecord) -> WorkerResult<()> {
        Ok(self.create(record).await?)
    }

    async fn replace(&self, record: &VideoRecord) -> WorkerResult<()> {
        Ok(VideoResultRepository::replace(self, record).await?)
    }

    async fn update_status(
        &self,
        video_id: VideoId,
        status: VideoStatus,
        error_message: Option<&str>,
        duration: Option<u32>,
    ) -> WorkerResult<()> {
        VideoResultRepository::update_status(self, video_id, status, error_message, duration)
            .await?;
        Ok(())
    }

    async fn append_detections(
        &self,
        video_id: VideoId,
        detections: &[Detection],
    ) -> WorkerResult<()> {
        Ok(VideoResultRepository::append_detections(self, video_id, detections).await?)
    }

    async fn set_detections(
        &self,
        video_id: VideoId,
        detections: &[Detection],
    ) -> WorkerResult<()> {
        Ok(VideoResultRepository::set_detections(self, video_id, detections).await?)
    }

    async fn ensure_indexes(&self) -> usize {
        VideoResultRepository::ensure_indexes(self).await
    }
}
