//! Structured video logging utilities.

use tracing::{error, info, warn, Span};

use qrscan_models::VideoId;

/// Logs the lifecycle of one video with a fixed `video_id` and operation.
#[derive(Debug, Clone)]
pub struct VideoLogger {
    video_id: VideoId,
    operation: String,
}

impl VideoLogger {
    pub fn new(video_id: VideoId, operation: &str) -> Self {
        Self {
            video_id,
            operation: operation.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            video_id = %self.video_id,
            operation = %self.operation,
            "Video started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            video_id = %self.video_id,
            operation = %self.operation,
            "Video progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            video_id = %self.video_id,
            operation = %self.operation,
            "Video warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            video_id = %self.video_id,
            operation = %self.operation,
            "Video error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            video_id = %self.video_id,
            operation = %self.operation,
            "Video completed: {}", message
        );
    }

    pub fn video_id(&self) -> VideoId {
        self.video_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Span carrying the video's identity, for instrumenting its futures.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "video",
            video_id = %self.video_id,
            operation = %self.operation
        )
    }
}
