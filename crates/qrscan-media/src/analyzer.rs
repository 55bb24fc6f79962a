//! Video analysis seam used by the worker.

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

use crate::error::MediaResult;
use crate::probe::{probe_video, VideoInfo};
use crate::scan::{FramePipeline, FrameScan, FrameWorkspace};

/// Metadata probing and frame scanning of a local video file.
#[async_trait]
pub trait VideoAnalyzer: Send + Sync {
    /// Read container metadata.
    async fn probe(&self, path: &Path) -> MediaResult<VideoInfo>;

    /// Sample frames at `fps` into `workspace` and decode them.
    async fn extract_and_scan(
        &self,
        path: &Path,
        fps: f64,
        workspace: &FrameWorkspace,
    ) -> MediaResult<FrameScan>;
}

/// [`VideoAnalyzer`] backed by the ffprobe and ffmpeg executables.
#[derive(Clone)]
pub struct FfmpegAnalyzer {
    pipeline: FramePipeline,
    probe_timeout: Duration,
}

impl FfmpegAnalyzer {
    pub fn new(pipeline: FramePipeline, probe_timeout: Duration) -> Self {
        Self {
            pipeline,
            probe_timeout,
        }
    }
}

#[async_trait]
impl VideoAnalyzer for FfmpegAnalyzer {
    async fn probe(&self, path: &Path) -> MediaResult<VideoInfo> {
        probe_video(path, self.probe_timeout).await
    }

    async fn extract_and_scan(
        &self,
        path: &Path,
        fps: f64,
        workspace: &FrameWorkspace,
    ) -> MediaResult<FrameScan> {
        self.pipeline.extract_and_scan(path, fps, workspace).await
    }
}
