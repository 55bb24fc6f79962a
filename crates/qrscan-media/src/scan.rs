//! Bounded-concurrency frame scanning.
//!
//! Frames are decoded on the blocking pool, at most `max_decoders` at a
//! time. Each decode reports back over an mpsc channel and a single
//! collector deduplicates the results, so the outcome never depends on
//! completion order.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

use qrscan_models::{dedup_detections, Detection, VideoId};

use crate::decoder::CodeDecoder;
use crate::error::{MediaError, MediaResult};
use crate::frames::{extract_frames, frame_timestamp, FrameFile};

/// Private scratch directory for one video's frames.
///
/// Unique per call, so concurrent attempts on the same video never share
/// frame files. Removed on [`close`](Self::close) or when dropped.
#[derive(Debug)]
pub struct FrameWorkspace {
    dir: TempDir,
}

impl FrameWorkspace {
    /// Create a fresh workspace under `root`.
    pub async fn create(root: &Path, video_id: VideoId) -> MediaResult<Self> {
        tokio::fs::create_dir_all(root).await?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("video-{}-", video_id))
            .tempdir_in(root)?;
        debug!(video_id = %video_id, dir = %dir.path().display(), "Created frame workspace");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Remove the workspace and everything in it.
    pub fn close(self) -> MediaResult<()> {
        self.dir.close()?;
        Ok(())
    }
}

/// Outcome of scanning one video's frames.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameScan {
    /// Frames ffmpeg produced
    pub frames_extracted: usize,
    /// Frames that held a decodable symbol
    pub frames_with_code: usize,
    /// Frames skipped because decoding failed
    pub decode_failures: usize,
    /// Distinct contents, earliest timestamp first
    pub detections: Vec<Detection>,
}

struct FrameOutcome {
    index: u64,
    path: PathBuf,
    result: Result<Option<String>, String>,
}

/// Extracts frames and decodes them with bounded parallelism.
#[derive(Clone)]
pub struct FramePipeline {
    decoder: Arc<dyn CodeDecoder>,
    max_decoders: usize,
    ffmpeg_timeout: Duration,
}

impl FramePipeline {
    pub fn new(decoder: Arc<dyn CodeDecoder>, max_decoders: usize, ffmpeg_timeout: Duration) -> Self {
        Self {
            decoder,
            max_decoders: max_decoders.max(1),
            ffmpeg_timeout,
        }
    }

    /// Decoder parallelism for this host: available cores, capped at `cap`.
    pub fn decoder_limit(cap: usize) -> usize {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        cores.min(cap).max(1)
    }

    pub fn max_decoders(&self) -> usize {
        self.max_decoders
    }

    /// Sample `input` at `fps` into `workspace` and scan every frame.
    pub async fn extract_and_scan(
        &self,
        input: &Path,
        fps: f64,
        workspace: &FrameWorkspace,
    ) -> MediaResult<FrameScan> {
        let frames = extract_frames(input, fps, workspace.path(), self.ffmpeg_timeout).await?;
        self.scan_frames(frames, fps).await
    }

    /// Decode already-extracted frames.
    ///
    /// A frame that fails to decode, or whose decoder panics, is logged
    /// and skipped. It never fails the scan.
    pub async fn scan_frames(&self, frames: Vec<FrameFile>, fps: f64) -> MediaResult<FrameScan> {
        let total = frames.len();
        if total == 0 {
            info!("No frames to scan");
            return Ok(FrameScan::default());
        }

        let semaphore = Arc::new(Semaphore::new(self.max_decoders));
        // Room for every outcome, so senders never wait on the collector
        let (tx, mut rx) = mpsc::channel::<FrameOutcome>(total);

        for frame in frames {
            let semaphore = Arc::clone(&semaphore);
            let decoder = Arc::clone(&self.decoder);
            let tx = tx.clone();

            tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };

                let path = frame.path.clone();
                let result = tokio::task::spawn_blocking(move || decoder.decode(&path))
                    .await
                    .map_err(|e| format!("decoder panicked: {}", e))
                    .and_then(|decoded| decoded.map_err(|e| e.to_string()));

                let _ = tx
                    .send(FrameOutcome {
                        index: frame.index,
                        path: frame.path,
                        result,
                    })
                    .await;
            });
        }
        drop(tx);

        let mut found = Vec::new();
        let mut received = 0usize;
        let mut decode_failures = 0usize;

        while let Some(outcome) = rx.recv().await {
            received += 1;
            match outcome.result {
                Ok(Some(content)) => {
                    found.push(Detection::new(content, frame_timestamp(outcome.index, fps)));
                }
                Ok(None) => {}
                Err(message) => {
                    decode_failures += 1;
                    warn!(
                        frame = %outcome.path.display(),
                        error = %message,
                        "Frame decode failed, skipping"
                    );
                }
            }
        }

        if received != total {
            return Err(MediaError::internal(format!(
                "frame scan lost results: expected {}, got {}",
                total, received
            )));
        }

        let frames_with_code = found.len();
        let detections = dedup_detections(found);

        metrics::counter!("qrscan_frames_scanned_total").increment(total as u64);
        metrics::counter!("qrscan_frame_decode_failures_total").increment(decode_failures as u64);

        info!(
            frames = total,
            frames_with_code,
            decode_failures,
            unique = detections.len(),
            "Frame scan complete"
        );

        Ok(FrameScan {
            frames_extracted: total,
            frames_with_code,
            decode_failures,
            detections,
        })
    }
}
