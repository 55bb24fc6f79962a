//! Frame extraction at a fixed sampling rate.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

const FRAME_PREFIX: &str = "frame_";
const FRAME_EXTENSION: &str = "png";

/// One extracted frame on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameFile {
    /// Zero-based position in the sampled sequence
    pub index: u64,
    pub path: PathBuf,
}

/// Seconds into the video of the frame at `index`, sampled at `fps`.
pub fn frame_timestamp(index: u64, fps: f64) -> u64 {
    if fps <= 0.0 || !fps.is_finite() {
        return 0;
    }
    (index as f64 / fps).floor() as u64
}

/// Extract frames from `input` into `dir` at `fps` frames per second.
///
/// Returns the frames in sequence order. A video too short to yield a
/// frame returns an empty list.
pub async fn extract_frames(
    input: &Path,
    fps: f64,
    dir: &Path,
    timeout: Duration,
) -> MediaResult<Vec<FrameFile>> {
    if !(fps > 0.0 && fps.is_finite()) {
        return Err(MediaError::internal(format!("invalid sampling rate: {}", fps)));
    }
    if !input.exists() {
        return Err(MediaError::FileNotFound(input.to_path_buf()));
    }

    let pattern = dir.join(format!("{}%06d.{}", FRAME_PREFIX, FRAME_EXTENSION));
    let cmd = FfmpegCommand::new(input, &pattern).sample_rate(fps);

    debug!(input = %input.display(), fps, "Extracting frames");
    FfmpegRunner::new().with_timeout(timeout).run(&cmd).await?;

    let frames = collect_frames(dir).await?;
    info!(input = %input.display(), fps, frames = frames.len(), "Frames extracted");
    Ok(frames)
}

/// List `frame_NNNNNN.png` files in `dir`, ordered by sequence number.
pub(crate) async fn collect_frames(dir: &Path) -> MediaResult<Vec<FrameFile>> {
    let mut frames = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if let Some(number) = frame_number(&path) {
            // ffmpeg numbers output from 1
            if number == 0 {
                continue;
            }
            frames.push(FrameFile {
                index: number - 1,
                path,
            });
        }
    }

    frames.sort_by_key(|f| f.index);
    Ok(frames)
}

fn frame_number(path: &Path) -> Option<u64> {
    if path.extension()?.to_str()? != FRAME_EXTENSION {
        return None;
    }
    path.file_stem()?
        .to_str()?
        .strip_prefix(FRAME_PREFIX)?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_frame_timestamp() {
        assert_eq!(frame_timestamp(0, 1.0), 0);
        assert_eq!(frame_timestamp(7, 1.0), 7);
        assert_eq!(frame_timestamp(3, 0.5), 6);
        assert_eq!(frame_timestamp(5, 2.0), 2);
        assert_eq!(frame_timestamp(4, 0.0), 0);
    }

    #[test]
    fn test_frame_number() {
        assert_eq!(frame_number(Path::new("/x/frame_000012.png")), Some(12));
        assert_eq!(frame_number(Path::new("/x/frame_000012.jpg")), None);
        assert_eq!(frame_number(Path::new("/x/thumb_000012.png")), None);
        assert_eq!(frame_number(Path::new("/x/frame_abc.png")), None);
    }

    #[tokio::test]
    async fn test_collect_frames_orders_by_sequence() {
        let dir = TempDir::new().unwrap();
        for name in ["frame_000010.png", "frame_000002.png", "frame_000001.png", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }

        let frames = collect_frames(dir.path()).await.unwrap();
        let indices: Vec<_> = frames.iter().map(|f| f.index).collect();
        assert_eq!(indices, vec![0, 1, 9]);
        assert!(frames[2].path.ends_with("frame_000010.png"));
    }

    #[tokio::test]
    async fn test_collect_frames_empty_dir() {
        let dir = TempDir::new().unwrap();
        assert!(collect_frames(dir.path()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_extract_frames_rejects_bad_rate() {
        let dir = TempDir::new().unwrap();
        let result = extract_frames(Path::new("a.mp4"), 0.0, dir.path(), Duration::from_secs(1)).await;
        assert!(matches!(result, Err(MediaError::Internal(_))));
    }

    #[tokio::test]
    async fn test_extract_frames_missing_input() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.mp4");
        let result = extract_frames(&missing, 1.0, dir.path(), Duration::from_secs(1)).await;
        assert!(matches!(result, Err(MediaError::FileNotFound(_))));
    }
}
