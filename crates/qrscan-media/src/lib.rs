//! FFmpeg CLI wrapper and QR frame scanning.
//!
//! This crate provides:
//! - Video metadata via `ffprobe`
//! - Type-safe FFmpeg command building with timeouts
//! - Frame extraction at a target sampling rate
//! - QR decoding behind a swappable [`CodeDecoder`]
//! - A bounded-concurrency frame scan with deduplicated output

pub mod analyzer;
pub mod command;
pub mod decoder;
pub mod error;
pub mod frames;
pub mod probe;
pub mod scan;

pub use analyzer::{FfmpegAnalyzer, VideoAnalyzer};
pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use decoder::{CodeDecoder, QrDecoder};
pub use error::{MediaError, MediaResult};
pub use frames::{extract_frames, frame_timestamp, FrameFile};
pub use probe::{probe_video, VideoInfo};
pub use scan::{FramePipeline, FrameScan, FrameWorkspace};
