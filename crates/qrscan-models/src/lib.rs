//! Shared data models for the QR video scanning worker.
//!
//! This crate provides Serde-serializable types for:
//! - Inbound video tasks and their validation
//! - Persisted video records and lifecycle status
//! - Code detections and their deduplication
//! - Completion notification payloads

pub mod detection;
pub mod notification;
pub mod task;
pub mod video;

// Re-export common types
pub use detection::{dedup_detections, Detection};
pub use notification::{NotificationDetection, NotificationPayload};
pub use task::{TaskError, TaskResult, VideoTask};
pub use video::{DetectionUpdate, VideoId, VideoRecord, VideoStatus};
