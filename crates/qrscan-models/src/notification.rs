//! Completion notification payloads.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::video::{VideoId, VideoRecord, VideoStatus};

/// Detection as it appears in notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NotificationDetection {
    pub content: String,
    pub timestamp: u64,
}

/// Body sent to listeners over both the real-time channel and the HTTP fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub video_id: VideoId,
    pub status: VideoStatus,
    pub duration: u32,
    pub detections: Vec<NotificationDetection>,
    pub error_message: Option<String>,
    pub last_updated: DateTime<Utc>,
}

impl From<&VideoRecord> for NotificationPayload {
    fn from(record: &VideoRecord) -> Self {
        Self {
            video_id: record.video_id,
            status: record.status,
            duration: record.duration,
            detections: record
                .detections
                .iter()
                .map(|d| NotificationDetection {
                    content: d.content.clone(),
                    timestamp: d.timestamp_seconds,
                })
                .collect(),
            error_message: record.error_message.clone(),
            last_updated: record.last_updated,
        }
    }
}
