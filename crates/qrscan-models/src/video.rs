//! Video result models.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::detection::{dedup_detections, Detection};
use crate::task::VideoTask;

/// Identifier of a video, assigned upstream when the upload is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct VideoId(pub i64);

impl VideoId {
    /// Get the inner integer.
    pub fn get(&self) -> i64 {
        self.0
    }

    /// Document key used by the result store.
    pub fn as_key(&self) -> String {
        self.0.to_string()
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for VideoId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Lifecycle status of a video record.
///
/// Within one processing attempt the status only moves forward:
/// `Queued -> Processing -> Completed | Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
pub enum VideoStatus {
    /// Registered, waiting for a worker
    #[default]
    Queued,
    /// A worker is analyzing the video
    Processing,
    /// Frames were scanned and detections persisted
    Completed,
    /// The attempt failed; see `error_message`
    Error,
}

impl VideoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Queued => "Queued",
            VideoStatus::Processing => "Processing",
            VideoStatus::Completed => "Completed",
            VideoStatus::Error => "Error",
        }
    }

    /// Terminal states end a processing attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(self, VideoStatus::Completed | VideoStatus::Error)
    }
}

impl fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for VideoStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Queued" => Ok(VideoStatus::Queued),
            "Processing" => Ok(VideoStatus::Processing),
            "Completed" => Ok(VideoStatus::Completed),
            "Error" => Ok(VideoStatus::Error),
            other => Err(format!("unknown video status: {}", other)),
        }
    }
}

/// Persisted analysis result of one video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VideoRecord {
    /// Primary key
    pub video_id: VideoId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Path of the source file as submitted
    pub file_path: String,

    #[serde(default)]
    pub status: VideoStatus,

    /// Set once when the record is created
    pub created_at: DateTime<Utc>,

    /// Stamped on every mutation
    pub last_updated: DateTime<Utc>,

    /// Whole seconds; 0 until metadata analysis succeeds
    #[serde(default)]
    pub duration: u32,

    /// Present only while `status` is `Error`
    #[serde(default)]
    pub error_message: Option<String>,

    /// Distinct decoded contents in timestamp order
    #[serde(default)]
    pub detections: Vec<Detection>,
}

impl VideoRecord {
    /// Create the initial record for a task.
    pub fn queued(task: &VideoTask) -> Self {
        let now = Utc::now();
        Self {
            video_id: task.id(),
            title: None,
            description: None,
            file_path: task.file_path.clone(),
            status: VideoStatus::Queued,
            created_at: now,
            last_updated: now,
            duration: 0,
            error_message: None,
            detections: Vec::new(),
        }
    }

    /// Mirror a status update made through the result store.
    ///
    /// The error message is kept only for `Error`, so the record never
    /// carries a stale message after a successful retry.
    pub fn apply_status(
        &mut self,
        status: VideoStatus,
        error_message: Option<String>,
        duration: Option<u32>,
    ) {
        self.status = status;
        self.error_message = if status == VideoStatus::Error {
            error_message
        } else {
            None
        };
        if let Some(duration) = duration {
            self.duration = duration;
        }
        self.last_updated = Utc::now();
    }

    /// Detections whose content is not on this record yet.
    pub fn missing_detections(&self, candidates: &[Detection]) -> Vec<Detection> {
        let known: HashSet<&str> = self.detections.iter().map(|d| d.content.as_str()).collect();
        candidates
            .iter()
            .filter(|d| !known.contains(d.content.as_str()))
            .cloned()
            .collect()
    }

    /// Work out how a scan changes the stored detections.
    ///
    /// The stored list and the scan are merged with earliest-timestamp
    /// dedup. When the stored list survives as a prefix of the merge only
    /// the tail needs appending; otherwise the whole list is rewritten.
    pub fn plan_detections(&self, scanned: &[Detection]) -> DetectionUpdate {
        let merged = dedup_detections(self.detections.iter().chain(scanned).cloned());
        if merged == self.detections {
            DetectionUpdate::Unchanged
        } else if merged.starts_with(&self.detections) {
            DetectionUpdate::Append(merged[self.detections.len()..].to_vec())
        } else {
            DetectionUpdate::Replace(merged)
        }
    }

    /// Mirror a full detections rewrite made through the result store.
    pub fn set_detections(&mut self, detections: Vec<Detection>) {
        self.detections = detections;
        self.last_updated = Utc::now();
    }

    /// Append detections, skipping contents already present.
    pub fn merge_detections(&mut self, detections: &[Detection]) {
        let missing = self.missing_detections(detections);
        if missing.is_empty() {
            return;
        }
        self.detections.extend(missing);
        self.last_updated = Utc::now();
    }
}

/// Change to a record's detections after a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectionUpdate {
    Unchanged,
    /// New contents that sort after everything stored
    Append(Vec<Detection>),
    /// Full list to write in place of the stored one
    Replace(Vec<Detection>),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> VideoTask {
        VideoTask::new(7, "/videos/a.mp4")
    }

    #[test]
    fn test_queued_record_defaults() {
        let record = VideoRecord::queued(&task());
        assert_eq!(record.video_id, VideoId(7));
        assert_eq!(record.status, VideoStatus::Queued);
        assert_eq!(record.duration, 0);
        assert!(record.error_message.is_none());
        assert!(record.detections.is_empty());
        assert_eq!(record.created_at, record.last_updated);
    }

    #[test]
    fn test_apply_status_clears_error_outside_error_state() {
        let mut record = VideoRecord::queued(&task());
        record.apply_status(VideoStatus::Error, Some("boom".into()), None);
        assert_eq!(record.error_message.as_deref(), Some("boom"));

        record.apply_status(VideoStatus::Processing, Some("ignored".into()), Some(12));
        assert!(record.error_message.is_none());
        assert_eq!(record.duration, 12);
    }

    #[test]
    fn test_apply_status_keeps_duration_when_absent() {
        let mut record = VideoRecord::queued(&task());
        record.apply_status(VideoStatus::Processing, None, Some(30));
        record.apply_status(VideoStatus::Completed, None, None);
        assert_eq!(record.duration, 30);
    }

    #[test]
    fn test_merge_detections_skips_known_content() {
        let mut record = VideoRecord::queued(&task());
        record.merge_detections(&[Detection::new("A", 1), Detection::new("B", 4)]);
        record.merge_detections(&[Detection::new("A", 9), Detection::new("C", 5)]);

        let contents: Vec<_> = record.detections.iter().map(|d| d.content.as_str()).collect();
        assert_eq!(contents, vec!["A", "B", "C"]);
        assert_eq!(record.detections[0].timestamp_seconds, 1);
    }

    #[test]
    fn test_plan_detections_appends_later_contents() {
        let mut record = VideoRecord::queued(&task());
        record.merge_detections(&[Detection::new("X", 3)]);

        assert_eq!(
            record.plan_detections(&[Detection::new("X", 3), Detection::new("Z", 5)]),
            DetectionUpdate::Append(vec![Detection::new("Z", 5)])
        );
        assert_eq!(
            record.plan_detections(&[Detection::new("X", 8)]),
            DetectionUpdate::Unchanged
        );
    }

    #[test]
    fn test_plan_detections_rewrites_when_order_changes() {
        let mut record = VideoRecord::queued(&task());
        record.merge_detections(&[Detection::new("X", 7)]);

        assert_eq!(
            record.plan_detections(&[Detection::new("Y", 1), Detection::new("X", 3)]),
            DetectionUpdate::Replace(vec![Detection::new("Y", 1), Detection::new("X", 3)])
        );
    }

    #[test]
    fn test_status_round_trip_through_str() {
        for status in [
            VideoStatus::Queued,
            VideoStatus::Processing,
            VideoStatus::Completed,
            VideoStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<VideoStatus>().unwrap(), status);
        }
        assert!("done".parse::<VideoStatus>().is_err());
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = VideoRecord::queued(&task());
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["videoId"], 7);
        assert_eq!(json["filePath"], "/videos/a.mp4");
        assert_eq!(json["status"], "Queued");
        assert!(json.get("lastUpdated").is_some());
    }
}
