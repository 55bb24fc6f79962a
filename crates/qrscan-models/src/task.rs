//! Inbound video task messages.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::Validate;

use crate::video::VideoId;

pub type TaskResult<T> = Result<T, TaskError>;

/// Reasons a message body cannot become a [`VideoTask`].
///
/// Every variant is permanent: retrying the same bytes cannot succeed.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Payload is not a JSON object")]
    NotAnObject,

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Field {field} has the wrong type: expected {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("Validation failed: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

/// A request to analyze one uploaded video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub struct VideoTask {
    /// Video identifier, always positive
    #[validate(range(min = 1))]
    pub video_id: i64,
    /// Path to the uploaded file as seen by the uploader
    #[validate(length(min = 1))]
    pub file_path: String,
}

impl VideoTask {
    pub fn new(video_id: i64, file_path: impl Into<String>) -> Self {
        Self {
            video_id,
            file_path: file_path.into(),
        }
    }

    pub fn id(&self) -> VideoId {
        VideoId(self.video_id)
    }

    /// Parse a message body.
    ///
    /// Field names are matched case-insensitively, so `videoId`,
    /// `VideoId` and `VIDEOID` are all accepted.
    pub fn parse(payload: &[u8]) -> TaskResult<Self> {
        let value: serde_json::Value = serde_json::from_slice(payload)?;
        let object = value.as_object().ok_or(TaskError::NotAnObject)?;

        let field = |name: &'static str| {
            object
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value)
                .filter(|value| !value.is_null())
                .ok_or(TaskError::MissingField(name))
        };

        let video_id = field("VideoId")?.as_i64().ok_or(TaskError::WrongType {
            field: "VideoId",
            expected: "integer",
        })?;
        let file_path = field("FilePath")?
            .as_str()
            .ok_or(TaskError::WrongType {
                field: "FilePath",
                expected: "string",
            })?
            .to_string();
        // Stored exactly as sent; whitespace alone does not count as a path
        if file_path.trim().is_empty() {
            return Err(TaskError::MissingField("FilePath"));
        }

        let task = Self {
            video_id,
            file_path,
        };
        task.validate()?;
        Ok(task)
    }

    /// Serialize to the wire format.
    pub fn to_payload(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_canonical_payload() {
        let task = VideoTask::parse(br#"{"VideoId": 1, "FilePath": "/videos/a.mp4"}"#).unwrap();
        assert_eq!(task, VideoTask::new(1, "/videos/a.mp4"));
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        let task = VideoTask::parse(br#"{"videoid": 5, "filePath": "b.mp4"}"#).unwrap();
        assert_eq!(task.video_id, 5);
        assert_eq!(task.file_path, "b.mp4");
    }

    #[test]
    fn test_parse_rejects_invalid_json() {
        assert!(matches!(
            VideoTask::parse(b"{not json"),
            Err(TaskError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_parse_rejects_non_object() {
        assert!(matches!(
            VideoTask::parse(b"[1, 2]"),
            Err(TaskError::NotAnObject)
        ));
    }

    #[test]
    fn test_parse_rejects_missing_fields() {
        assert!(matches!(
            VideoTask::parse(br#"{"VideoId": 1}"#),
            Err(TaskError::MissingField("FilePath"))
        ));
        assert!(matches!(
            VideoTask::parse(br#"{"VideoId": null, "FilePath": "a"}"#),
            Err(TaskError::MissingField("VideoId"))
        ));
    }

    #[test]
    fn test_parse_rejects_wrong_types() {
        assert!(matches!(
            VideoTask::parse(br#"{"VideoId": "1", "FilePath": "a"}"#),
            Err(TaskError::WrongType { field: "VideoId", .. })
        ));
    }

    #[test]
    fn test_parse_rejects_non_positive_id_and_blank_path() {
        assert!(matches!(
            VideoTask::parse(br#"{"VideoId": 0, "FilePath": "a"}"#),
            Err(TaskError::Invalid(_))
        ));
        assert!(matches!(
            VideoTask::parse(br#"{"VideoId": 3, "FilePath": "   "}"#),
            Err(TaskError::MissingField("FilePath"))
        ));
        assert!(matches!(
            VideoTask::parse(br#"{"VideoId": 3, "FilePath": ""}"#),
            Err(TaskError::MissingField("FilePath"))
        ));
    }

    #[test]
    fn test_parse_keeps_path_as_sent() {
        let task = VideoTask::parse(br#"{"VideoId": 4, "FilePath": "/videos/clip one.mp4 "}"#).unwrap();
        assert_eq!(task.file_path, "/videos/clip one.mp4 ");
    }

    #[test]
    fn test_payload_uses_pascal_case() {
        let payload = VideoTask::new(9, "/x.mp4").to_payload().unwrap();
        assert_eq!(payload, r#"{"VideoId":9,"FilePath":"/x.mp4"}"#);
        assert_eq!(VideoTask::parse(payload.as_bytes()).unwrap().video_id, 9);
    }
}
