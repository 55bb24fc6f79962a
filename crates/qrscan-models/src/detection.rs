//! Decoded code detections.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One decoded code and the second of video it was seen at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    /// Decoded payload text
    pub content: String,
    /// Source timestamp in whole seconds
    pub timestamp_seconds: u64,
}

impl Detection {
    pub fn new(content: impl Into<String>, timestamp_seconds: u64) -> Self {
        Self {
            content: content.into(),
            timestamp_seconds,
        }
    }
}

/// Collapse detections to one per distinct content.
///
/// The earliest timestamp wins for each content. The output is sorted by
/// timestamp (content breaks ties) so it does not depend on the order in
/// which parallel decoders produced their results.
pub fn dedup_detections<I>(detections: I) -> Vec<Detection>
where
    I: IntoIterator<Item = Detection>,
{
    let mut earliest: HashMap<String, u64> = HashMap::new();

    for detection in detections {
        earliest
            .entry(detection.content)
            .and_modify(|ts| *ts = (*ts).min(detection.timestamp_seconds))
            .or_insert(detection.timestamp_seconds);
    }

    let mut unique: Vec<Detection> = earliest
        .into_iter()
        .map(|(content, timestamp_seconds)| Detection {
            content,
            timestamp_seconds,
        })
        .collect();

    unique.sort_by(|a, b| {
        a.timestamp_seconds
            .cmp(&b.timestamp_seconds)
            .then_with(|| a.content.cmp(&b.content))
    });
    unique
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_keeps_earliest_timestamp() {
        let out = dedup_detections(vec![
            Detection::new("X", 7),
            Detection::new("X", 3),
            Detection::new("X", 5),
        ]);
        assert_eq!(out, vec![Detection::new("X", 3)]);
    }

    #[test]
    fn test_dedup_sorts_by_timestamp() {
        let out = dedup_detections(vec![
            Detection::new("late", 9),
            Detection::new("early", 1),
            Detection::new("middle", 4),
            Detection::new("early", 6),
        ]);
        let contents: Vec<_> = out.iter().map(|d| d.content.as_str()).collect();
        assert_eq!(contents, vec!["early", "middle", "late"]);
    }

    #[test]
    fn test_dedup_ties_are_deterministic() {
        let a = dedup_detections(vec![Detection::new("b", 2), Detection::new("a", 2)]);
        let b = dedup_detections(vec![Detection::new("a", 2), Detection::new("b", 2)]);
        assert_eq!(a, b);
        assert_eq!(a[0].content, "a");
    }

    #[test]
    fn test_dedup_empty() {
        assert!(dedup_detections(Vec::new()).is_empty());
    }

    #[test]
    fn test_detection_serializes_timestamp_seconds() {
        let json = serde_json::to_value(Detection::new("X", 3)).unwrap();
        assert_eq!(json["timestampSeconds"], 3);
    }
}
