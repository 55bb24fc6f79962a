//! Repository for `video_results` documents.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use qrscan_models::{Detection, VideoId, VideoRecord, VideoStatus};

use crate::client::FirestoreClient;
use crate::error::{FirestoreError, FirestoreResult};
use crate::types::{
    Document, DocumentMask, FieldTransform, FromFirestoreValue, Index, IndexOrder,
    ToFirestoreValue, Value, Write,
};

/// Default collection holding one document per video.
pub const VIDEO_RESULTS_COLLECTION: &str = "video_results";

mod fields {
    pub const VIDEO_ID: &str = "videoId";
    pub const TITLE: &str = "title";
    pub const DESCRIPTION: &str = "description";
    pub const FILE_PATH: &str = "filePath";
    pub const STATUS: &str = "status";
    pub const CREATED_AT: &str = "createdAt";
    pub const LAST_UPDATED: &str = "lastUpdated";
    pub const DURATION: &str = "duration";
    pub const ERROR_MESSAGE: &str = "errorMessage";
    pub const DETECTIONS: &str = "detections";
    pub const CONTENT: &str = "content";
    pub const TIMESTAMP_SECONDS: &str = "timestampSeconds";
}

/// Composite indexes the dashboards query by.
pub fn video_result_indexes() -> Vec<Index> {
    vec![
        Index::collection(&[
            (fields::STATUS, IndexOrder::Ascending),
            (fields::LAST_UPDATED, IndexOrder::Descending),
        ]),
        Index::collection(&[
            (fields::STATUS, IndexOrder::Ascending),
            (fields::CREATED_AT, IndexOrder::Descending),
        ]),
    ]
}

/// Repository for video result documents.
#[derive(Clone)]
pub struct VideoResultRepository {
    client: FirestoreClient,
    collection: String,
}

impl VideoResultRepository {
    pub fn new(client: FirestoreClient) -> Self {
        Self::with_collection(client, VIDEO_RESULTS_COLLECTION)
    }

    pub fn with_collection(client: FirestoreClient, collection: impl Into<String>) -> Self {
        Self {
            client,
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Get a record by video ID.
    pub async fn get(&self, video_id: VideoId) -> FirestoreResult<Option<VideoRecord>> {
        let doc = self
            .client
            .get_document(&self.collection, &video_id.as_key())
            .await?;

        doc.map(|d| document_to_record(&d, video_id)).transpose()
    }

    /// Create a record. Fails with `AlreadyExists` if one is present.
    pub async fn create(&self, record: &VideoRecord) -> FirestoreResult<()> {
        self.client
            .create_document(
                &self.collection,
                &record.video_id.as_key(),
                record_to_fields(record),
            )
            .await?;
        info!(video_id = %record.video_id, "Created video result record");
        Ok(())
    }

    /// Overwrite the whole record.
    pub async fn replace(&self, record: &VideoRecord) -> FirestoreResult<()> {
        self.client
            .update_document(
                &self.collection,
                &record.video_id.as_key(),
                record_to_fields(record),
                &[],
            )
            .await?;
        Ok(())
    }

    /// Set status, error message and optionally duration in one write.
    ///
    /// `errorMessage` is always written: the message for `Error`, null
    /// otherwise. Returns the `lastUpdated` stamp that was written.
    pub async fn update_status(
        &self,
        video_id: VideoId,
        status: VideoStatus,
        error_message: Option<&str>,
        duration: Option<u32>,
    ) -> FirestoreResult<DateTime<Utc>> {
        let now = Utc::now();
        let error_message = error_message.filter(|_| status == VideoStatus::Error);

        let mut values = HashMap::new();
        values.insert(fields::STATUS.to_string(), status.as_str().to_firestore_value());
        values.insert(
            fields::ERROR_MESSAGE.to_string(),
            error_message.to_firestore_value(),
        );
        values.insert(fields::LAST_UPDATED.to_string(), now.to_firestore_value());

        let mut mask = vec![fields::STATUS, fields::ERROR_MESSAGE, fields::LAST_UPDATED];
        if let Some(duration) = duration {
            values.insert(fields::DURATION.to_string(), duration.to_firestore_value());
            mask.push(fields::DURATION);
        }

        self.client
            .update_document(&self.collection, &video_id.as_key(), values, &mask)
            .await?;
        Ok(now)
    }

    /// Append detections without touching existing ones.
    ///
    /// Runs as a single atomic commit: the array union on `detections`
    /// and the `lastUpdated` stamp land together.
    pub async fn append_detections(
        &self,
        video_id: VideoId,
        detections: &[Detection],
    ) -> FirestoreResult<()> {
        if detections.is_empty() {
            return Ok(());
        }

        let name = self
            .client
            .full_document_name(&self.collection, &video_id.as_key());
        let stamp = HashMap::from([(
            fields::LAST_UPDATED.to_string(),
            Utc::now().to_firestore_value(),
        )]);

        let write = Write {
            update: Some(Document::named(name, stamp)),
            update_mask: Some(DocumentMask::new([fields::LAST_UPDATED])),
            update_transforms: vec![FieldTransform::append_missing(
                fields::DETECTIONS,
                detections.iter().map(detection_to_value).collect(),
            )],
            current_document: None,
        };

        self.client.commit(vec![write]).await?;
        info!(video_id = %video_id, count = detections.len(), "Appended detections");
        Ok(())
    }

    /// Overwrite `detections` with the given list, leaving other fields alone.
    pub async fn set_detections(
        &self,
        video_id: VideoId,
        detections: &[Detection],
    ) -> FirestoreResult<()> {
        let values = HashMap::from([
            (fields::DETECTIONS.to_string(), detections_to_value(detections)),
            (fields::LAST_UPDATED.to_string(), Utc::now().to_firestore_value()),
        ]);

        self.client
            .update_document(
                &self.collection,
                &video_id.as_key(),
                values,
                &[fields::DETECTIONS, fields::LAST_UPDATED],
            )
            .await?;
        info!(video_id = %video_id, count = detections.len(), "Rewrote detections");
        Ok(())
    }

    /// Create the composite indexes. Never fails.
    ///
    /// Returns how many indexes were newly created. Existing indexes and
    /// failures count as zero; failures are logged. The emulator has no
    /// index management, so nothing is attempted there.
    pub async fn ensure_indexes(&self) -> usize {
        if self.client.is_emulator() {
            info!("Firestore emulator in use, skipping index creation");
            return 0;
        }

        let mut created = 0;
        for index in video_result_indexes() {
            let description = index
                .fields
                .iter()
                .map(|f| f.field_path.as_str())
                .collect::<Vec<_>>()
                .join(",");
            match self.client.create_index(&self.collection, &index).await {
                Ok(true) => {
                    info!(index = %description, "Created index");
                    created += 1;
                }
                Ok(false) => {}
                Err(e) => warn!(index = %description, "Failed to create index: {}", e),
            }
        }
        created
    }
}

// =============================================================================
// Field conversion
// =============================================================================

fn detection_to_value(detection: &Detection) -> Value {
    Value::map([
        (fields::CONTENT, detection.content.to_firestore_value()),
        (
            fields::TIMESTAMP_SECONDS,
            detection.timestamp_seconds.to_firestore_value(),
        ),
    ])
}

fn detections_to_value(detections: &[Detection]) -> Value {
    Value::ArrayValue(crate::types::ArrayValue {
        values: Some(detections.iter().map(detection_to_value).collect()),
    })
}

fn value_to_detection(value: &Value) -> Option<Detection> {
    let map = value.as_map()?;
    Some(Detection {
        content: map.get(fields::CONTENT).and_then(String::from_firestore_value)?,
        timestamp_seconds: map
            .get(fields::TIMESTAMP_SECONDS)
            .and_then(u64::from_firestore_value)
            .unwrap_or(0),
    })
}

fn record_to_fields(record: &VideoRecord) -> HashMap<String, Value> {
    let mut values = HashMap::new();
    values.insert(fields::VIDEO_ID.to_string(), record.video_id.get().to_firestore_value());
    if let Some(title) = &record.title {
        values.insert(fields::TITLE.to_string(), title.to_firestore_value());
    }
    if let Some(description) = &record.description {
        values.insert(fields::DESCRIPTION.to_string(), description.to_firestore_value());
    }
    values.insert(fields::FILE_PATH.to_string(), record.file_path.to_firestore_value());
    values.insert(fields::STATUS.to_string(), record.status.as_str().to_firestore_value());
    values.insert(fields::CREATED_AT.to_string(), record.created_at.to_firestore_value());
    values.insert(fields::LAST_UPDATED.to_string(), record.last_updated.to_firestore_value());
    values.insert(fields::DURATION.to_string(), record.duration.to_firestore_value());
    values.insert(
        fields::ERROR_MESSAGE.to_string(),
        record.error_message.to_firestore_value(),
    );
    values.insert(
        fields::DETECTIONS.to_string(),
        detections_to_value(&record.detections),
    );
    values
}

fn document_to_record(doc: &Document, video_id: VideoId) -> FirestoreResult<VideoRecord> {
    let values = doc.fields.as_ref().ok_or_else(|| {
        FirestoreError::InvalidResponse(format!("Video result {} has no fields", video_id))
    })?;

    let get_string = |key: &str| values.get(key).and_then(String::from_firestore_value);
    let get_time = |key: &str| values.get(key).and_then(DateTime::<Utc>::from_firestore_value);

    let status = match get_string(fields::STATUS) {
        Some(s) => s.parse::<VideoStatus>().map_err(FirestoreError::InvalidResponse)?,
        None => VideoStatus::Queued,
    };
    let created_at = get_time(fields::CREATED_AT).unwrap_or_else(Utc::now);

    Ok(VideoRecord {
        video_id,
        title: get_string(fields::TITLE),
        description: get_string(fields::DESCRIPTION),
        file_path: get_string(fields::FILE_PATH).unwrap_or_default(),
        status,
        created_at,
        last_updated: get_time(fields::LAST_UPDATED).unwrap_or(created_at),
        duration: values
            .get(fields::DURATION)
            .and_then(u32::from_firestore_value)
            .unwrap_or(0),
        error_message: get_string(fields::ERROR_MESSAGE),
        detections: values
            .get(fields::DETECTIONS)
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(value_to_detection).collect())
            .unwrap_or_default(),
    })
}
