//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Video file not found: {0}")]
    FileNotFound(String),

    #[error("Metadata analysis failed: {0}")]
    MetadataAnalysis(String),

    #[error("Frame processing failed: {0}")]
    ProcessingFailed(String),

    #[error("Persistence failed: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Firestore error: {0}")]
    Firestore(#[from] qrscan_firestore::FirestoreError),

    #[error("Media error: {0}")]
    Media(#[from] qrscan_media::MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] qrscan_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn file_not_found(path: impl Into<String>) -> Self {
        Self::FileNotFound(path.into())
    }

    pub fn metadata_analysis(msg: impl std::fmt::Display) -> Self {
        Self::MetadataAnalysis(msg.to_string())
    }

    pub fn processing_failed(msg: impl Into<String>) -> Self {
        Self::ProcessingFailed(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// A record insert lost a race with another writer.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, WorkerError::Firestore(e) if e.is_already_exists())
    }

    /// The datastore rejected or could not serve a request.
    pub fn is_persistence(&self) -> bool {
        matches!(self, WorkerError::Persistence(_) | WorkerError::Firestore(_))
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerError::FileNotFound(_) => "file_not_found",
            WorkerError::MetadataAnalysis(_) => "metadata_analysis",
            WorkerError::ProcessingFailed(_) | WorkerError::Media(_) => "processing",
            WorkerError::Persistence(_) | WorkerError::Firestore(_) => "persistence",
            WorkerError::ConfigError(_) => "config",
            WorkerError::Queue(_) => "queue",
            WorkerError::Io(_) => "io",
        }
    }
}

/// Failure of one notification attempt.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Real-time channel is not connected")]
    NotConnected,

    #[error("Real-time channel failed: {0}")]
    Channel(String),

    #[error("Publish rejected: {0}")]
    Rejected(String),

    #[error("Fallback request failed: {0}")]
    Fallback(#[from] reqwest::Error),

    #[error("Fallback endpoint returned status {0}")]
    FallbackStatus(u16),
}

impl NotifyError {
    /// The failure lies with the channel's connection rather than the message.
    pub fn is_channel_level(&self) -> bool {
        matches!(self, NotifyError::NotConnected | NotifyError::Channel(_))
    }
}

impl From<qrscan_queue::QueueError> for NotifyError {
    fn from(e: qrscan_queue::QueueError) -> Self {
        match e {
            qrscan_queue::QueueError::NotConnected(_) => NotifyError::NotConnected,
            e if e.is_connection_error() => NotifyError::Channel(e.to_string()),
            e => NotifyError::Rejected(e.to_string()),
        }
    }
}
