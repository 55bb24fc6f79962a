//! Firestore REST API client.
//!
//! This crate provides:
//! - The `video_results` repository (partial updates, additive appends, indexes)
//! - Service account authentication via gcp_auth, or the local emulator
//! - Exponential backoff with jitter for transient failures

pub mod client;
pub mod error;
pub mod metrics;
pub mod retry;
pub mod token_cache;
pub mod types;
pub mod video_results;


pub use client::{FirestoreClient, FirestoreConfig};
pub use error::{FirestoreError, FirestoreResult};
pub use retry::RetryConfig;
pub use types::{Document, FromFirestoreValue, ToFirestoreValue, Value};
pub use video_results::{VideoResultRepository, VIDEO_RESULTS_COLLECTION};
