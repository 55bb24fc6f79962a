//! QR code video analysis worker.
//!
//! This crate provides:
//! - The per-message consume, retry and dead-letter controller
//! - The video processing orchestrator
//! - Best-effort completion notifications with HTTP fallback
//! - Health and metrics endpoints
//! - Graceful shutdown

pub mod config;
pub mod error;
pub mod executor;
pub mod handler;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod notifier;
pub mod orchestrator;
pub mod queue;
pub mod resolver;
pub mod retry;
pub mod store;

pub use config::{NotifierConfig, WorkerConfig};
pub use error::{NotifyError, WorkerError, WorkerResult};
pub use executor::VideoExecutor;
pub use handler::{DeliveryHandler, MessageHandler};
pub use logging::VideoLogger;
pub use notifier::{FallbackTransport, HttpFallback, NotifyOutcome, Notifier, RealtimeChannel};
pub use orchestrator::VideoOrchestrator;
pub use queue::TaskQueue;
pub use resolver::PathResolver;
pub use retry::{FailureTracker, RetryPolicy};
pub use store::ResultStore;
