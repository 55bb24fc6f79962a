//! Redis Streams video queue.
//!
//! This crate provides:
//! - Idempotent topology setup (queue, dead-letter exchange and queue, binding)
//! - Consumption with explicit ack / requeue / dead-letter settlement
//! - Crash recovery of deliveries held by dead consumers
//! - The real-time notification channel via Redis Pub/Sub

pub mod channel;
pub mod config;
pub mod delivery;
pub mod error;
pub mod queue;
pub mod topology;

pub use channel::NotificationChannel;
pub use config::QueueConfig;
pub use delivery::{DeadLetterReason, Delivery, Disposition, Settlement};
pub use error::{QueueError, QueueResult};
pub use queue::{DeadLetterEntry, VideoQueue};
pub use topology::{EntityState, QueueArguments, QueueTopology, TopologyReport};
