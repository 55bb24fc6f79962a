//! Delivered messages and their terminal dispositions.

use std::collections::HashMap;
use std::fmt;

use redis::streams::StreamId;

/// Entry field holding the JSON body.
pub const FIELD_PAYLOAD: &str = "payload";
/// Entry field counting how often the message was handed out before.
pub const FIELD_DELIVERY_COUNT: &str = "delivery_count";
/// Entry field with the first enqueue time in unix milliseconds.
pub const FIELD_ENQUEUED_AT: &str = "enqueued_at";

/// One message handed to this consumer.
///
/// Settling consumes the delivery, so each message gets exactly one
/// terminal disposition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Stream entry ID
    pub id: String,
    /// Raw message body
    pub payload: Vec<u8>,
    /// Prior deliveries of this message; 0 on first delivery
    pub delivery_count: u32,
    /// First enqueue time (unix ms), if recorded
    pub enqueued_at: Option<i64>,
}

impl Delivery {
    /// Build a delivery from a stream entry.
    ///
    /// `redeliveries` is added to the recorded count for entries reclaimed
    /// from consumers that died holding them.
    pub fn from_entry(entry: &StreamId, redeliveries: u32) -> Self {
        Self::from_fields(entry.id.clone(), &entry.map, redeliveries)
    }

    pub(crate) fn from_fields(
        id: String,
        fields: &HashMap<String, redis::Value>,
        redeliveries: u32,
    ) -> Self {
        let payload = match fields.get(FIELD_PAYLOAD) {
            Some(redis::Value::BulkString(bytes)) => bytes.clone(),
            Some(redis::Value::SimpleString(s)) => s.as_bytes().to_vec(),
            _ => Vec::new(),
        };

        Self {
            id,
            payload,
            delivery_count: parse_delivery_count(fields.get(FIELD_DELIVERY_COUNT))
                .saturating_add(redeliveries),
            enqueued_at: field_str(fields.get(FIELD_ENQUEUED_AT)).and_then(|s| s.parse().ok()),
        }
    }

    /// Body as text, for logs.
    pub fn payload_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

fn field_str(value: Option<&redis::Value>) -> Option<String> {
    match value? {
        redis::Value::BulkString(bytes) => String::from_utf8(bytes.clone()).ok(),
        redis::Value::SimpleString(s) => Some(s.clone()),
        redis::Value::Int(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Delivery count from entry metadata; absent or unparseable counts as 0.
pub fn parse_delivery_count(value: Option<&redis::Value>) -> u32 {
    field_str(value)
        .and_then(|s| s.trim().parse::<u32>().ok())
        .unwrap_or(0)
}

/// Why a message was dead-lettered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadLetterReason {
    /// The body could not be decoded into a task
    Malformed,
    /// Processing failed on the last allowed delivery
    RetriesExhausted,
}

impl DeadLetterReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeadLetterReason::Malformed => "malformed",
            DeadLetterReason::RetriesExhausted => "retries_exhausted",
        }
    }
}

impl fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome requested for a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Processing succeeded; remove the message
    Ack,
    /// Put the message at the back of the queue with its count incremented
    Requeue,
    /// Move the message to the dead-letter queue
    DeadLetter {
        reason: DeadLetterReason,
        error: String,
    },
}

impl Disposition {
    pub fn dead_letter(reason: DeadLetterReason, error: impl Into<String>) -> Self {
        Self::DeadLetter {
            reason,
            error: error.into(),
        }
    }

    /// Label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Disposition::Ack => "ack",
            Disposition::Requeue => "requeue",
            Disposition::DeadLetter { .. } => "dead_letter",
        }
    }
}

/// What settlement actually did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Acked,
    /// Re-added under a new entry ID
    Requeued { new_id: String },
    /// Parked in the dead-letter stream under a new entry ID
    DeadLettered { dlq_id: String },
    /// No dead-letter binding was available; the message was removed
    Dropped,
}
