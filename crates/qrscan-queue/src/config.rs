//! Queue configuration.

use std::time::Duration;

/// Queue and topology configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Primary stream holding video tasks
    pub stream_name: String,
    /// Consumer group of the workers
    pub consumer_group: String,
    /// Hash acting as the direct dead-letter exchange
    pub dead_letter_exchange: String,
    /// Routing key the primary queue dead-letters with
    pub dead_letter_routing_key: String,
    /// Stream parking dead-lettered messages
    pub dlq_stream_name: String,
    /// Consumer group for inspecting the dead-letter stream
    pub dlq_group: String,
    /// Failed deliveries allowed before dead-lettering
    pub max_retries: u32,
    /// Age after which queued messages are dropped
    pub message_ttl: Duration,
    /// Queue length beyond which the oldest messages are dropped
    pub max_length: u64,
    /// How long one read blocks waiting for messages
    pub block_ms: u64,
    /// Messages fetched per read
    pub read_count: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "qrscan:videos".to_string(),
            consumer_group: "qrscan:workers".to_string(),
            dead_letter_exchange: "qrscan:dlx".to_string(),
            dead_letter_routing_key: "video.failed".to_string(),
            dlq_stream_name: "qrscan:videos:dlq".to_string(),
            dlq_group: "qrscan:dlq-inspectors".to_string(),
            max_retries: 3,
            message_ttl: Duration::from_secs(24 * 60 * 60),
            max_length: 10_000,
            block_ms: 5_000,
            read_count: 1,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        fn string(key: &str, default: String) -> String {
            std::env::var(key)
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(default)
        }

        fn number<T: std::str::FromStr>(key: &str, default: T) -> T {
            std::env::var(key)
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(default)
        }

        Self {
            redis_url: string("REDIS_URL", defaults.redis_url),
            stream_name: string("QUEUE_STREAM", defaults.stream_name),
            consumer_group: string("QUEUE_CONSUMER_GROUP", defaults.consumer_group),
            dead_letter_exchange: string("QUEUE_DLX", defaults.dead_letter_exchange),
            dead_letter_routing_key: string(
                "QUEUE_DLQ_ROUTING_KEY",
                defaults.dead_letter_routing_key,
            ),
            dlq_stream_name: string("QUEUE_DLQ_STREAM", defaults.dlq_stream_name),
            dlq_group: string("QUEUE_DLQ_GROUP", defaults.dlq_group),
            max_retries: number("QUEUE_MAX_RETRIES", defaults.max_retries),
            message_ttl: Duration::from_secs(number(
                "QUEUE_MESSAGE_TTL_SECS",
                defaults.message_ttl.as_secs(),
            )),
            max_length: number("QUEUE_MAX_LENGTH", defaults.max_length),
            block_ms: number("QUEUE_BLOCK_MS", defaults.block_ms),
            read_count: number("QUEUE_READ_COUNT", defaults.read_count).max(1),
        }
    }

    /// Hash holding the arguments the primary queue was declared with.
    pub fn arguments_key(&self) -> String {
        format!("{}:arguments", self.stream_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: &[&str] = &[
        "REDIS_URL",
        "QUEUE_STREAM",
        "QUEUE_DLX",
        "QUEUE_MAX_RETRIES",
        "QUEUE_MESSAGE_TTL_SECS",
        "QUEUE_READ_COUNT",
    ];

    fn clear_env() {
        for key in KEYS {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        clear_env();
        let config = QueueConfig::from_env();
        assert_eq!(config, QueueConfig::default());
        assert_eq!(config.arguments_key(), "qrscan:videos:arguments");
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        std::env::set_var("QUEUE_STREAM", "custom:videos");
        std::env::set_var("QUEUE_MAX_RETRIES", "5");
        std::env::set_var("QUEUE_MESSAGE_TTL_SECS", "60");
        std::env::set_var("QUEUE_READ_COUNT", "0");

        let config = QueueConfig::from_env();
        assert_eq!(config.stream_name, "custom:videos");
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.message_ttl, Duration::from_secs(60));
        assert_eq!(config.read_count, 1);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_ignores_garbage() {
        clear_env();
        std::env::set_var("QUEUE_MAX_RETRIES", "three");
        std::env::set_var("QUEUE_DLX", "  ");
        let config = QueueConfig::from_env();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.dead_letter_exchange, "qrscan:dlx");
        clear_env();
    }
}
