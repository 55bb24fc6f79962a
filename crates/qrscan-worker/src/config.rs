//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

use qrscan_firestore::VIDEO_RESULTS_COLLECTION;

use crate::error::{WorkerError, WorkerResult};

fn env_number<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Worker configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    /// Maximum deliveries handled concurrently
    pub max_concurrent_jobs: usize,
    /// Upper bound on frame decoders per video
    pub max_frame_decoders: usize,
    /// Root for per-video frame workspaces
    pub work_dir: PathBuf,
    /// Shared volumes searched when a task path does not exist as given
    pub video_roots: Vec<PathBuf>,
    /// Frames per second sampled from short videos
    pub default_fps: f64,
    /// Frames per second sampled from videos longer than the threshold
    pub optimized_fps: f64,
    /// Duration above which `optimized_fps` applies
    pub duration_threshold: Duration,
    /// Limit on one ffmpeg extraction
    pub ffmpeg_timeout: Duration,
    /// Limit on one ffprobe run
    pub probe_timeout: Duration,
    /// How long shutdown waits for in-flight deliveries
    pub shutdown_timeout: Duration,
    /// Interval of the maintenance tick
    pub claim_interval: Duration,
    /// Minimum idle time before a pending delivery can be claimed (crash recovery)
    pub claim_min_idle: Duration,
    /// Firestore collection holding video records
    pub results_collection: String,
    pub health_port: u16,
    pub metrics_port: u16,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            max_frame_decoders: 4,
            work_dir: PathBuf::from("/tmp/qrscan"),
            video_roots: vec![PathBuf::from("/app/uploads"), PathBuf::from("/shared/videos")],
            default_fps: 1.0,
            optimized_fps: 0.5,
            duration_threshold: Duration::from_secs(600),
            ffmpeg_timeout: Duration::from_secs(1800),
            probe_timeout: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(30),
            claim_interval: Duration::from_secs(30),
            // Longer than the slowest ffprobe plus extraction
            claim_min_idle: Duration::from_secs(2400),
            results_collection: VIDEO_RESULTS_COLLECTION.to_string(),
            health_port: 8080,
            metrics_port: 9090,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let video_roots = env_string("WORKER_VIDEO_ROOTS")
            .map(|roots| {
                roots
                    .split(',')
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or(defaults.video_roots);

        Self {
            max_concurrent_jobs: env_number("WORKER_MAX_JOBS", defaults.max_concurrent_jobs),
            max_frame_decoders: env_number(
                "WORKER_MAX_FRAME_DECODERS",
                defaults.max_frame_decoders,
            ),
            work_dir: env_string("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            video_roots,
            default_fps: env_number("WORKER_DEFAULT_FPS", defaults.default_fps),
            optimized_fps: env_number("WORKER_OPTIMIZED_FPS", defaults.optimized_fps),
            duration_threshold: Duration::from_secs(env_number(
                "WORKER_DURATION_THRESHOLD_SECS",
                defaults.duration_threshold.as_secs(),
            )),
            ffmpeg_timeout: Duration::from_secs(env_number(
                "WORKER_FFMPEG_TIMEOUT_SECS",
                defaults.ffmpeg_timeout.as_secs(),
            )),
            probe_timeout: Duration::from_secs(env_number(
                "WORKER_PROBE_TIMEOUT_SECS",
                defaults.probe_timeout.as_secs(),
            )),
            shutdown_timeout: Duration::from_secs(env_number(
                "WORKER_SHUTDOWN_TIMEOUT",
                defaults.shutdown_timeout.as_secs(),
            )),
            claim_interval: Duration::from_secs(env_number(
                "WORKER_CLAIM_INTERVAL_SECS",
                defaults.claim_interval.as_secs(),
            )),
            claim_min_idle: Duration::from_secs(env_number(
                "WORKER_CLAIM_MIN_IDLE_SECS",
                defaults.claim_min_idle.as_secs(),
            )),
            results_collection: env_string("FIRESTORE_COLLECTION")
                .unwrap_or(defaults.results_collection),
            health_port: env_number("WORKER_HEALTH_PORT", defaults.health_port),
            metrics_port: env_number("WORKER_METRICS_PORT", defaults.metrics_port),
        }
    }

    /// Reject configurations the worker cannot run with.
    pub fn validate(&self) -> WorkerResult<()> {
        for (name, fps) in [
            ("WORKER_DEFAULT_FPS", self.default_fps),
            ("WORKER_OPTIMIZED_FPS", self.optimized_fps),
        ] {
            if !(fps > 0.0 && fps.is_finite()) {
                return Err(WorkerError::config_error(format!(
                    "{} must be a positive number, got {}",
                    name, fps
                )));
            }
        }
        if self.optimized_fps > self.default_fps {
            return Err(WorkerError::config_error(format!(
                "WORKER_OPTIMIZED_FPS ({}) must not exceed WORKER_DEFAULT_FPS ({})",
                self.optimized_fps, self.default_fps
            )));
        }
        if self.max_concurrent_jobs == 0 {
            return Err(WorkerError::config_error("WORKER_MAX_JOBS must be at least 1"));
        }
        if self.max_frame_decoders == 0 {
            return Err(WorkerError::config_error(
                "WORKER_MAX_FRAME_DECODERS must be at least 1",
            ));
        }
        if self.claim_interval.is_zero() {
            return Err(WorkerError::config_error(
                "WORKER_CLAIM_INTERVAL_SECS must be at least 1",
            ));
        }
        let longest_attempt = self.ffmpeg_timeout + self.probe_timeout;
        if self.claim_min_idle <= longest_attempt {
            return Err(WorkerError::config_error(format!(
                "WORKER_CLAIM_MIN_IDLE_SECS ({}s) must exceed WORKER_FFMPEG_TIMEOUT_SECS + WORKER_PROBE_TIMEOUT_SECS ({}s)",
                self.claim_min_idle.as_secs(),
                longest_attempt.as_secs()
            )));
        }
        if self.claim_interval >= self.claim_min_idle {
            return Err(WorkerError::config_error(
                "WORKER_CLAIM_INTERVAL_SECS must be shorter than WORKER_CLAIM_MIN_IDLE_SECS",
            ));
        }
        Ok(())
    }

    /// Sampling rate for a video of `duration_secs`.
    pub fn select_fps(&self, duration_secs: u32) -> f64 {
        if u64::from(duration_secs) > self.duration_threshold.as_secs() {
            self.optimized_fps
        } else {
            self.default_fps
        }
    }
}

/// Completion notifier configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifierConfig {
    /// Attempts on the real-time channel per notification
    pub max_retries: u32,
    /// Base of the linear backoff between attempts
    pub retry_delay: Duration,
    /// Companion service receiving fallback status updates
    pub fallback_url: Option<String>,
    /// Timeout of one fallback request
    pub timeout: Duration,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
            fallback_url: None,
            timeout: Duration::from_secs(10),
        }
    }
}

impl NotifierConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_retries: env_number("NOTIFY_MAX_RETRIES", defaults.max_retries),
            retry_delay: Duration::from_millis(env_number(
                "NOTIFY_RETRY_DELAY_MS",
                defaults.retry_delay.as_millis() as u64,
            )),
            fallback_url: env_string("NOTIFY_FALLBACK_URL")
                .map(|url| url.trim_end_matches('/').to_string()),
            timeout: Duration::from_secs(env_number(
                "NOTIFY_TIMEOUT_SECS",
                defaults.timeout.as_secs(),
            )),
        }
    }

    pub fn validate(&self) -> WorkerResult<()> {
        if self.max_retries == 0 {
            return Err(WorkerError::config_error("NOTIFY_MAX_RETRIES must be at least 1"));
        }
        if let Some(raw) = &self.fallback_url {
            let parsed = url::Url::parse(raw).map_err(|e| {
                WorkerError::config_error(format!("NOTIFY_FALLBACK_URL is not a valid URL: {}", e))
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(WorkerError::config_error(format!(
                    "NOTIFY_FALLBACK_URL must use http or https, got {}",
                    parsed.scheme()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: &[&str] = &[
        "WORKER_MAX_JOBS",
        "WORKER_VIDEO_ROOTS",
        "WORKER_DEFAULT_FPS",
        "WORKER_OPTIMIZED_FPS",
        "WORKER_WORK_DIR",
        "FIRESTORE_COLLECTION",
        "NOTIFY_MAX_RETRIES",
        "NOTIFY_RETRY_DELAY_MS",
        "NOTIFY_FALLBACK_URL",
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
        let config = WorkerConfig::from_env();
        assert_eq!(config, WorkerConfig::default());
        assert!(config.validate().is_ok());
        assert_eq!(NotifierConfig::from_env(), NotifierConfig::default());
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        std::env::set_var("WORKER_MAX_JOBS", "8");
        std::env::set_var("WORKER_VIDEO_ROOTS", "/mnt/a, /mnt/b,,");
        std::env::set_var("WORKER_WORK_DIR", "/scratch");
        std::env::set_var("NOTIFY_FALLBACK_URL", "http://api.local/");
        std::env::set_var("NOTIFY_RETRY_DELAY_MS", "250");

        let config = WorkerConfig::from_env();
        assert_eq!(config.max_concurrent_jobs, 8);
        assert_eq!(
            config.video_roots,
            vec![PathBuf::from("/mnt/a"), PathBuf::from("/mnt/b")]
        );
        assert_eq!(config.work_dir, PathBuf::from("/scratch"));

        let notifier = NotifierConfig::from_env();
        assert_eq!(notifier.fallback_url.as_deref(), Some("http://api.local"));
        assert_eq!(notifier.retry_delay, Duration::from_millis(250));
        assert!(notifier.validate().is_ok());
        clear_env();
    }

    #[test]
    fn test_validate_rejects_bad_fps() {
        let zero = WorkerConfig {
            default_fps: 0.0,
            ..WorkerConfig::default()
        };
        assert!(matches!(zero.validate(), Err(WorkerError::ConfigError(_))));

        let nan = WorkerConfig {
            optimized_fps: f64::NAN,
            ..WorkerConfig::default()
        };
        assert!(nan.validate().is_err());

        let inverted = WorkerConfig {
            default_fps: 0.5,
            optimized_fps: 1.0,
            ..WorkerConfig::default()
        };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let config = WorkerConfig {
            max_concurrent_jobs: 0,
            ..WorkerConfig::default()
        };
        assert!(config.validate().is_err());

        let config = WorkerConfig {
            max_frame_decoders: 0,
            ..WorkerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_claim_idle_outlasts_processing() {
        assert!(WorkerConfig::default().validate().is_ok());

        let short_idle = WorkerConfig {
            claim_min_idle: Duration::from_secs(300),
            ..WorkerConfig::default()
        };
        assert!(matches!(
            short_idle.validate(),
            Err(WorkerError::ConfigError(_))
        ));

        let exact = WorkerConfig {
            ffmpeg_timeout: Duration::from_secs(100),
            probe_timeout: Duration::from_secs(20),
            claim_min_idle: Duration::from_secs(120),
            ..WorkerConfig::default()
        };
        assert!(exact.validate().is_err());

        let slow_tick = WorkerConfig {
            claim_interval: Duration::from_secs(3000),
            ..WorkerConfig::default()
        };
        assert!(slow_tick.validate().is_err());
    }

    #[test]
    fn test_select_fps_uses_threshold() {
        let config = WorkerConfig::default();
        assert_eq!(config.select_fps(10), 1.0);
        assert_eq!(config.select_fps(600), 1.0);
        assert_eq!(config.select_fps(601), 0.5);
    }

    #[test]
    fn test_notifier_validate_rejects_bad_url() {
        let config = NotifierConfig {
            fallback_url: Some("not a url".into()),
            ..NotifierConfig::default()
        };
        assert!(config.validate().is_err());

        let config = NotifierConfig {
            fallback_url: Some("ftp://files.local".into()),
            ..NotifierConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
