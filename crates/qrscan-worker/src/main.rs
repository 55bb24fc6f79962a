//! QR video analysis worker binary.

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use qrscan_firestore::{FirestoreClient, VideoResultRepository};
use qrscan_media::{FfmpegAnalyzer, FramePipeline, QrDecoder};
use qrscan_queue::{NotificationChannel, QueueConfig, VideoQueue};
use qrscan_worker::{
    health, metrics, DeliveryHandler, FallbackTransport, HttpFallback, MessageHandler, Notifier,
    NotifierConfig, ResultStore, RetryPolicy, TaskQueue, VideoExecutor, VideoOrchestrator,
    WorkerConfig,
};

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,qrscan_worker=info,qrscan_queue=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider was already installed");
    }

    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting qrscan-worker");

    let config = WorkerConfig::from_env();
    let notifier_config = NotifierConfig::from_env();
    let queue_config = QueueConfig::from_env();
    if let Err(e) = config.validate().and_then(|_| notifier_config.validate()) {
        error!("Invalid configuration: {}", e);
        std::process::exit(2);
    }
    info!("Worker config: {:?}", config);

    if let Err(e) = metrics::init_metrics(config.metrics_port) {
        warn!("Metrics exporter disabled: {}", e);
    }

    let health_port = config.health_port;
    tokio::spawn(async move {
        if let Err(e) = health::serve(health_port).await {
            error!("Health endpoint stopped: {}", e);
        }
    });

    let consumer_name = format!("qrscan-worker-{}", Uuid::new_v4());
    let queue = match VideoQueue::new(queue_config.clone(), consumer_name) {
        Ok(q) => q,
        Err(e) => {
            error!("Failed to create video queue: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = queue.connect().await {
        error!("Broker unavailable: {}", e);
        std::process::exit(1);
    }

    let firestore = match FirestoreClient::from_env().await {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to create Firestore client: {}", e);
            std::process::exit(1);
        }
    };
    let store: Arc<dyn ResultStore> = Arc::new(VideoResultRepository::with_collection(
        firestore,
        config.results_collection.clone(),
    ));
    let created = store.ensure_indexes().await;
    info!(created, "Result store indexes ensured");

    let channel = match NotificationChannel::new(&queue_config.redis_url) {
        Ok(channel) => Arc::new(channel),
        Err(e) => {
            error!("Failed to create notification channel: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = channel.connect().await {
        warn!("Notification channel unavailable, notifications degraded: {}", e);
    }

    let fallback: Option<Arc<dyn FallbackTransport>> = match &notifier_config.fallback_url {
        Some(url) => match HttpFallback::new(url.clone(), notifier_config.timeout) {
            Ok(fallback) => Some(Arc::new(fallback)),
            Err(e) => {
                warn!("HTTP fallback disabled: {}", e);
                None
            }
        },
        None => None,
    };
    let notifier = Arc::new(Notifier::new(&notifier_config, channel.clone(), fallback));

    let decoders = FramePipeline::decoder_limit(config.max_frame_decoders);
    let pipeline = FramePipeline::new(Arc::new(QrDecoder::new()), decoders, config.ffmpeg_timeout);
    let analyzer = Arc::new(FfmpegAnalyzer::new(pipeline, config.probe_timeout));

    let orchestrator = Arc::new(VideoOrchestrator::new(config.clone(), store, analyzer));
    let handler: Arc<dyn DeliveryHandler> = Arc::new(MessageHandler::new(
        orchestrator,
        notifier,
        RetryPolicy::new(queue_config.max_retries),
    ));
    let queue: Arc<dyn TaskQueue> = Arc::new(queue);
    let executor = Arc::new(
        VideoExecutor::new(config, queue, handler).with_notification_channel(channel),
    );

    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Received shutdown signal");
        signal_executor.shutdown();
    });

    if let Err(e) = executor.run().await {
        error!("Executor error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}
