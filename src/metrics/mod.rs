//! Prometheus metrics of subscription workers.
//!
//! Every metric is labelled by subscription name. The collectors live in a
//! crate-local [`REGISTRY`] served on `/metrics` by
//! [`start_metrics_server`] when monitoring is enabled.


use lazy_static::lazy_static;
use prometheus::exponential_buckets;
use prometheus::Encoder;
use prometheus::HistogramOpts;
use prometheus::HistogramVec;
use prometheus::IntCounterVec;
use prometheus::IntGaugeVec;
use prometheus::Opts;
use prometheus::Registry;
use tokio::sync::watch;
use tracing::error;
use tracing::info;
use warp::Filter;
use warp::Rejection;
use warp::Reply;

lazy_static! {
    pub static ref BATCHES_PROCESSED: IntCounterVec = IntCounterVec::new(
        Opts::new("subscription_batches_processed", "Batches handed to the batch processor"),
        &["subscription"]
    )
    .expect("metric can not be created");

    pub static ref ITEMS_PROCESSED: IntCounterVec = IntCounterVec::new(
        Opts::new("subscription_items_processed", "Documents handed to the batch processor"),
        &["subscription"]
    )
    .expect("metric can not be created");

    pub static ref ACKNOWLEDGMENTS: IntCounterVec = IntCounterVec::new(
        Opts::new("subscription_acknowledgments", "Batches acknowledged to the server"),
        &["subscription"]
    )
    .expect("metric can not be created");

    pub static ref CONNECTION_RETRIES: IntCounterVec = IntCounterVec::new(
        Opts::new("subscription_connection_retries", "Reconnect attempts after a recoverable failure"),
        &["subscription"]
    )
    .expect("metric can not be created");

    pub static ref SUBSCRIBER_ERRORS: IntCounterVec = IntCounterVec::new(
        Opts::new("subscription_subscriber_errors", "Batch processor failures"),
        &["subscription", "ignored"]
    )
    .expect("metric can not be created");

    pub static ref ACTIVE_WORKERS: IntGaugeVec = IntGaugeVec::new(
        Opts::new("subscription_active_workers", "Workers currently running"),
        &["subscription"]
    )
    .expect("metric can not be created");

    pub static ref BATCH_PROCESSING_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "subscription_batch_processing_duration_ms",
            "Time spent in the batch processor in ms"
        )
        .buckets(exponential_buckets(1.0, 2.0, 16).expect("valid buckets")),
        &["subscription"]
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

/// Register every subscription metric into `registry`
pub fn register_custom_metrics(registry: &Registry) -> prometheus::Result<()> {
    registry.register(Box::new(BATCHES_PROCESSED.clone()))?;
    registry.register(Box::new(ITEMS_PROCESSED.clone()))?;
    registry.register(Box::new(ACKNOWLEDGMENTS.clone()))?;
    registry.register(Box::new(CONNECTION_RETRIES.clone()))?;
    registry.register(Box::new(SUBSCRIBER_ERRORS.clone()))?;
    registry.register(Box::new(ACTIVE_WORKERS.clone()))?;
    registry.register(Box::new(BATCH_PROCESSING_DURATION.clone()))?;
    Ok(())
}

/// Serve `/metrics` on `port` until `shutdown_signal` fires
pub async fn start_metrics_server(
    port: u16,
    mut shutdown_signal: watch::Receiver<()>,
) {
    if let Err(e) = register_custom_metrics(&REGISTRY) {
        // Already registered by an earlier server in this process
        info!("metrics registration skipped: {}", e);
    }

    let metrics_route = warp::path!("metrics").and_then(metrics_handler);

    info!("serving metrics on 0.0.0.0:{}", port);
    let (_, server) = warp::serve(metrics_route).bind_with_graceful_shutdown(([0, 0, 0, 0], port), async move {
        let _ = shutdown_signal.changed().await;
    });
    server.await;
}

async fn metrics_handler() -> Result<impl Reply, Rejection> {
    Ok(encode_metrics(&REGISTRY))
}

/// Text exposition of everything gathered by `registry`
pub fn encode_metrics(registry: &Registry) -> String {
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
        error!("could not encode custom metrics: {}", e);
    }
    match String::from_utf8(buffer) {
        Ok(body) => body,
        Err(e) => {
            error!("custom metrics could not be from_utf8'd: {}", e);
            String::default()
        }
    }
}
