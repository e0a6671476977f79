use std::process::ExitCode;

use docsub::start_metrics_server;
use docsub::Client;
use docsub::Error;
use docsub::Result;
use docsub::SubscriptionBatch;
use docsub::SubscriptionsConfig;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio::sync::watch;
use tracing::error;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let Some(subscription) = std::env::args().nth(1) else {
        eprintln!("usage: docsub <subscription-name>");
        return ExitCode::FAILURE;
    };

    match run(subscription).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("docsub stops: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(subscription: String) -> Result<()> {
    let config = SubscriptionsConfig::new()?.validate()?;

    let (graceful_tx, graceful_rx) = watch::channel(());
    if config.monitoring.prometheus_enabled {
        tokio::spawn(start_metrics_server(config.monitoring.prometheus_port, graceful_rx));
    }

    let client = Client::builder(vec![]).set_config(config).build().await?;
    let worker = client
        .subscriptions()
        .get_subscription_worker_by_name::<serde_json::Value>(&subscription);

    let handle = worker.run(|batch: &SubscriptionBatch<serde_json::Value>| {
        for item in batch.items() {
            println!("{}", item.key);
        }
        Ok::<(), std::convert::Infallible>(())
    })?;
    info!(%subscription, "worker started. Waiting for CTRL+C signal...");

    tokio::select! {
        result = handle => {
            let _ = graceful_tx.send(());
            return result;
        }
        signal = shutdown_signal() => signal?,
    }

    info!("Shutdown worker..");
    worker.close().await;
    let _ = graceful_tx.send(());
    info!("Shutdown completed");
    Ok(())
}

async fn shutdown_signal() -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt()).map_err(|e| Error::Fatal(format!("SIGINT handler: {e}")))?;
    let mut sigterm = signal(SignalKind::terminate()).map_err(|e| Error::Fatal(format!("SIGTERM handler: {e}")))?;
    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT detected.");
        },
        _ = sigterm.recv() => {
            info!("SIGTERM detected.");
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C detected.");
        },
    }
    Ok(())
}
