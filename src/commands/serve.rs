//! Consumer runner.
//!
//! CLI command: `serve --brokers ... --topics ... --route topic=service`

use crate::config::{ConfigFile, ServeSettings};
use crate::ServeArgs;
use anyhow::Context;
use seal_runner_kafka::AvroConsumer;
use seal_runner_services::{Dispatcher, ServiceRegistry};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub async fn run(args: &ServeArgs, file: &ConfigFile) -> anyhow::Result<()> {
    let settings = ServeSettings::resolve(args, file)?;

    info!("Starting consumer runner");
    info!("Brokers: {}", settings.consumer.brokers);
    info!("Topics: {}", settings.consumer.topics.join(","));
    info!("Error policy: {}", settings.consumer.on_error);

    let dispatcher = build_dispatcher(&settings)?;
    let consumer = AvroConsumer::connect(&settings.consumer, dispatcher)
        .context("Failed to create Kafka consumer")?;

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    consumer
        .run(shutdown)
        .await
        .context("Consumer runner stopped")?;

    info!("Consumer runner stopped");
    Ok(())
}

/// Registry of every built-in service behind the configured routes.
pub fn build_dispatcher(settings: &ServeSettings) -> anyhow::Result<Arc<Dispatcher>> {
    let registry = Arc::new(ServiceRegistry::with_all(&settings.services)?);

    for topic in &settings.consumer.topics {
        if !settings.routes.contains_key(topic) {
            warn!(topic = %topic, "Topic has no route, its messages will fail dispatch");
        }
    }

    let dispatcher = Dispatcher::new(registry, settings.routes.clone(), settings.job_timeout)
        .context("Invalid routes")?;
    Ok(Arc::new(dispatcher))
}

/// Cancel `shutdown` on SIGINT or SIGTERM.
async fn cancel_on_signal(shutdown: CancellationToken) {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for interrupt signal: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for terminate signal: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => info!("Received interrupt signal, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
    shutdown.cancel();
}
