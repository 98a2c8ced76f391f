// SPDX-FileCopyrightText: 2026 Flowline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `flowline serve` command implementation.
//!
//! Starts the four pipeline workers on a shared in-process stream transport:
//! the flow engine on the incoming stream, the continuation scheduler, the
//! delivery worker on the outbox, and the webhook dispatcher on the events
//! stream. All four run until a shutdown signal cancels them.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use flowline_config::model::FlowlineConfig;
use flowline_core::FlowlineError;
use flowline_core::metrics::{DeliveryMetrics, EngineMetrics, WebhookMetrics};
use flowline_delivery::DeliveryWorker;
use flowline_engine::{
    EngineWorker, IntentClassifier, Interpreter, NoClassifier, RemoteClassifier, Scheduler,
};
use flowline_storage::Database;
use flowline_transport::MemoryTransport;
use flowline_webhooks::WebhookDispatcher;

use crate::shutdown;

/// Runs the `flowline serve` command.
///
/// Opens storage, wires every worker to the shared transport, and blocks
/// until a shutdown signal drains the loops.
pub async fn run_serve(config: FlowlineConfig) -> Result<(), FlowlineError> {
    init_tracing(&config.log.level);

    info!("starting flowline serve");

    let db = Database::open(&config.storage.database_path).await?;
    info!(path = %config.storage.database_path, "storage ready");

    let transport = Arc::new(MemoryTransport::new());

    let classifier: Arc<dyn IntentClassifier> = match &config.classifier.url {
        Some(url) => {
            info!(url = %url, "using remote intent classifier");
            Arc::new(RemoteClassifier::new(
                url.clone(),
                Duration::from_millis(config.classifier.timeout_ms),
            ))
        }
        None => Arc::new(NoClassifier),
    };

    let engine_metrics = Arc::new(EngineMetrics::new());
    let delivery_metrics = Arc::new(DeliveryMetrics::new());
    let webhook_metrics = Arc::new(WebhookMetrics::new());

    let interpreter = Interpreter::new(
        db.clone(),
        transport.clone(),
        classifier,
        config.engine.clone(),
        engine_metrics.clone(),
    );
    let engine = EngineWorker::new(
        transport.clone(),
        interpreter,
        config.engine.clone(),
        engine_metrics.clone(),
    );
    let scheduler = Scheduler::new(
        db.clone(),
        transport.clone(),
        config.scheduler.clone(),
        engine_metrics.clone(),
    );
    let delivery = DeliveryWorker::new(
        transport.clone(),
        db.clone(),
        config.delivery.clone(),
        delivery_metrics.clone(),
    );
    let dispatcher = WebhookDispatcher::new(
        transport.clone(),
        db.clone(),
        config.webhooks.clone(),
        webhook_metrics.clone(),
    );

    let cancel = shutdown::install_signal_handler();

    let mut handles = Vec::new();
    {
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move { engine.run(cancel).await }));
    }
    {
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move { scheduler.run(cancel).await }));
    }
    {
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move { delivery.run(cancel).await }));
    }
    {
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move { dispatcher.run(cancel).await }));
    }

    info!(
        fake_mode = config.delivery.fake_mode,
        "pipeline workers running"
    );

    futures::future::join_all(handles).await;

    info!("flowline serve shutdown complete");
    Ok(())
}

fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("flowline={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}
