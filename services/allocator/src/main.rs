//! yarnscale allocator
//!
//! Runs the allocation controller against the in-process cluster manager.
//! The pool is reconciled to `YARNSCALE_INITIAL_CONTAINERS` at startup and
//! every container is released on Ctrl-C.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use yarnscale_allocator::simulated::{SimulatedClusterManager, SimulationConfig};
use yarnscale_allocator::{Config, Controller};
use yarnscale_events::BroadcastBus;

/// Upper bound on waiting for release acknowledgments at shutdown.
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        app_name = %config.app_name,
        memory_mb = config.container.memory_mb,
        vcores = config.container.vcores,
        heap_ratio = config.sizing.heap_ratio,
        overhead_mb = config.sizing.overhead_mb,
        release_cache_ttl_secs = config.release_cache_ttl.as_secs(),
        "Configuration loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (cluster, notifications) = SimulatedClusterManager::new(SimulationConfig::default());
    let bus = Arc::new(BroadcastBus::new(config.app_name.clone()));
    let controller = Arc::new(
        Controller::new(config.clone(), cluster, bus.clone())
            .context("invalid container configuration")?,
    );

    // Log every published event
    let mut events = bus.subscribe();
    let events_handle = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(envelope) => match envelope.to_json() {
                    Ok(json) => info!(
                        event_id = %envelope.event_id,
                        event_type = %envelope.event_type,
                        container_id = ?envelope.payload.container_id(),
                        event = %json,
                        "Container event"
                    ),
                    Err(e) => warn!(event_id = %envelope.event_id, error = %e, "Failed to encode event"),
                },
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event logger lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let notifications_handle = tokio::spawn({
        let controller = Arc::clone(&controller);
        let shutdown_rx = shutdown_rx.clone();
        async move { controller.run_notifications(notifications, shutdown_rx).await }
    });

    let outcome = controller
        .reconcile(i32::try_from(config.initial_containers)?, &HashSet::new())
        .await?;
    info!(target = outcome.target, current = outcome.current, "Initial reconciliation submitted");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = notifications_handle => {
            if let Err(e) = result {
                error!(error = %e, "Notification task panicked");
            }
        }
    }

    if let Err(e) = controller.shutdown().await {
        warn!(error = %e, "Not every container could be released");
    }

    // Keep handling notifications until every release is acknowledged.
    let drained = tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, async {
        while !controller.records().is_empty() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    if drained.is_err() {
        warn!(
            pending = controller.records().len(),
            "Timed out waiting for release acknowledgments"
        );
    }
    let _ = shutdown_tx.send(true);
    events_handle.abort();

    info!(remaining = controller.current_count(), "Allocator shutdown complete");
    Ok(())
}
