use std::error::Error;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tombstone_cascade::backend::{Dataset, MemoryBackend};
use tombstone_cascade::cascade::CascadeEngine;
use tombstone_cascade::config::{CascadeConfig, KillSwitch};
use tombstone_cascade::metrics::TracingMetrics;
use tombstone_cascade::persistence::FileWatermarkStore;
use tombstone_cascade::registry::RelationRegistry;
use tombstone_cascade::server::{AppState, build_router};
use tombstone_cascade::worker::{CascadeWorker, TokioJobQueue, TriggerConfig, run_trigger};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tombstone_cascade=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = CascadeConfig::from_env();
    config.log_summary();

    let registry = Arc::new(RelationRegistry::load(&config.registry_path)?);
    info!(relations = registry.len(), "Loaded relation registry");

    std::fs::create_dir_all(&config.state_dir)?;
    let store = Arc::new(FileWatermarkStore::open(config.watermark_path())?);

    let backend = match &config.dataset_path {
        Some(path) => {
            let dataset: Dataset = serde_json::from_slice(&std::fs::read(path)?)?;
            info!(path = %path.display(), "Seeded backend from dataset");
            MemoryBackend::from_dataset(dataset)
        }
        None => MemoryBackend::new(),
    };
    backend.provision(&registry);

    let (queue, rx) = TokioJobQueue::channel();
    let queue = Arc::new(queue);
    let kill_switch = KillSwitch::new(config.kill_switch);

    let engine = Arc::new(CascadeEngine::new(
        Arc::clone(&registry),
        Arc::new(backend),
        Arc::clone(&store),
        Arc::clone(&queue),
        Arc::new(TracingMetrics),
        config.cascade_settings(),
    ));

    let shutdown = CancellationToken::new();

    let worker = CascadeWorker::new(engine, Arc::clone(&queue), kill_switch.clone(), config.retry);
    let worker_handle = tokio::spawn(worker.run(rx, shutdown.clone()));

    let trigger_config = TriggerConfig::new(config.schedule_interval);
    let triggers: Vec<_> = config
        .silos
        .iter()
        .map(|silo| {
            tokio::spawn(run_trigger(
                Arc::clone(&queue),
                *silo,
                trigger_config,
                shutdown.clone(),
            ))
        })
        .collect();

    let app = build_router(AppState::new(registry, store, queue, kill_switch));
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!(addr = %config.bind_addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    for trigger in triggers {
        if let Err(e) = trigger.await {
            error!(error = %e, "Trigger task failed");
        }
    }
    worker_handle.await?;

    info!("Shut down cleanly");
    Ok(())
}

/// Resolves on Ctrl-C, or when `token` is cancelled elsewhere, and cancels
/// `token` so every task sees the shutdown.
async fn shutdown_signal(token: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => info!("Ctrl-C received, shutting down"),
                Err(e) => error!(error = %e, "Failed to listen for Ctrl-C, shutting down"),
            }
        }
        _ = token.cancelled() => {}
    }
    token.cancel();
}
