//! Standalone anchor-worker process: runs an [`AnchorScheduler`] against a
//! file-backed ASR store, closing and anchoring batches on its poll
//! interval until the process receives a shutdown signal, at which point it
//! drains whatever batch is still open so nothing is left unanchored.

use std::sync::Arc;

use pulsar_sentinel::anchor::{AnchorScheduler, NoopAnchorSink};
use pulsar_sentinel::asr::{AsrPipeline, FileAsrStore};
use pulsar_sentinel::config::EnvConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pulsar_sentinel=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = EnvConfig::from_env()?;
    tracing::info!(
        data_dir = %config.data_dir.display(),
        batch_max = config.batch_max,
        batch_max_age = ?config.batch_max_age,
        "anchor worker starting"
    );

    let store = Arc::new(FileAsrStore::new(config.data_dir.clone())?);
    // A real deployment wires in a chain-specific `AnchorSink` behind
    // `RetryingAnchorSink`; this worker defaults to the no-op sink so it
    // runs standalone without network configuration.
    let pipeline = Arc::new(AsrPipeline::new(
        store,
        Arc::new(NoopAnchorSink),
        config.batch_max,
        config.batch_max_age,
    ));
    let scheduler = Arc::new(AnchorScheduler::new(pipeline, config.batch_max_age));

    let run_handle = tokio::spawn(scheduler.clone().run());

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, draining open batch");
    run_handle.abort();
    scheduler.drain().await;
    tracing::info!("anchor worker stopped cleanly");

    Ok(())
}
