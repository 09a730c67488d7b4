use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use kube::Client;
use pod_image_aging::controller::PodImageAgeController;
use pod_image_aging::controller_manager::{ControllerManager, ManagerConfig};
use pod_image_aging::inspector::RegistryInspector;
use pod_image_aging::metrics::ImageAgeMetrics;
use pod_image_aging::opts::Opts;
use pod_image_aging::resolver::{CreationCache, ImageAgeResolver};
use pod_image_aging::serve;
use pod_image_aging::store::{KubeStore, ObjectStore};
use tracing::metadata::LevelFilter;
use tracing::{error, info, warn};
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let opts = Opts::parse();

    let log_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(fmt::layer().with_ansi(true))
        .with(log_filter)
        .init();

    match run(opts).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Exiting");
            ExitCode::FAILURE
        }
    }
}

async fn run(opts: Opts) -> pod_image_aging::Result<()> {
    info!(?opts, "Running with config");

    let filters = opts.filter_spec();
    if !filters.errors().is_empty() {
        warn!(
            invalid = filters.errors().len(),
            "Some filter patterns were dropped and match nothing"
        );
    }

    let client = Client::try_default().await?;
    let store: Arc<dyn ObjectStore> = Arc::new(KubeStore::new(client.clone()));
    let inspector = Arc::new(RegistryInspector::from_auth_config(
        opts.auth_config.as_deref(),
    )?);
    let resolver = ImageAgeResolver::new(Arc::new(CreationCache::new()), inspector)
        .with_ttl(opts.cache_ttl)
        .with_timeout(opts.inspect_timeout);
    let metrics = Arc::new(ImageAgeMetrics::new()?);
    let controller = Arc::new(
        PodImageAgeController::new(Arc::clone(&store), resolver, filters)
            .with_metrics(Arc::clone(&metrics)),
    );

    let server = tokio::spawn(serve::serve(
        opts.metrics_bind_address,
        Arc::clone(&metrics),
    ));

    let manager = ControllerManager::new(
        client,
        store,
        controller,
        metrics,
        ManagerConfig {
            concurrency: opts.concurrency(),
            error_requeue: opts.error_requeue,
            metrics_interval: opts.metrics_interval,
            cache_sweep_interval: opts.cache_sweep_interval,
        },
    );
    manager.run().await;

    server.abort();
    Ok(())
}
