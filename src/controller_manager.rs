use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::controller::{self, Action};
use kube::runtime::{watcher, Controller as KubeController};
use kube::{Api, Client, ResourceExt};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::controller::{Controller, PodImageAgeController};
use crate::error::Error;
use crate::metrics::ImageAgeMetrics;
use crate::resolver::CreationCache;
use crate::store::ObjectStore;

#[derive(Clone, Debug)]
pub struct ManagerConfig {
    pub concurrency: u16,
    pub error_requeue: Duration,
    pub metrics_interval: Duration,
    pub cache_sweep_interval: Duration,
}

struct Context {
    controller: Arc<PodImageAgeController>,
    error_requeue: Duration,
}

/// Drives the pod controller from a watch on all pods in the cluster and runs
/// the periodic housekeeping next to it.
pub struct ControllerManager {
    client: Client,
    store: Arc<dyn ObjectStore>,
    controller: Arc<PodImageAgeController>,
    metrics: Arc<ImageAgeMetrics>,
    config: ManagerConfig,
}

impl ControllerManager {
    pub fn new(
        client: Client,
        store: Arc<dyn ObjectStore>,
        controller: Arc<PodImageAgeController>,
        metrics: Arc<ImageAgeMetrics>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            client,
            store,
            controller,
            metrics,
            config,
        }
    }

    /// Run until a termination signal is received.
    pub async fn run(self) {
        let shutdown = Arc::new(AtomicBool::new(false));
        let handles = vec![
            tokio::spawn(metrics_loop(
                Arc::clone(&self.metrics),
                Arc::clone(&self.store),
                self.config.metrics_interval,
                Arc::clone(&shutdown),
            )),
            tokio::spawn(cache_sweep_loop(
                Arc::clone(self.controller.resolver().cache()),
                self.config.cache_sweep_interval,
                Arc::clone(&shutdown),
            )),
        ];

        let name = self.controller.name();
        info!(name, concurrency = self.config.concurrency, "Starting controller");
        let context = Arc::new(Context {
            controller: Arc::clone(&self.controller),
            error_requeue: self.config.error_requeue,
        });
        let pods = Api::<Pod>::all(self.client.clone());
        KubeController::new(pods, watcher::Config::default())
            .with_config(controller::Config::default().concurrency(self.config.concurrency))
            .shutdown_on_signal()
            .run(reconcile, error_policy, context)
            .for_each(|result| async move {
                match result {
                    Ok((object, _)) => debug!(%object, "Reconciled"),
                    Err(error) => debug!(%error, "Reconciliation did not complete"),
                }
            })
            .await;

        shutdown.store(true, Ordering::Relaxed);
        stop(handles).await;
        info!(name, "Stopping controller");
    }
}

async fn stop(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        handle.abort();
        if let Err(error) = handle.await {
            if !error.is_cancelled() {
                warn!(%error, "Background task failed");
            }
        }
    }
}

async fn reconcile(pod: Arc<Pod>, context: Arc<Context>) -> Result<Action, Error> {
    let namespace = pod.namespace().unwrap_or_default();
    let name = pod.name_any();
    let outcome = context.controller.reconcile(&namespace, &name).await?;
    debug!(namespace, pod = name, ?outcome, "Finished processing pod");
    Ok(Action::await_change())
}

fn error_policy(pod: Arc<Pod>, error: &Error, context: Arc<Context>) -> Action {
    warn!(
        namespace = pod.namespace().unwrap_or_default(),
        pod = pod.name_any(),
        %error,
        "Failed to record image ages, retrying"
    );
    Action::requeue(context.error_requeue)
}

async fn metrics_loop(
    metrics: Arc<ImageAgeMetrics>,
    store: Arc<dyn ObjectStore>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        metrics.refresh_all(store.as_ref()).await;
    }
}

async fn cache_sweep_loop(cache: Arc<CreationCache>, interval: Duration, shutdown: Arc<AtomicBool>) {
    let mut ticker = tokio::time::interval(interval);
    // the first tick completes immediately and there is nothing to sweep yet
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        let evicted = cache.evict_expired();
        debug!(evicted, remaining = cache.len(), "Swept image cache");
    }
}
