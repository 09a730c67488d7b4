use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use tracing::{debug, info};

use crate::controller::util::{self, ContainerImage};
use crate::controller::Controller;
use crate::error::{Error, Result};
use crate::filter::FilterSpec;
use crate::metrics::ImageAgeMetrics;
use crate::platform::Platform;
use crate::report::{self, ContainerRecord, WorkloadImageReport, STATUS_ANNOTATION};
use crate::resolver::ImageAgeResolver;
use crate::store::ObjectStore;

/// How a single delivery for a pod ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The pod no longer exists.
    NotFound,
    /// The pod already carries a report.
    AlreadyProcessed,
    Ignored,
    Terminating,
    NotRunning,
    NamespaceFiltered,
    /// The pod has not been bound to a node yet.
    Unscheduled,
    /// The named container has not reported the image it runs yet.
    ContainersPending(String),
    /// Every container was filtered out.
    NothingToReport,
    Processed(WorkloadImageReport),
}

/// Records the creation time of the images each running pod uses.
pub struct PodImageAgeController {
    store: Arc<dyn ObjectStore>,
    resolver: ImageAgeResolver,
    filters: FilterSpec,
    metrics: Option<Arc<ImageAgeMetrics>>,
}

impl PodImageAgeController {
    pub fn new(store: Arc<dyn ObjectStore>, resolver: ImageAgeResolver, filters: FilterSpec) -> Self {
        Self {
            store,
            resolver,
            filters,
            metrics: None,
        }
    }

    /// Register the namespace of every pod carrying a report with `metrics`,
    /// whose periodic refresh then keeps its gauges current.
    pub fn with_metrics(mut self, metrics: Arc<ImageAgeMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn resolver(&self) -> &ImageAgeResolver {
        &self.resolver
    }

    async fn resolve_all(
        &self,
        images: &[ContainerImage<'_>],
        platform: &Platform,
    ) -> Result<Vec<ContainerRecord>> {
        let mut records = Vec::with_capacity(images.len());
        for image in images {
            // callers only pass containers with an image id
            let image_id = image.image_id.unwrap_or_default();
            let created_at = self.resolver.resolve(image_id, platform).await?;
            records.push(ContainerRecord {
                name: image.name.to_owned(),
                created_at,
            });
        }
        Ok(records)
    }

    fn eligible<'a>(&self, images: Vec<ContainerImage<'a>>) -> Vec<ContainerImage<'a>> {
        images
            .into_iter()
            .filter(|image| {
                let keep = self.filters.should_process_image(image.image);
                if !keep {
                    debug!(container = image.name, image = image.image, "Skipping filtered image");
                }
                keep
            })
            .collect()
    }

    async fn commit(&self, pod: &Pod, report: &WorkloadImageReport) -> Result<()> {
        let annotations = BTreeMap::from([(STATUS_ANNOTATION.to_owned(), report.encode()?)]);
        self.store.patch_pod_annotations(pod, annotations).await
    }

    fn track_namespace(&self, namespace: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.track(namespace);
        }
    }
}

fn ineligible(pod: &Pod) -> Option<ReconcileOutcome> {
    if report::is_ignored(pod) {
        Some(ReconcileOutcome::Ignored)
    } else if util::is_terminating(pod) {
        Some(ReconcileOutcome::Terminating)
    } else if !util::is_running(pod) {
        Some(ReconcileOutcome::NotRunning)
    } else {
        None
    }
}

#[async_trait]
impl Controller for PodImageAgeController {
    type Outcome = ReconcileOutcome;

    async fn reconcile(&self, namespace: &str, name: &str) -> Result<ReconcileOutcome> {
        let Some(pod) = self.store.get_pod(namespace, name).await? else {
            debug!(namespace, pod = name, "Pod no longer exists");
            return Ok(ReconcileOutcome::NotFound);
        };

        if report::has_report(&pod) {
            // reports written before a restart still feed the gauges
            self.track_namespace(namespace);
            return Ok(ReconcileOutcome::AlreadyProcessed);
        }

        if let Some(outcome) = ineligible(&pod) {
            debug!(namespace, pod = name, ?outcome, "Pod is not eligible");
            return Ok(outcome);
        }

        if !self.filters.should_process_namespace(namespace) {
            debug!(namespace, pod = name, "Namespace is filtered out");
            return Ok(ReconcileOutcome::NamespaceFiltered);
        }

        let Some(node_name) = util::node_name(&pod) else {
            debug!(namespace, pod = name, "Pod is not scheduled yet");
            return Ok(ReconcileOutcome::Unscheduled);
        };
        let node = self
            .store
            .get_node(node_name)
            .await?
            .ok_or_else(|| Error::NodeNotFound(node_name.to_owned()))?;
        let platform =
            Platform::from_node(&node).ok_or_else(|| Error::UnknownPlatform(node_name.to_owned()))?;

        let spec = pod.spec.clone().unwrap_or_default();
        let status = pod.status.clone().unwrap_or_default();
        let container_statuses = status.container_statuses.unwrap_or_default();
        let init_container_statuses = status.init_container_statuses.unwrap_or_default();
        let init_containers = spec.init_containers.unwrap_or_default();

        let containers = self.eligible(util::container_images(&spec.containers, &container_statuses));
        let init_containers =
            self.eligible(util::container_images(&init_containers, &init_container_statuses));

        if let Some(pending) = containers
            .iter()
            .chain(init_containers.iter())
            .find(|image| image.image_id.is_none())
        {
            debug!(namespace, pod = name, container = pending.name, "Container image not reported yet");
            return Ok(ReconcileOutcome::ContainersPending(pending.name.to_owned()));
        }

        if containers.is_empty() && init_containers.is_empty() {
            debug!(namespace, pod = name, "No containers left to report after filtering");
            return Ok(ReconcileOutcome::NothingToReport);
        }

        // any failure aborts before anything is written
        let report = WorkloadImageReport {
            containers: self.resolve_all(&containers, &platform).await?,
            init_containers: self.resolve_all(&init_containers, &platform).await?,
        };

        self.commit(&pod, &report).await?;
        info!(
            namespace,
            pod = name,
            containers = report.containers.len(),
            init_containers = report.init_containers.len(),
            "Recorded image ages"
        );

        self.track_namespace(namespace);
        Ok(ReconcileOutcome::Processed(report))
    }

    fn name(&self) -> String {
        "PodImageAge".to_owned()
    }
}
