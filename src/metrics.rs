//! Per namespace gauges summarising how old the running images are.
//!
//! The gauges are computed from the reports already stored on pods, so they
//! can be rebuilt at any time without talking to a registry.

use std::collections::BTreeSet;
use std::sync::{PoisonError, RwLock};

use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::error::Result;
use crate::report::WorkloadImageReport;
use crate::store::ObjectStore;
use crate::utils::now;

pub const METRICS_PREFIX: &str = "pod_image_aging";

/// Ages in seconds of the images in one namespace.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AgeSummary {
    pub oldest_seconds: f64,
    pub youngest_seconds: f64,
    pub average_seconds: f64,
}

/// Summarise creation times relative to `now`, `None` if there are none.
pub fn summarize(created: &[OffsetDateTime], now: OffsetDateTime) -> Option<AgeSummary> {
    if created.is_empty() {
        return None;
    }
    let ages = created
        .iter()
        .map(|c| (now - *c).as_seconds_f64())
        .collect::<Vec<_>>();
    let oldest = ages.iter().copied().fold(f64::MIN, f64::max);
    let youngest = ages.iter().copied().fold(f64::MAX, f64::min);
    let average = ages.iter().sum::<f64>() / ages.len() as f64;
    Some(AgeSummary {
        oldest_seconds: oldest,
        youngest_seconds: youngest,
        average_seconds: average,
    })
}

pub struct ImageAgeMetrics {
    registry: Registry,
    oldest: GaugeVec,
    youngest: GaugeVec,
    average: GaugeVec,
    namespaces: RwLock<BTreeSet<String>>,
}

impl ImageAgeMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let oldest = gauge(
            &registry,
            "oldest_seconds",
            "The number of seconds since the oldest image in the namespace was created",
        )?;
        let youngest = gauge(
            &registry,
            "youngest_seconds",
            "The number of seconds since the youngest image in the namespace was created",
        )?;
        let average = gauge(
            &registry,
            "average_seconds",
            "The average number of seconds since the images in the namespace were created",
        )?;
        Ok(Self {
            registry,
            oldest,
            youngest,
            average,
            namespaces: RwLock::default(),
        })
    }

    /// Remember `namespace` so periodic refreshes keep its gauges current.
    pub fn track(&self, namespace: &str) {
        let known = self
            .namespaces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(namespace);
        if !known {
            self.namespaces
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(namespace.to_owned());
        }
    }

    pub fn tracked_namespaces(&self) -> Vec<String> {
        self.namespaces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Recompute the gauges of `namespace` from the reports on its pods.
    ///
    /// When no pod carries a report the gauges keep their previous values.
    /// A single malformed report fails the whole update.
    pub async fn update(
        &self,
        store: &dyn ObjectStore,
        namespace: &str,
    ) -> Result<Option<AgeSummary>> {
        let pods = store.list_pods(namespace).await?;
        let mut created = Vec::new();
        for pod in &pods {
            if let Some(report) = WorkloadImageReport::from_pod(pod)? {
                created.extend(report.containers.iter().map(|c| c.created_at));
            }
        }

        let Some(summary) = summarize(&created, now()) else {
            debug!(namespace, "No image reports in namespace");
            return Ok(None);
        };
        self.oldest
            .with_label_values(&[namespace])
            .set(summary.oldest_seconds);
        self.youngest
            .with_label_values(&[namespace])
            .set(summary.youngest_seconds);
        self.average
            .with_label_values(&[namespace])
            .set(summary.average_seconds);
        debug!(namespace, ?summary, images = created.len(), "Updated image age metrics");
        Ok(Some(summary))
    }

    /// Update every tracked namespace, a failing namespace does not stop the others.
    pub async fn refresh_all(&self, store: &dyn ObjectStore) {
        for namespace in self.tracked_namespaces() {
            if let Err(error) = self.update(store, &namespace).await {
                warn!(namespace, %error, "Failed to update image age metrics");
            }
        }
    }

    /// Render the registry in the Prometheus text format.
    pub fn encode(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<GaugeVec> {
    let gauge = GaugeVec::new(
        Opts::new(format!("{METRICS_PREFIX}_{name}"), help),
        &["namespace"],
    )?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test_log::test]
    fn summary_of_nothing_is_none() {
        assert_eq!(summarize(&[], now()), None);
    }

    #[test_log::test]
    fn summary_math() {
        let now = datetime!(2024-06-01 00:00:00 UTC);
        let created = [
            datetime!(2024-05-31 00:00:00 UTC),
            datetime!(2024-05-01 00:00:00 UTC),
            datetime!(2024-05-31 12:00:00 UTC),
        ];
        let summary = summarize(&created, now).unwrap();
        let day = 86_400.0;
        assert_eq!(summary.oldest_seconds, 31.0 * day);
        assert_eq!(summary.youngest_seconds, 0.5 * day);
        assert_eq!(summary.average_seconds, (31.0 + 1.0 + 0.5) * day / 3.0);
    }

    #[test_log::test]
    fn gauges_are_registered_and_exported() {
        let metrics = ImageAgeMetrics::new().unwrap();
        metrics.oldest.with_label_values(&["default"]).set(10.0);

        let text = metrics.encode().unwrap();
        assert!(text.contains("pod_image_aging_oldest_seconds{namespace=\"default\"} 10"), "{text}");
    }

    #[test_log::test]
    fn tracked_namespaces_are_deduplicated_and_sorted() {
        let metrics = ImageAgeMetrics::new().unwrap();
        metrics.track("b");
        metrics.track("a");
        metrics.track("b");
        assert_eq!(metrics.tracked_namespaces(), vec!["a", "b"]);
    }
}
