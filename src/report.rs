//! The image report stored on each processed pod.

use k8s_openapi::api::core::v1::Pod;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{Error, Result};

macro_rules! domain {
    () => {
        "pod-image-aging.hbst.io"
    };
}

pub const DOMAIN: &str = domain!();

/// Annotation holding the JSON encoded [`WorkloadImageReport`].
pub const STATUS_ANNOTATION: &str = concat!(domain!(), "/status");

/// Annotation operators set to `true` to have a pod skipped.
pub const IGNORE_ANNOTATION: &str = concat!(domain!(), "/ignore");

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRecord {
    pub name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadImageReport {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub containers: Vec<ContainerRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub init_containers: Vec<ContainerRecord>,
}

impl WorkloadImageReport {
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Error::ReportEncode)
    }

    /// Decode the report stored on `pod`, if it has one.
    pub fn from_pod(pod: &Pod) -> Result<Option<Self>> {
        let Some(raw) = status_annotation(pod) else {
            return Ok(None);
        };
        serde_json::from_str(raw)
            .map(Some)
            .map_err(|source| Error::ReportDecode {
                namespace: pod.metadata.namespace.clone().unwrap_or_default(),
                name: pod.metadata.name.clone().unwrap_or_default(),
                source,
            })
    }
}

fn annotation<'a>(pod: &'a Pod, key: &str) -> Option<&'a str> {
    pod.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(key))
        .map(String::as_str)
}

fn status_annotation(pod: &Pod) -> Option<&str> {
    annotation(pod, STATUS_ANNOTATION).filter(|v| !v.is_empty())
}

/// Whether the pod already carries a report, the marker that it was processed.
pub fn has_report(pod: &Pod) -> bool {
    status_annotation(pod).is_some()
}

pub fn is_ignored(pod: &Pod) -> bool {
    annotation(pod, IGNORE_ANNOTATION) == Some("true")
}
