//! The operating system and architecture images are inspected for.

use std::fmt;

use k8s_openapi::api::core::v1::Node;

pub const OS_LABEL: &str = "kubernetes.io/os";
pub const ARCH_LABEL: &str = "kubernetes.io/arch";

/// A platform in OCI terms (`linux`, `amd64`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Platform {
    pub os: String,
    pub architecture: String,
}

impl Platform {
    pub fn new(os: impl Into<String>, architecture: impl Into<String>) -> Self {
        Self {
            os: normalize_os(&os.into()),
            architecture: normalize_architecture(&architecture.into()),
        }
    }

    /// Read the platform a node runs, preferring the well-known labels over
    /// the node info the kubelet reports.
    pub fn from_node(node: &Node) -> Option<Self> {
        let labels = node.metadata.labels.as_ref();
        let node_info = node.status.as_ref().and_then(|s| s.node_info.as_ref());

        let os = labels
            .and_then(|l| l.get(OS_LABEL))
            .filter(|v| !v.is_empty())
            .cloned()
            .or_else(|| node_info.map(|i| i.operating_system.clone()))
            .filter(|v| !v.is_empty())?;
        let architecture = labels
            .and_then(|l| l.get(ARCH_LABEL))
            .filter(|v| !v.is_empty())
            .cloned()
            .or_else(|| node_info.map(|i| i.architecture.clone()))
            .filter(|v| !v.is_empty())?;

        Some(Self::new(os, architecture))
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)
    }
}

fn normalize_os(os: &str) -> String {
    match os.to_lowercase().as_str() {
        "macos" => "darwin".to_owned(),
        other => other.to_owned(),
    }
}

fn normalize_architecture(architecture: &str) -> String {
    match architecture.to_lowercase().as_str() {
        "x86_64" => "amd64".to_owned(),
        "aarch64" => "arm64".to_owned(),
        other => other.to_owned(),
    }
}
