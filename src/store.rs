//! Access to pods and nodes, the durable state the controller works against.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{ListParams, Patch, PatchParams};
use kube::{Api, Client};
use serde_json::json;
use tracing::debug;

use crate::error::{Error, Result};

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>>;

    async fn get_node(&self, name: &str) -> Result<Option<Node>>;

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>>;

    /// Merge `annotations` into the pod's annotations, leaving other keys alone.
    ///
    /// The write is conditional on the pod still being at the resource version
    /// `pod` was read at, a stale version fails with [`Error::Conflict`].
    async fn patch_pod_annotations(
        &self,
        pod: &Pod,
        annotations: BTreeMap<String, String>,
    ) -> Result<()>;
}

#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    field_manager: String,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            field_manager: crate::CONTROLLER_NAME.to_owned(),
        }
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        let api = Api::<Pod>::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_node(&self, name: &str) -> Result<Option<Node>> {
        let api = Api::<Node>::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>> {
        let api = Api::<Pod>::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn patch_pod_annotations(
        &self,
        pod: &Pod,
        annotations: BTreeMap<String, String>,
    ) -> Result<()> {
        let namespace = pod.metadata.namespace.clone().unwrap_or_default();
        let name = pod.metadata.name.clone().unwrap_or_default();
        let api = Api::<Pod>::namespaced(self.client.clone(), &namespace);
        let mut metadata = json!({ "annotations": annotations });
        if let Some(resource_version) = &pod.metadata.resource_version {
            metadata["resourceVersion"] = json!(resource_version);
        }
        let patch = json!({ "metadata": metadata });
        debug!(namespace, pod = name, "Patching pod annotations");
        let params = PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };
        match api.patch(&name, &params, &Patch::Merge(&patch)).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(response)) if response.code == 409 => {
                Err(Error::Conflict { namespace, name })
            }
            Err(e) => Err(e.into()),
        }
    }
}
