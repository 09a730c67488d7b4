#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    Container, ContainerStatus, Node, NodeSpec, Pod, PodSpec, PodStatus,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use pod_image_aging::controller::PodImageAgeController;
use pod_image_aging::filter::FilterSpec;
use pod_image_aging::inspector::{ImageInspection, ImageInspector};
use pod_image_aging::platform::Platform;
use pod_image_aging::resolver::{CreationCache, ImageAgeResolver};
use pod_image_aging::store::ObjectStore;
use pod_image_aging::{Error, Result};
use time::OffsetDateTime;

type PatchHook = Box<dyn FnOnce(&mut Pod) + Send>;

/// In memory pods and nodes with the same conditional write semantics as the
/// API server.
#[derive(Default)]
pub struct FakeStore {
    pods: Mutex<BTreeMap<(String, String), Pod>>,
    nodes: Mutex<BTreeMap<String, Node>>,
    patches: AtomicUsize,
    before_patch: Mutex<Option<PatchHook>>,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::default()
    }

    pub fn add_pod(&self, pod: Pod) {
        let key = (
            pod.metadata.namespace.clone().unwrap_or_default(),
            pod.metadata.name.clone().unwrap_or_default(),
        );
        self.pods.lock().unwrap().insert(key, pod);
    }

    pub fn add_node(&self, node: Node) {
        let name = node.metadata.name.clone().unwrap_or_default();
        self.nodes.lock().unwrap().insert(name, node);
    }

    pub fn pod(&self, namespace: &str, name: &str) -> Pod {
        self.pods.lock().unwrap()[&(namespace.to_owned(), name.to_owned())].clone()
    }

    pub fn annotations(&self, namespace: &str, name: &str) -> BTreeMap<String, String> {
        self.pod(namespace, name)
            .metadata
            .annotations
            .unwrap_or_default()
    }

    /// Number of patches that were applied.
    pub fn patches(&self) -> usize {
        self.patches.load(Ordering::SeqCst)
    }

    /// Run `hook` on the stored pod right before the next patch is checked,
    /// as if another writer got there first. The resource version is bumped.
    pub fn before_next_patch(&self, hook: impl FnOnce(&mut Pod) + Send + 'static) {
        *self.before_patch.lock().unwrap() = Some(Box::new(hook));
    }
}

fn bump(pod: &mut Pod) {
    let version: u64 = pod
        .metadata
        .resource_version
        .as_deref()
        .and_then(|v| v.parse().ok())
        .unwrap_or_default();
    pod.metadata.resource_version = Some((version + 1).to_string());
}

#[async_trait]
impl ObjectStore for FakeStore {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        Ok(self
            .pods
            .lock()
            .unwrap()
            .get(&(namespace.to_owned(), name.to_owned()))
            .cloned())
    }

    async fn get_node(&self, name: &str) -> Result<Option<Node>> {
        Ok(self.nodes.lock().unwrap().get(name).cloned())
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>> {
        Ok(self
            .pods
            .lock()
            .unwrap()
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, pod)| pod.clone())
            .collect())
    }

    async fn patch_pod_annotations(
        &self,
        pod: &Pod,
        annotations: BTreeMap<String, String>,
    ) -> Result<()> {
        let namespace = pod.metadata.namespace.clone().unwrap_or_default();
        let name = pod.metadata.name.clone().unwrap_or_default();
        let hook = self.before_patch.lock().unwrap().take();
        let mut pods = self.pods.lock().unwrap();
        let stored = pods
            .get_mut(&(namespace.clone(), name.clone()))
            .ok_or_else(|| Error::Io(io::Error::new(io::ErrorKind::NotFound, "pod not found")))?;
        if let Some(hook) = hook {
            hook(stored);
            bump(stored);
        }
        if pod.metadata.resource_version.is_some()
            && pod.metadata.resource_version != stored.metadata.resource_version
        {
            return Err(Error::Conflict { namespace, name });
        }
        stored
            .metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .extend(annotations);
        bump(stored);
        self.patches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Clone)]
pub enum Script {
    Created(OffsetDateTime),
    /// The image config carries no creation time.
    Undated,
    Unreachable,
}

/// Answers inspections from a fixed table keyed by image id.
#[derive(Default)]
pub struct ScriptedInspector {
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedInspector {
    pub fn new() -> Arc<Self> {
        Arc::default()
    }

    pub fn script(&self, image_id: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .insert(image_id.to_owned(), script);
    }

    pub fn calls(&self, image_id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(image_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl ImageInspector for ScriptedInspector {
    async fn inspect(&self, image: &str, _platform: &Platform) -> Result<ImageInspection> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(image.to_owned())
            .or_default() += 1;
        let script = self.scripts.lock().unwrap().get(image).cloned();
        match script {
            Some(Script::Created(created)) => Ok(ImageInspection {
                created: Some(created),
            }),
            Some(Script::Undated) => Ok(ImageInspection { created: None }),
            Some(Script::Unreachable) | None => Err(Error::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("registry unreachable for {image}"),
            ))),
        }
    }
}

pub fn controller(
    store: &Arc<FakeStore>,
    inspector: &Arc<ScriptedInspector>,
    filters: FilterSpec,
) -> PodImageAgeController {
    let resolver = ImageAgeResolver::new(
        Arc::new(CreationCache::new()),
        Arc::clone(inspector) as Arc<dyn ImageInspector>,
    );
    PodImageAgeController::new(Arc::clone(store) as Arc<dyn ObjectStore>, resolver, filters)
}

pub fn no_filters() -> FilterSpec {
    FilterSpec::new("", "", "", "")
}

pub fn linux_node(name: &str) -> Node {
    let labels = BTreeMap::from([
        ("kubernetes.io/os".to_owned(), "linux".to_owned()),
        ("kubernetes.io/arch".to_owned(), "amd64".to_owned()),
    ]);
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_owned()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(NodeSpec::default()),
        ..Default::default()
    }
}

/// A declared container together with what the kubelet reports for it.
pub struct TestContainer {
    pub name: &'static str,
    pub image: &'static str,
    pub image_id: Option<&'static str>,
}

pub fn container(name: &'static str, image: &'static str, image_id: &'static str) -> TestContainer {
    TestContainer {
        name,
        image,
        image_id: Some(image_id),
    }
}

pub fn pending_container(name: &'static str, image: &'static str) -> TestContainer {
    TestContainer {
        name,
        image,
        image_id: None,
    }
}

fn split(containers: &[TestContainer]) -> (Vec<Container>, Vec<ContainerStatus>) {
    let specs = containers
        .iter()
        .map(|c| Container {
            name: c.name.to_owned(),
            image: Some(c.image.to_owned()),
            ..Default::default()
        })
        .collect();
    let statuses = containers
        .iter()
        .filter_map(|c| {
            c.image_id.map(|image_id| ContainerStatus {
                name: c.name.to_owned(),
                image: c.image.to_owned(),
                image_id: image_id.to_owned(),
                ..Default::default()
            })
        })
        .collect();
    (specs, statuses)
}

/// A running pod bound to `node`.
pub fn running_pod(namespace: &str, name: &str, node: &str, containers: &[TestContainer]) -> Pod {
    pod_with_init(namespace, name, node, containers, &[])
}

pub fn pod_with_init(
    namespace: &str,
    name: &str,
    node: &str,
    containers: &[TestContainer],
    init_containers: &[TestContainer],
) -> Pod {
    let (containers, container_statuses) = split(containers);
    let (init_containers, init_container_statuses) = split(init_containers);
    Pod {
        metadata: ObjectMeta {
            namespace: Some(namespace.to_owned()),
            name: Some(name.to_owned()),
            resource_version: Some("1".to_owned()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: Some(node.to_owned()),
            containers,
            init_containers: Some(init_containers).filter(|c| !c.is_empty()),
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some("Running".to_owned()),
            container_statuses: Some(container_statuses),
            init_container_statuses: Some(init_container_statuses)
                .filter(|s| !s.is_empty()),
            ..Default::default()
        }),
    }
}
