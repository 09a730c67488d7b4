use k8s_openapi::api::core::v1::{Container, ContainerStatus, Pod};

pub const POD_RUNNING: &str = "Running";

pub fn get_container_status<'a>(
    statuses: &'a [ContainerStatus],
    name: &str,
) -> Option<&'a ContainerStatus> {
    statuses.iter().find(|s| s.name == name)
}

pub fn pod_phase(pod: &Pod) -> Option<&str> {
    pod.status.as_ref().and_then(|s| s.phase.as_deref())
}

pub fn is_running(pod: &Pod) -> bool {
    pod_phase(pod) == Some(POD_RUNNING)
}

pub fn is_terminating(pod: &Pod) -> bool {
    pod.metadata.deletion_timestamp.is_some()
}

pub fn node_name(pod: &Pod) -> Option<&str> {
    pod.spec
        .as_ref()
        .and_then(|s| s.node_name.as_deref())
        .filter(|n| !n.is_empty())
}

/// A declared container paired with the status the kubelet reports for it.
#[derive(Debug)]
pub struct ContainerImage<'a> {
    pub name: &'a str,
    /// The image reference, as reported in the status if there is one.
    pub image: &'a str,
    /// The pulled image identity, `None` until the kubelet reports it.
    pub image_id: Option<&'a str>,
}

/// The containers of a pod in declaration order with their image details.
pub fn container_images<'a>(
    containers: &'a [Container],
    statuses: &'a [ContainerStatus],
) -> Vec<ContainerImage<'a>> {
    containers
        .iter()
        .map(|container| {
            let status = get_container_status(statuses, &container.name);
            let image = status
                .map(|s| s.image.as_str())
                .filter(|i| !i.is_empty())
                .or(container.image.as_deref())
                .unwrap_or_default();
            ContainerImage {
                name: &container.name,
                image,
                image_id: status.map(|s| s.image_id.as_str()).filter(|i| !i.is_empty()),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(name: &str, image: &str) -> Container {
        Container {
            name: name.to_owned(),
            image: Some(image.to_owned()),
            ..Default::default()
        }
    }

    fn status(name: &str, image: &str, image_id: &str) -> ContainerStatus {
        ContainerStatus {
            name: name.to_owned(),
            image: image.to_owned(),
            image_id: image_id.to_owned(),
            ..Default::default()
        }
    }

    #[test_log::test]
    fn follows_declaration_order() {
        let containers = vec![container("b", "b:1"), container("a", "a:1")];
        let statuses = vec![
            status("a", "docker.io/library/a:1", "a@sha256:1"),
            status("b", "docker.io/library/b:1", "b@sha256:2"),
        ];
        let images = container_images(&containers, &statuses);
        assert_eq!(images[0].name, "b");
        assert_eq!(images[0].image, "docker.io/library/b:1");
        assert_eq!(images[0].image_id, Some("b@sha256:2"));
        assert_eq!(images[1].name, "a");
    }

    #[test_log::test]
    fn missing_status_falls_back_to_spec_image() {
        let containers = vec![container("app", "ghcr.io/org/app:v1")];
        let statuses = vec![status("app", "", "")];
        let images = container_images(&containers, &statuses);
        assert_eq!(images[0].image, "ghcr.io/org/app:v1");
        assert_eq!(images[0].image_id, None);

        let images = container_images(&containers, &[]);
        assert_eq!(images[0].image_id, None);
    }
}
