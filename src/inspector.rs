//! Looking up image metadata in container registries.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use base64::Engine;
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::manifest::ImageIndexEntry;
use oci_distribution::secrets::RegistryAuth;
use oci_distribution::{Client, Reference};
use serde::Deserialize;
use time::OffsetDateTime;
use tracing::{debug, info, trace};

use crate::error::{Error, Result};
use crate::platform::Platform;

/// What a registry knows about an image.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImageInspection {
    /// When the image was built, `None` when the image config does not say.
    pub created: Option<OffsetDateTime>,
}

#[async_trait]
pub trait ImageInspector: Send + Sync {
    /// Inspect the image identified by `image` (as reported in a container
    /// status' `imageID`) for the given platform.
    async fn inspect(&self, image: &str, platform: &Platform) -> Result<ImageInspection>;
}

/// Turn a kubelet image ID into a pullable reference.
///
/// Drops a transport prefix such as `docker-pullable://` and a tag sitting in
/// front of a digest, since the digest alone pins the content.
pub fn normalize_image_id(image_id: &str) -> String {
    let image = image_id
        .split_once("://")
        .map_or(image_id, |(_, rest)| rest);
    let Some((name, digest)) = image.split_once('@') else {
        return image.to_owned();
    };
    // only the last path component can carry a tag, earlier colons are ports
    let (path, repository) = match name.rsplit_once('/') {
        Some((path, repository)) => (Some(path), repository),
        None => (None, name),
    };
    let repository = repository
        .split_once(':')
        .map_or(repository, |(repository, _tag)| repository);
    match path {
        Some(path) => format!("{path}/{repository}@{digest}"),
        None => format!("{repository}@{digest}"),
    }
}

#[derive(Deserialize)]
struct ImageConfig {
    #[serde(default, with = "time::serde::rfc3339::option")]
    created: Option<OffsetDateTime>,
}

fn parse_created(image: &str, config: &str) -> Result<Option<OffsetDateTime>> {
    let config: ImageConfig = serde_json::from_str(config).map_err(|source| Error::ImageConfig {
        image: image.to_owned(),
        source,
    })?;
    Ok(config.created)
}

/// Inspects images by pulling their manifest and config from the registry.
pub struct RegistryInspector {
    credentials: RegistryCredentials,
    clients: RwLock<HashMap<Platform, Client>>,
}

impl RegistryInspector {
    pub fn new(credentials: RegistryCredentials) -> Self {
        Self {
            credentials,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Create an inspector using the credentials in `auth_config`, if given.
    pub fn from_auth_config(auth_config: Option<&Path>) -> Result<Self> {
        let credentials = match auth_config {
            Some(path) => RegistryCredentials::load(path)?,
            None => RegistryCredentials::default(),
        };
        if credentials.is_empty() {
            info!("No registry credentials configured, pulling anonymously");
        }
        Ok(Self::new(credentials))
    }

    // the platform resolver is part of the client config, so each platform
    // gets its own client
    fn client_for(&self, platform: &Platform) -> Client {
        if let Some(client) = self
            .clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(platform)
        {
            return client.clone();
        }
        let mut clients = self.clients.write().unwrap_or_else(PoisonError::into_inner);
        clients
            .entry(platform.clone())
            .or_insert_with(|| {
                let wanted = platform.clone();
                let resolver: Box<dyn Fn(&[ImageIndexEntry]) -> Option<String> + Send + Sync> =
                    Box::new(move |entries| resolve_platform(entries, &wanted));
                Client::new(ClientConfig {
                    protocol: ClientProtocol::Https,
                    platform_resolver: Some(resolver),
                    ..Default::default()
                })
            })
            .clone()
    }
}

fn resolve_platform(entries: &[ImageIndexEntry], wanted: &Platform) -> Option<String> {
    entries
        .iter()
        .find(|entry| {
            entry.platform.as_ref().map_or(false, |p| {
                p.os == wanted.os && p.architecture == wanted.architecture
            })
        })
        .map(|entry| entry.digest.clone())
}

#[async_trait]
impl ImageInspector for RegistryInspector {
    async fn inspect(&self, image: &str, platform: &Platform) -> Result<ImageInspection> {
        let normalized = normalize_image_id(image);
        let reference: Reference = normalized
            .parse()
            .map_err(|e: oci_distribution::ParseError| Error::invalid_reference(image, e))?;
        let auth = self.credentials.for_registry(reference.registry());
        debug!(%reference, %platform, "Pulling image manifest and config");

        let client = self.client_for(platform);
        let (_manifest, digest, config) = client
            .pull_manifest_and_config(&reference, &auth)
            .await
            .map_err(|e| Error::registry(image, e))?;
        trace!(%reference, digest, config, "Got image config");

        Ok(ImageInspection {
            created: parse_created(image, &config)?,
        })
    }
}

/// Registry credentials read from a docker `config.json` style file.
#[derive(Clone, Debug, Default)]
pub struct RegistryCredentials {
    auths: HashMap<String, (String, String)>,
}

#[derive(Deserialize)]
struct DockerConfig {
    #[serde(default)]
    auths: HashMap<String, DockerAuth>,
}

#[derive(Deserialize)]
struct DockerAuth {
    auth: Option<String>,
    username: Option<String>,
    password: Option<String>,
}

impl RegistryCredentials {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| Error::AuthConfig {
            path: path.to_owned(),
            source,
        })?;
        Self::parse(path.to_owned(), &raw)
    }

    fn parse(path: PathBuf, raw: &str) -> Result<Self> {
        let config: DockerConfig = serde_json::from_str(raw)
            .map_err(|source| Error::AuthConfigFormat { path, source })?;
        let mut auths = HashMap::new();
        for (registry, auth) in config.auths {
            let basic = match (auth.username, auth.password, auth.auth) {
                (Some(user), Some(password), _) => Some((user, password)),
                (_, _, Some(encoded)) => decode_basic_auth(&encoded),
                _ => None,
            };
            match basic {
                Some(basic) => {
                    auths.insert(normalize_registry(&registry), basic);
                }
                None => debug!(registry, "Skipping auth entry without usable credentials"),
            }
        }
        Ok(Self { auths })
    }

    pub fn for_registry(&self, registry: &str) -> RegistryAuth {
        match self.auths.get(&normalize_registry(registry)) {
            Some((user, password)) => RegistryAuth::Basic(user.clone(), password.clone()),
            None => RegistryAuth::Anonymous,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.auths.is_empty()
    }
}

fn decode_basic_auth(encoded: &str) -> Option<(String, String)> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_owned(), password.to_owned()))
}

/// `https://index.docker.io/v1/` and `docker.io` name the same registry.
fn normalize_registry(registry: &str) -> String {
    let host = registry
        .split_once("://")
        .map_or(registry, |(_, rest)| rest);
    let host = host.split('/').next().unwrap_or(host);
    match host {
        "index.docker.io" | "registry-1.docker.io" => "docker.io".to_owned(),
        other => other.to_owned(),
    }
}
