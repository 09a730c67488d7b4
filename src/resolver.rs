//! Resolving when an image was created, cache first.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use time::OffsetDateTime;
use tracing::info;

use crate::cache::ExpiringCache;
use crate::error::{Error, Result};
use crate::inspector::ImageInspector;
use crate::platform::Platform;

pub type CreationCache = ExpiringCache<String, OffsetDateTime>;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(168 * 60 * 60);
pub const DEFAULT_INSPECT_TIMEOUT: Duration = Duration::from_secs(30);

type Gates = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// Resolves image creation times through a shared [`CreationCache`], only
/// asking the [`ImageInspector`] on a miss.
pub struct ImageAgeResolver {
    cache: Arc<CreationCache>,
    inspector: Arc<dyn ImageInspector>,
    ttl: Duration,
    timeout: Duration,
    gates: Arc<Gates>,
}

impl ImageAgeResolver {
    pub fn new(cache: Arc<CreationCache>, inspector: Arc<dyn ImageInspector>) -> Self {
        Self {
            cache,
            inspector,
            ttl: DEFAULT_CACHE_TTL,
            timeout: DEFAULT_INSPECT_TIMEOUT,
            gates: Arc::default(),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn cache(&self) -> &Arc<CreationCache> {
        &self.cache
    }

    /// Get the creation time of the image `image_id` built for `platform`.
    ///
    /// Failures are never cached, so the next call tries the registry again.
    pub async fn resolve(&self, image_id: &str, platform: &Platform) -> Result<OffsetDateTime> {
        if let Some(created) = self.cache.get(image_id) {
            info!(image_id, %created, "Using cached image creation date");
            return Ok(created);
        }

        // one lookup per image at a time, concurrent callers wait and then hit the cache
        let gate = Gate::acquire(&self.gates, image_id);
        let _permit = gate.lock.lock().await;
        if let Some(created) = self.cache.get(image_id) {
            info!(image_id, %created, "Using image creation date resolved concurrently");
            return Ok(created);
        }

        info!(image_id, %platform, "Inspecting image");
        let inspection = tokio::time::timeout(self.timeout, self.inspector.inspect(image_id, platform))
            .await
            .map_err(|_| Error::InspectTimeout {
                image: image_id.to_owned(),
                timeout: self.timeout,
            })??;

        let created = inspection
            .created
            .filter(|created| *created > OffsetDateTime::UNIX_EPOCH)
            .ok_or_else(|| Error::missing_creation_time(image_id))?;
        info!(image_id, %created, "Image inspected");

        self.cache.set(image_id.to_owned(), created, self.ttl);
        Ok(created)
    }
}

/// Per image lock, removed from the map again once nobody holds it.
struct Gate {
    gates: Arc<Gates>,
    key: String,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Gate {
    fn acquire(gates: &Arc<Gates>, key: &str) -> Self {
        let lock = gates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_owned())
            .or_default()
            .clone();
        Self {
            gates: Arc::clone(gates),
            key: key.to_owned(),
            lock,
        }
    }
}

impl Drop for Gate {
    fn drop(&mut self) {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        // one reference in the map and ours
        if Arc::strong_count(&self.lock) <= 2 {
            gates.remove(&self.key);
        }
    }
}
