use async_trait::async_trait;

use crate::error::Result;

pub mod pod_image_age;
pub mod util;

pub use pod_image_age::{PodImageAgeController, ReconcileOutcome};

#[async_trait]
pub trait Controller: Send + Sync {
    type Outcome: std::fmt::Debug + Send;

    /// Bring the object `namespace/name` to its desired state, reading it fresh.
    async fn reconcile(&self, namespace: &str, name: &str) -> Result<Self::Outcome>;

    fn name(&self) -> String;
}
