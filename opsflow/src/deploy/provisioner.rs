//! The external system that hosts endpoints.

use async_trait::async_trait;
use std::fmt::Debug;

use crate::core::Artifact;

/// Creates and destroys the resources behind endpoints.
///
/// Both operations may be slow and may fail transiently; the controller
/// retries them with its backoff policy.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Provisioner: Send + Sync + Debug {
    /// Provisions a resource serving `artifact` and returns its id.
    async fn provision(&self, endpoint_name: &str, artifact: &Artifact) -> anyhow::Result<String>;

    /// Tears down a resource previously returned by `provision`.
    async fn decommission(&self, resource_id: &str) -> anyhow::Result<()>;
}

/// A provisioner that hands out local resource ids and does no real work.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalProvisioner;

#[async_trait]
impl Provisioner for LocalProvisioner {
    async fn provision(&self, endpoint_name: &str, artifact: &Artifact) -> anyhow::Result<String> {
        tracing::debug!(endpoint = endpoint_name, artifact = %artifact.to_ref(), "Provisioning locally");
        Ok(format!("local-{endpoint_name}-v{}", artifact.version))
    }

    async fn decommission(&self, resource_id: &str) -> anyhow::Result<()> {
        tracing::debug!(resource_id, "Decommissioning locally");
        Ok(())
    }
}
