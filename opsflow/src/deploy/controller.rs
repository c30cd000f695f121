//! Deployment controller.

use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::endpoint::{Endpoint, EndpointSlot};
use super::provisioner::Provisioner;
use crate::config::{DeploymentConfig, OpsflowConfig};
use crate::core::{Artifact, EndpointStatus, RunStatus};
use crate::errors::{OpsflowError, Result};
use crate::events::{kinds, EventSink, NoOpEventSink};
use crate::pipeline::{with_retry, BackoffPolicy, PipelineRun};
use crate::store::{self, ArtifactStore};
use crate::utils::{generate_endpoint_id, iso_timestamp};

/// Publishes artifacts to named endpoints.
///
/// Operations on one endpoint name are serialized; different names proceed
/// independently. Readers never observe a name with two active endpoints or
/// with none during a swap.
#[derive(Debug)]
pub struct DeploymentController {
    provisioner: Arc<dyn Provisioner>,
    store: Arc<dyn ArtifactStore>,
    events: Arc<dyn EventSink>,
    backoff: BackoffPolicy,
    config: DeploymentConfig,
    endpoints: DashMap<String, EndpointSlot>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl DeploymentController {
    /// Creates a controller with default settings.
    #[must_use]
    pub fn new(provisioner: Arc<dyn Provisioner>, store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            provisioner,
            store,
            events: Arc::new(NoOpEventSink),
            backoff: BackoffPolicy::default(),
            config: DeploymentConfig::default(),
            endpoints: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    /// Creates a controller using the deployment settings and the executor's
    /// backoff policy from `config`.
    #[must_use]
    pub fn from_config(
        provisioner: Arc<dyn Provisioner>,
        store: Arc<dyn ArtifactStore>,
        config: &OpsflowConfig,
    ) -> Self {
        Self::new(provisioner, store)
            .with_config(config.deployment.clone())
            .with_backoff(config.executor.backoff.clone())
    }

    /// Sets the deployment configuration.
    #[must_use]
    pub fn with_config(mut self, config: DeploymentConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the retry backoff policy.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Serves `artifact` from the endpoint `name`.
    ///
    /// On an existing endpoint the new resource is provisioned first, then
    /// swapped in atomically, then the old resource is decommissioned.
    ///
    /// # Errors
    ///
    /// `CorruptArtifact` if the artifact fails its hash check,
    /// `DeploymentFailed` if provisioning fails after all attempts. The
    /// previous endpoint, if any, is left untouched.
    pub async fn publish(&self, name: &str, artifact: &Artifact) -> Result<Endpoint> {
        if !artifact.verify() {
            return Err(OpsflowError::CorruptArtifact {
                key: artifact.key.clone(),
                version: artifact.version,
                expected: artifact.content_hash.clone(),
                actual: artifact.recompute_hash(),
            });
        }

        let lock = self.endpoint_lock(name);
        let _guard = lock.lock().await;

        let provisioner = self.provisioner.as_ref();
        let resource_id = with_retry(
            &self.backoff,
            self.config.provision_attempts,
            Some(self.config.provision_timeout()),
            "provision",
            move |_| provisioner.provision(name, artifact),
        )
        .await
        .map_err(|exhausted| {
            warn!(
                endpoint = name,
                artifact = %artifact.to_ref(),
                attempts = exhausted.attempts,
                error = %exhausted.last_error,
                "Provisioning failed; keeping current endpoint"
            );
            OpsflowError::deployment_failed(
                name,
                format!(
                    "provisioning failed after {} attempt(s): {:#}",
                    exhausted.attempts, exhausted.last_error
                ),
            )
        })?;

        let endpoint = Endpoint {
            id: generate_endpoint_id(),
            name: name.to_string(),
            artifact: artifact.to_ref(),
            status: EndpointStatus::Active,
            resource_id,
            created_at: iso_timestamp(),
        };
        let previous = self
            .endpoints
            .entry(name.to_string())
            .or_default()
            .swap(endpoint.clone());

        info!(
            endpoint = name,
            id = %endpoint.id,
            artifact = %endpoint.artifact,
            replaced = previous.as_ref().map(|p| p.id.as_str()),
            "Endpoint published"
        );
        self.events
            .emit(
                kinds::ENDPOINT_PUBLISHED,
                Some(json!({
                    "endpoint": name,
                    "id": endpoint.id,
                    "artifact": endpoint.artifact,
                    "replaced": previous.as_ref().map(|p| p.id.clone()),
                })),
            )
            .await;

        if let Some(old) = previous {
            if let Err(e) = self.decommission(&old).await {
                error!(endpoint = name, id = %old.id, error = %e, "Old endpoint left retiring");
            } else if let Some(mut slot) = self.endpoints.get_mut(name) {
                slot.drop_retired(&old.id);
            }
        }

        Ok(endpoint)
    }

    /// Publishes the artifact a succeeded run wrote under `output_key`.
    ///
    /// # Errors
    ///
    /// `DeploymentFailed` if the run did not succeed, `NotFound` if no stage
    /// of the run produced `output_key`.
    pub async fn publish_from_run(
        &self,
        name: &str,
        run: &PipelineRun,
        output_key: &str,
    ) -> Result<Endpoint> {
        if run.status != RunStatus::Succeeded {
            return Err(OpsflowError::deployment_failed(
                name,
                format!("run '{}' is {}, not succeeded", run.run_id, run.status),
            ));
        }
        let reference = run.output_for(output_key).ok_or_else(|| {
            OpsflowError::not_found(format!("output '{output_key}' of run '{}'", run.run_id))
        })?;
        let reference = reference.clone();
        let artifact = store::blocking(&self.store, move |store| store.resolve(&reference)).await?;
        self.publish(name, &artifact).await
    }

    /// Tears down the endpoint `name`.
    ///
    /// Replaced endpoints still waiting for decommission are retried too.
    /// Any that fail again stay listed in [`retiring`](Self::retiring) and
    /// keep the status at `Retiring` rather than `Absent`.
    ///
    /// # Errors
    ///
    /// `NotFound` if there is no active endpoint, `DeploymentFailed` if the
    /// active resource could not be decommissioned; the endpoint then stays
    /// active.
    pub async fn retire(&self, name: &str) -> Result<()> {
        let lock = self.endpoint_lock(name);
        let _guard = lock.lock().await;

        let (current, leftovers) = self
            .endpoints
            .get(name)
            .and_then(|slot| slot.active.clone().map(|a| (a, slot.retiring.clone())))
            .ok_or_else(|| OpsflowError::not_found(format!("endpoint '{name}'")))?;

        self.decommission(&current).await?;
        if let Some(mut slot) = self.endpoints.get_mut(name) {
            slot.active = None;
        }
        for old in leftovers {
            match self.decommission(&old).await {
                Ok(()) => {
                    if let Some(mut slot) = self.endpoints.get_mut(name) {
                        slot.drop_retired(&old.id);
                    }
                }
                Err(e) => {
                    error!(endpoint = name, id = %old.id, error = %e, "Old endpoint still retiring");
                }
            }
        }
        self.endpoints.remove_if(name, |_, slot| slot.status() == EndpointStatus::Absent);

        info!(endpoint = name, id = %current.id, "Endpoint retired");
        self.events
            .emit(
                kinds::ENDPOINT_RETIRED,
                Some(json!({ "endpoint": name, "id": current.id })),
            )
            .await;
        Ok(())
    }

    /// Returns the active endpoint for `name`.
    #[must_use]
    pub fn endpoint(&self, name: &str) -> Option<Endpoint> {
        self.endpoints.get(name).and_then(|slot| slot.active.clone())
    }

    /// Returns the status of `name`; unknown names are `Absent`.
    #[must_use]
    pub fn status(&self, name: &str) -> EndpointStatus {
        self.endpoints
            .get(name)
            .map_or(EndpointStatus::Absent, |slot| slot.status())
    }

    /// Returns endpoints replaced but not yet decommissioned.
    #[must_use]
    pub fn retiring(&self, name: &str) -> Vec<Endpoint> {
        self.endpoints
            .get(name)
            .map(|slot| slot.retiring.clone())
            .unwrap_or_default()
    }

    /// Returns all active endpoints ordered by name.
    #[must_use]
    pub fn endpoints(&self) -> Vec<Endpoint> {
        let mut active: Vec<Endpoint> = self
            .endpoints
            .iter()
            .filter_map(|slot| slot.active.clone())
            .collect();
        active.sort_by(|a, b| a.name.cmp(&b.name));
        active
    }

    fn endpoint_lock(&self, name: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn decommission(&self, endpoint: &Endpoint) -> Result<()> {
        let provisioner = self.provisioner.as_ref();
        let resource_id = endpoint.resource_id.as_str();
        with_retry(
            &self.backoff,
            self.config.provision_attempts,
            Some(self.config.provision_timeout()),
            "decommission",
            move |_| provisioner.decommission(resource_id),
        )
        .await
        .map_err(|exhausted| {
            OpsflowError::deployment_failed(
                &endpoint.name,
                format!(
                    "decommissioning '{resource_id}' failed after {} attempt(s): {:#}",
                    exhausted.attempts, exhausted.last_error
                ),
            )
        })
    }
}
