//! Endpoint records.

use serde::{Deserialize, Serialize};

use crate::core::{ArtifactRef, EndpointStatus};

/// A named serving endpoint backed by one artifact version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Unique id of this deployment of the endpoint.
    pub id: String,
    /// Endpoint name; at most one endpoint per name is active.
    pub name: String,
    /// The artifact being served.
    pub artifact: ArtifactRef,
    /// Lifecycle status.
    pub status: EndpointStatus,
    /// Resource handle returned by the provisioner.
    pub resource_id: String,
    /// When the endpoint became active.
    pub created_at: String,
}

impl Endpoint {
    /// Returns true if the endpoint is serving traffic.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == EndpointStatus::Active
    }
}

/// Per-name endpoint state held by the controller.
#[derive(Debug, Default)]
pub(crate) struct EndpointSlot {
    pub(crate) active: Option<Endpoint>,
    pub(crate) retiring: Vec<Endpoint>,
}

impl EndpointSlot {
    pub(crate) fn status(&self) -> EndpointStatus {
        match (&self.active, self.retiring.is_empty()) {
            (Some(_), _) => EndpointStatus::Active,
            (None, false) => EndpointStatus::Retiring,
            (None, true) => EndpointStatus::Absent,
        }
    }

    /// Installs `next` as active and returns the previous active endpoint,
    /// now marked retiring.
    pub(crate) fn swap(&mut self, next: Endpoint) -> Option<Endpoint> {
        let previous = self.active.replace(next).map(|mut old| {
            old.status = EndpointStatus::Retiring;
            old
        });
        if let Some(old) = &previous {
            self.retiring.push(old.clone());
        }
        previous
    }

    pub(crate) fn drop_retired(&mut self, id: &str) {
        self.retiring.retain(|e| e.id != id);
    }
}
