//! Endpoint deployment.
//!
//! The controller publishes artifacts to named endpoints through a
//! [`Provisioner`], swapping endpoints atomically so a name never serves two
//! artifacts at once and never goes dark during a replacement.

mod controller;
mod endpoint;
mod provisioner;

pub use controller::DeploymentController;
pub use endpoint::Endpoint;
#[cfg(test)]
pub use provisioner::MockProvisioner;
pub use provisioner::{LocalProvisioner, Provisioner};
