//! Identifier generation for runs and endpoints.

use uuid::Uuid;

/// Generates a new run id.
///
/// Run ids are UUID v7 so they sort by submission time.
#[must_use]
pub fn generate_run_id() -> String {
    Uuid::now_v7().to_string()
}

/// Generates a new endpoint record id.
#[must_use]
pub fn generate_endpoint_id() -> String {
    format!("ep-{}", Uuid::new_v4().simple())
}
