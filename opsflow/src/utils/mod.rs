//! Utility functions for ids, timestamps and content hashing.

mod hashing;
mod ids;
mod timestamps;

pub use hashing::{content_hash, fingerprint};
pub use ids::{generate_endpoint_id, generate_run_id};
pub use timestamps::{iso_timestamp, now_utc, Timestamp};
