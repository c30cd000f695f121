//! Metrics emitted by stages and consumed by the monitor.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::utils::{now_utc, Timestamp};

/// Name of the per-attempt duration metric emitted by the stage executor.
pub const ATTEMPT_DURATION_METRIC: &str = "attempt_duration_ms";

/// A single recorded measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// The stage that produced the metric.
    pub stage: String,
    /// The metric name.
    pub name: String,
    /// The measured value.
    pub value: f64,
    /// When the value was measured.
    pub timestamp: Timestamp,
    /// Additional dimensions (e.g. `outcome=failure`).
    #[serde(default)]
    pub dimensions: BTreeMap<String, String>,
}

impl Metric {
    /// Creates a metric timestamped now.
    #[must_use]
    pub fn new(stage: impl Into<String>, name: impl Into<String>, value: f64) -> Self {
        Self {
            stage: stage.into(),
            name: name.into(),
            value,
            timestamp: now_utc(),
            dimensions: BTreeMap::new(),
        }
    }

    /// Adds a dimension.
    #[must_use]
    pub fn with_dimension(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.dimensions.insert(key.into(), value.into());
        self
    }

    /// Returns a dimension value.
    #[must_use]
    pub fn dimension(&self, key: &str) -> Option<&str> {
        self.dimensions.get(key).map(String::as_str)
    }
}
