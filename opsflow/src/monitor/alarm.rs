//! Threshold alarms with edge-triggered firing.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// How a recorded value is compared against an alarm threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    /// value > threshold
    GreaterThan,
    /// value >= threshold
    GreaterThanOrEqual,
    /// value < threshold
    LessThan,
    /// value <= threshold
    LessThanOrEqual,
}

impl Comparison {
    /// Returns true if `value` breaches `threshold` under this comparison.
    #[must_use]
    pub fn breaches(self, value: f64, threshold: f64) -> bool {
        match self {
            Self::GreaterThan => value > threshold,
            Self::GreaterThanOrEqual => value >= threshold,
            Self::LessThan => value < threshold,
            Self::LessThanOrEqual => value <= threshold,
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GreaterThan => write!(f, ">"),
            Self::GreaterThanOrEqual => write!(f, ">="),
            Self::LessThan => write!(f, "<"),
            Self::LessThanOrEqual => write!(f, "<="),
        }
    }
}

/// Declaration of an alarm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmSpec {
    /// Unique alarm name.
    pub name: String,
    /// Metric the alarm watches.
    pub metric_name: String,
    /// Threshold value.
    pub threshold: f64,
    /// Comparison applied as `value <comparison> threshold`.
    pub comparison: Comparison,
    /// Number of consecutive breaching values required to fire.
    pub evaluation_periods: usize,
    /// Restricts the alarm to metrics from one stage.
    #[serde(default)]
    pub stage: Option<String>,
}

impl AlarmSpec {
    /// Creates an alarm specification.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        metric_name: impl Into<String>,
        threshold: f64,
        comparison: Comparison,
        evaluation_periods: usize,
    ) -> Self {
        Self {
            name: name.into(),
            metric_name: metric_name.into(),
            threshold,
            comparison,
            evaluation_periods,
            stage: None,
        }
    }

    /// Restricts the alarm to one stage's metrics.
    #[must_use]
    pub fn for_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }
}

/// Whether an alarm is currently firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmState {
    /// Not firing.
    #[default]
    Ok,
    /// Firing since the last onset.
    Alarm,
}

/// Evaluation state for one alarm.
#[derive(Debug)]
pub(crate) struct AlarmEvaluator {
    pub(crate) spec: AlarmSpec,
    window: VecDeque<f64>,
    state: AlarmState,
    fired: u64,
}

impl AlarmEvaluator {
    pub(crate) fn new(spec: AlarmSpec) -> Self {
        let capacity = spec.evaluation_periods.max(1);
        Self {
            spec,
            window: VecDeque::with_capacity(capacity),
            state: AlarmState::Ok,
            fired: 0,
        }
    }

    pub(crate) fn state(&self) -> AlarmState {
        self.state
    }

    pub(crate) fn fired(&self) -> u64 {
        self.fired
    }

    /// Feeds one value; returns true on a transition into `Alarm`.
    ///
    /// The alarm fires when the last `evaluation_periods` values all breach
    /// while in `Ok`. It returns to `Ok` as soon as a value does not breach.
    pub(crate) fn observe(&mut self, value: f64) -> bool {
        let periods = self.spec.evaluation_periods.max(1);
        if self.window.len() == periods {
            self.window.pop_front();
        }
        self.window.push_back(value);

        let breaching = self.spec.comparison.breaches(value, self.spec.threshold);
        if !breaching {
            self.state = AlarmState::Ok;
            return false;
        }

        let sustained = self.window.len() == periods
            && self
                .window
                .iter()
                .all(|v| self.spec.comparison.breaches(*v, self.spec.threshold));

        if sustained && self.state == AlarmState::Ok {
            self.state = AlarmState::Alarm;
            self.fired += 1;
            return true;
        }
        false
    }
}
