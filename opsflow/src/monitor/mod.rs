//! Metric monitoring and alerting.
//!
//! The [`MonitorSink`] keeps a bounded history per metric name and evaluates
//! registered alarms on every recorded value. Alarms are edge-triggered: the
//! notifier runs once per onset, not once per breaching value.

mod alarm;
mod notify;
mod sink;

pub use alarm::{AlarmSpec, AlarmState, Comparison};
pub use notify::{AlarmNotifier, FnNotifier, LoggingNotifier};
pub use sink::{MetricRecorder, MonitorSink, NoOpRecorder, DEFAULT_HISTORY_LIMIT};
