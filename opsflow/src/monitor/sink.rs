//! Metric sink that evaluates alarms.

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::Arc;

use super::alarm::{AlarmEvaluator, AlarmSpec, AlarmState};
use super::notify::{AlarmNotifier, LoggingNotifier};
use crate::config::MonitorConfig;
use crate::core::Metric;
use crate::errors::{OpsflowError, Result};

/// Default number of values retained per metric name.
pub const DEFAULT_HISTORY_LIMIT: usize = 1024;

/// Anything that accepts metrics.
pub trait MetricRecorder: Send + Sync + Debug {
    /// Records one metric.
    fn record(&self, metric: Metric);
}

/// A recorder that drops every metric.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpRecorder;

impl MetricRecorder for NoOpRecorder {
    fn record(&self, _metric: Metric) {}
}

/// Receives metrics and raises edge-triggered alarms.
///
/// Each alarm has its own lock: evaluation and notification for one alarm
/// are serialized, so concurrent `record` calls yield a deterministic firing
/// sequence per alarm.
#[derive(Debug)]
pub struct MonitorSink {
    alarms: RwLock<Vec<Arc<Mutex<AlarmEvaluator>>>>,
    history: DashMap<String, VecDeque<Metric>>,
    history_limit: usize,
    notifier: Arc<dyn AlarmNotifier>,
}

impl Default for MonitorSink {
    fn default() -> Self {
        Self::new(Arc::new(LoggingNotifier))
    }
}

impl MonitorSink {
    /// Creates a monitor that notifies through `notifier`.
    #[must_use]
    pub fn new(notifier: Arc<dyn AlarmNotifier>) -> Self {
        Self {
            alarms: RwLock::new(Vec::new()),
            history: DashMap::new(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            notifier,
        }
    }

    /// Creates a monitor with settings from `config`.
    #[must_use]
    pub fn from_config(notifier: Arc<dyn AlarmNotifier>, config: &MonitorConfig) -> Self {
        Self::new(notifier).with_history_limit(config.history_limit)
    }

    /// Sets how many values are retained per metric name.
    #[must_use]
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    /// Registers an alarm, replacing any alarm with the same name.
    ///
    /// A replaced alarm starts over in the `Ok` state with an empty window.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAlarm` if the name is blank or `evaluation_periods`
    /// is zero.
    pub fn set_alarm(&self, spec: AlarmSpec) -> Result<()> {
        if spec.name.trim().is_empty() {
            return Err(OpsflowError::InvalidAlarm("alarm name cannot be empty".to_string()));
        }
        if spec.evaluation_periods == 0 {
            return Err(OpsflowError::InvalidAlarm(format!(
                "alarm '{}' needs at least one evaluation period",
                spec.name
            )));
        }

        tracing::debug!(
            alarm = %spec.name,
            metric = %spec.metric_name,
            threshold = spec.threshold,
            comparison = %spec.comparison,
            periods = spec.evaluation_periods,
            "Alarm configured"
        );

        let mut alarms = self.alarms.write();
        let evaluator = Arc::new(Mutex::new(AlarmEvaluator::new(spec)));
        let name = evaluator.lock().spec.name.clone();
        match alarms.iter().position(|a| a.lock().spec.name == name) {
            Some(idx) => alarms[idx] = evaluator,
            None => alarms.push(evaluator),
        }
        Ok(())
    }

    /// Removes an alarm. Returns true if it existed.
    pub fn remove_alarm(&self, name: &str) -> bool {
        let mut alarms = self.alarms.write();
        let before = alarms.len();
        alarms.retain(|a| a.lock().spec.name != name);
        alarms.len() < before
    }

    /// Returns the current state of an alarm.
    #[must_use]
    pub fn alarm_state(&self, name: &str) -> Option<AlarmState> {
        self.find(name).map(|a| a.lock().state())
    }

    /// Returns how many times an alarm has fired since it was set.
    #[must_use]
    pub fn fired_count(&self, name: &str) -> Option<u64> {
        self.find(name).map(|a| a.lock().fired())
    }

    /// Returns the retained values for a metric, oldest first.
    #[must_use]
    pub fn history(&self, metric_name: &str) -> Vec<Metric> {
        self.history
            .get(metric_name)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn find(&self, name: &str) -> Option<Arc<Mutex<AlarmEvaluator>>> {
        self.alarms
            .read()
            .iter()
            .find(|a| a.lock().spec.name == name)
            .cloned()
    }

    fn matching(&self, metric: &Metric) -> Vec<Arc<Mutex<AlarmEvaluator>>> {
        self.alarms
            .read()
            .iter()
            .filter(|a| {
                let alarm = a.lock();
                alarm.spec.metric_name == metric.name
                    && alarm.spec.stage.as_ref().map_or(true, |s| *s == metric.stage)
            })
            .cloned()
            .collect()
    }

    fn notify(&self, alarm_name: &str, metric: &Metric) {
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.notifier.notify(alarm_name, metric, metric.value)
        }));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(alarm = alarm_name, error = %e, "Alarm notification failed");
            }
            Err(_) => {
                tracing::warn!(alarm = alarm_name, "Alarm notification panicked");
            }
        }
    }
}

impl MetricRecorder for MonitorSink {
    fn record(&self, metric: Metric) {
        {
            let mut history = self.history.entry(metric.name.clone()).or_default();
            if history.len() == self.history_limit {
                history.pop_front();
            }
            history.push_back(metric.clone());
        }

        for alarm in self.matching(&metric) {
            let mut evaluator = alarm.lock();
            if evaluator.observe(metric.value) {
                let name = evaluator.spec.name.clone();
                tracing::info!(
                    alarm = %name,
                    metric = %metric.name,
                    stage = %metric.stage,
                    value = metric.value,
                    "Alarm entered firing state"
                );
                self.notify(&name, &metric);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::{Comparison, FnNotifier};
    use crate::testing::CollectingNotifier;

    fn latency_alarm() -> AlarmSpec {
        AlarmSpec::new("high-latency", "latency_ms", 500.0, Comparison::GreaterThan, 2)
    }

    fn record_all(sink: &MonitorSink, values: &[f64]) {
        for v in values {
            sink.record(Metric::new("serve", "latency_ms", *v));
        }
    }

    #[test]
    fn test_edge_triggered_notifications() {
        let notifier = Arc::new(CollectingNotifier::new());
        let sink = MonitorSink::new(notifier.clone());
        sink.set_alarm(latency_alarm()).unwrap();

        record_all(&sink, &[600.0, 600.0]);
        assert_eq!(notifier.len(), 1);

        record_all(&sink, &[600.0, 400.0, 600.0, 600.0]);
        assert_eq!(notifier.len(), 2);
        assert_eq!(sink.fired_count("high-latency"), Some(2));

        let (name, metric, value) = &notifier.notifications()[0];
        assert_eq!(name, "high-latency");
        assert_eq!(metric, "latency_ms");
        assert_eq!(*value, 600.0);
    }

    #[test]
    fn test_other_metrics_ignored() {
        let notifier = Arc::new(CollectingNotifier::new());
        let sink = MonitorSink::new(notifier.clone());
        sink.set_alarm(latency_alarm()).unwrap();

        sink.record(Metric::new("serve", "error_rate", 900.0));
        sink.record(Metric::new("serve", "error_rate", 900.0));
        assert!(notifier.is_empty());
        assert_eq!(sink.alarm_state("high-latency"), Some(AlarmState::Ok));
    }

    #[test]
    fn test_stage_filter() {
        let notifier = Arc::new(CollectingNotifier::new());
        let sink = MonitorSink::new(notifier.clone());
        sink.set_alarm(latency_alarm().for_stage("train")).unwrap();

        record_all(&sink, &[900.0, 900.0]);
        assert!(notifier.is_empty());

        sink.record(Metric::new("train", "latency_ms", 900.0));
        sink.record(Metric::new("train", "latency_ms", 900.0));
        assert_eq!(notifier.len(), 1);
    }

    #[test]
    fn test_invalid_alarm_rejected() {
        let sink = MonitorSink::default();
        let mut spec = latency_alarm();
        spec.evaluation_periods = 0;
        assert!(matches!(sink.set_alarm(spec), Err(OpsflowError::InvalidAlarm(_))));
    }

    #[test]
    fn test_replace_and_remove_alarm() {
        let sink = MonitorSink::default();
        sink.set_alarm(latency_alarm()).unwrap();
        record_all(&sink, &[900.0, 900.0]);
        assert_eq!(sink.alarm_state("high-latency"), Some(AlarmState::Alarm));

        sink.set_alarm(latency_alarm()).unwrap();
        assert_eq!(sink.alarm_state("high-latency"), Some(AlarmState::Ok));

        assert!(sink.remove_alarm("high-latency"));
        assert!(!sink.remove_alarm("high-latency"));
        assert_eq!(sink.alarm_state("high-latency"), None);
    }

    #[test]
    fn test_failing_notifier_is_swallowed() {
        let sink = MonitorSink::new(Arc::new(FnNotifier::new(|_: &str, _: &Metric, _: f64| {
            anyhow::bail!("pager unreachable")
        })));
        sink.set_alarm(latency_alarm()).unwrap();
        record_all(&sink, &[900.0, 900.0]);
        assert_eq!(sink.fired_count("high-latency"), Some(1));
    }

    #[test]
    fn test_panicking_notifier_is_swallowed() {
        let sink = MonitorSink::new(Arc::new(FnNotifier::new(
            |_: &str, _: &Metric, _: f64| -> anyhow::Result<()> { panic!("boom") },
        )));
        sink.set_alarm(latency_alarm()).unwrap();
        record_all(&sink, &[900.0, 900.0]);
        assert_eq!(sink.alarm_state("high-latency"), Some(AlarmState::Alarm));
    }

    #[test]
    fn test_history_is_bounded() {
        let sink = MonitorSink::default().with_history_limit(3);
        record_all(&sink, &[1.0, 2.0, 3.0, 4.0]);

        let values: Vec<f64> = sink.history("latency_ms").iter().map(|m| m.value).collect();
        assert_eq!(values, vec![2.0, 3.0, 4.0]);
        assert!(sink.history("unknown").is_empty());
    }

    #[test]
    fn test_concurrent_records_fire_once() {
        let notifier = Arc::new(CollectingNotifier::new());
        let sink = Arc::new(MonitorSink::new(notifier.clone()));
        sink.set_alarm(latency_alarm()).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let sink = sink.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        sink.record(Metric::new("serve", "latency_ms", 900.0));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(notifier.len(), 1);
        assert_eq!(sink.history("latency_ms").len(), 100);
    }
}
