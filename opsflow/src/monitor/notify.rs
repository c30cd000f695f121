//! Alarm notification callbacks.

use std::fmt::Debug;

use crate::core::Metric;

/// Receives alarm onset notifications.
///
/// Invoked synchronously by the monitor while the alarm's evaluation lock is
/// held; implementations must not register or remove alarms on the same
/// monitor. Returned errors are logged and swallowed.
pub trait AlarmNotifier: Send + Sync + Debug {
    /// Called once each time `alarm_name` transitions into the firing state.
    fn notify(&self, alarm_name: &str, metric: &Metric, value: f64) -> anyhow::Result<()>;
}

/// A notifier that logs alarms through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

impl AlarmNotifier for LoggingNotifier {
    fn notify(&self, alarm_name: &str, metric: &Metric, value: f64) -> anyhow::Result<()> {
        tracing::warn!(
            alarm = alarm_name,
            metric = %metric.name,
            stage = %metric.stage,
            value,
            "Alarm fired"
        );
        Ok(())
    }
}

/// A closure-based notifier.
pub struct FnNotifier<F>
where
    F: Fn(&str, &Metric, f64) -> anyhow::Result<()> + Send + Sync,
{
    func: F,
}

impl<F> FnNotifier<F>
where
    F: Fn(&str, &Metric, f64) -> anyhow::Result<()> + Send + Sync,
{
    /// Wraps a closure.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> Debug for FnNotifier<F>
where
    F: Fn(&str, &Metric, f64) -> anyhow::Result<()> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnNotifier").finish_non_exhaustive()
    }
}

impl<F> AlarmNotifier for FnNotifier<F>
where
    F: Fn(&str, &Metric, f64) -> anyhow::Result<()> + Send + Sync,
{
    fn notify(&self, alarm_name: &str, metric: &Metric, value: f64) -> anyhow::Result<()> {
        (self.func)(alarm_name, metric, value)
    }
}
