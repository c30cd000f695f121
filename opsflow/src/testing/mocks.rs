//! Mock transforms, notifiers and provisioners for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};

use crate::core::{Artifact, Metric};
use crate::deploy::Provisioner;
use crate::monitor::AlarmNotifier;
use crate::stages::Transform;

/// A transform that always returns the same content.
#[derive(Debug, Clone)]
pub struct StaticTransform {
    content: Vec<u8>,
}

impl StaticTransform {
    /// Creates a transform returning `content`.
    #[must_use]
    pub fn new(content: impl Into<Vec<u8>>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

#[async_trait]
impl Transform for StaticTransform {
    async fn apply(&self, _inputs: &[Artifact]) -> anyhow::Result<Vec<u8>> {
        Ok(self.content.clone())
    }
}

/// A transform that concatenates its inputs in order.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConcatTransform;

#[async_trait]
impl Transform for ConcatTransform {
    async fn apply(&self, inputs: &[Artifact]) -> anyhow::Result<Vec<u8>> {
        Ok(inputs.iter().flat_map(|a| a.content.iter().copied()).collect())
    }
}

/// A transform that always fails.
#[derive(Debug, Clone)]
pub struct FailingTransform {
    error: String,
}

impl FailingTransform {
    /// Creates a transform failing with `error`.
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

#[async_trait]
impl Transform for FailingTransform {
    async fn apply(&self, _inputs: &[Artifact]) -> anyhow::Result<Vec<u8>> {
        anyhow::bail!("{}", self.error)
    }
}

/// A transform that fails a fixed number of times, then succeeds.
#[derive(Debug)]
pub struct FlakyTransform {
    failures: u32,
    calls: AtomicU32,
    content: Vec<u8>,
}

impl FlakyTransform {
    /// Fails the first `failures` calls, then returns `content`.
    #[must_use]
    pub fn new(failures: u32, content: impl Into<Vec<u8>>) -> Self {
        Self {
            failures,
            calls: AtomicU32::new(0),
            content: content.into(),
        }
    }

    /// Returns the number of calls so far.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transform for FlakyTransform {
    async fn apply(&self, _inputs: &[Artifact]) -> anyhow::Result<Vec<u8>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            anyhow::bail!("transient failure {call}/{}", self.failures);
        }
        Ok(self.content.clone())
    }
}

/// A transform that sleeps before returning.
#[derive(Debug, Clone)]
pub struct SlowTransform {
    delay: Duration,
    content: Vec<u8>,
}

impl SlowTransform {
    /// Sleeps for `delay`, then returns `content`.
    #[must_use]
    pub fn new(delay: Duration, content: impl Into<Vec<u8>>) -> Self {
        Self {
            delay,
            content: content.into(),
        }
    }
}

#[async_trait]
impl Transform for SlowTransform {
    async fn apply(&self, _inputs: &[Artifact]) -> anyhow::Result<Vec<u8>> {
        tokio::time::sleep(self.delay).await;
        Ok(self.content.clone())
    }
}

/// Wraps a transform and counts calls.
#[derive(Debug)]
pub struct CountingTransform<T> {
    inner: T,
    calls: AtomicU32,
}

impl<T: Transform> CountingTransform<T> {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            calls: AtomicU32::new(0),
        }
    }

    /// Returns the number of calls so far.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<T: Transform> Transform for CountingTransform<T> {
    async fn apply(&self, inputs: &[Artifact]) -> anyhow::Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.apply(inputs).await
    }
}

/// A transform that blocks until released.
///
/// Lets a test hold a stage mid-attempt, act on the run, then let it finish.
#[derive(Debug)]
pub struct GatedTransform {
    content: Vec<u8>,
    entered: Notify,
    gate: Semaphore,
}

impl GatedTransform {
    /// Creates a closed gate that returns `content` once released.
    #[must_use]
    pub fn new(content: impl Into<Vec<u8>>) -> Self {
        Self {
            content: content.into(),
            entered: Notify::new(),
            gate: Semaphore::new(0),
        }
    }

    /// Waits until an attempt has entered the transform.
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    /// Lets one waiting (or future) attempt finish.
    pub fn release(&self) {
        self.gate.add_permits(1);
    }
}

#[async_trait]
impl Transform for GatedTransform {
    async fn apply(&self, _inputs: &[Artifact]) -> anyhow::Result<Vec<u8>> {
        self.entered.notify_one();
        self.gate.acquire().await?.forget();
        Ok(self.content.clone())
    }
}

/// A notifier that records every notification.
#[derive(Debug, Default)]
pub struct CollectingNotifier {
    notifications: Mutex<Vec<(String, String, f64)>>,
}

impl CollectingNotifier {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `(alarm, metric name, value)` for each notification.
    #[must_use]
    pub fn notifications(&self) -> Vec<(String, String, f64)> {
        self.notifications.lock().clone()
    }

    /// Returns the number of notifications.
    #[must_use]
    pub fn len(&self) -> usize {
        self.notifications.lock().len()
    }

    /// Returns true if nothing was notified.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.notifications.lock().is_empty()
    }
}

impl AlarmNotifier for CollectingNotifier {
    fn notify(&self, alarm_name: &str, metric: &Metric, value: f64) -> anyhow::Result<()> {
        self.notifications
            .lock()
            .push((alarm_name.to_string(), metric.name.clone(), value));
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ProvisionerScript {
    provision_failures: u32,
    fail_decommission: bool,
    next_id: u32,
    provisioned: Vec<(String, String)>,
    decommissioned: Vec<String>,
}

/// A provisioner whose failures are scripted by the test.
///
/// Resource ids are `res-1`, `res-2`, ... in provisioning order.
#[derive(Debug, Default)]
pub struct ScriptedProvisioner {
    script: Mutex<ProvisionerScript>,
}

impl ScriptedProvisioner {
    /// Creates a provisioner that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` provision calls fail.
    pub fn fail_next_provisions(&self, count: u32) {
        self.script.lock().provision_failures = count;
    }

    /// Makes every decommission call fail (or succeed again).
    pub fn set_fail_decommission(&self, fail: bool) {
        self.script.lock().fail_decommission = fail;
    }

    /// Returns `(resource id, artifact key@version)` for each provisioned resource.
    #[must_use]
    pub fn provisioned(&self) -> Vec<(String, String)> {
        self.script.lock().provisioned.clone()
    }

    /// Returns the resource ids decommissioned so far.
    #[must_use]
    pub fn decommissioned(&self) -> Vec<String> {
        self.script.lock().decommissioned.clone()
    }
}

#[async_trait]
impl Provisioner for ScriptedProvisioner {
    async fn provision(&self, endpoint_name: &str, artifact: &Artifact) -> anyhow::Result<String> {
        let mut script = self.script.lock();
        if script.provision_failures > 0 {
            script.provision_failures -= 1;
            anyhow::bail!("capacity unavailable for '{endpoint_name}'");
        }
        script.next_id += 1;
        let id = format!("res-{}", script.next_id);
        script
            .provisioned
            .push((id.clone(), artifact.to_ref().to_string()));
        Ok(id)
    }

    async fn decommission(&self, resource_id: &str) -> anyhow::Result<()> {
        let mut script = self.script.lock();
        if script.fail_decommission {
            anyhow::bail!("resource '{resource_id}' is still draining");
        }
        script.decommissioned.push(resource_id.to_string());
        Ok(())
    }
}
