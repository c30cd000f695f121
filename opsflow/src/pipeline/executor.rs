//! Stage executor: runs one stage with retry and timeout policy.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::retry::BackoffPolicy;
use super::spec::StageSpec;
use crate::cancellation::CancellationToken;
use crate::config::ExecutorConfig;
use crate::core::{Artifact, Metric, ATTEMPT_DURATION_METRIC};
use crate::errors::{OpsflowError, Result};
use crate::monitor::MetricRecorder;
use crate::observability::SpanTimer;
use crate::store::{self, ArtifactStore};

/// How a single attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The transform returned output.
    Success,
    /// The transform returned an error or panicked.
    Failure,
    /// The attempt exceeded the stage timeout and was aborted.
    Timeout,
}

impl AttemptOutcome {
    /// Returns the metric dimension value for this outcome.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The result of a successful stage execution.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    /// The artifact written under the stage's output key.
    pub artifact: Artifact,
    /// Attempts used, including the successful one.
    pub attempts: u32,
}

/// Runs stages against an artifact store.
///
/// Each attempt runs the transform on its own task so that a timed-out
/// attempt can be aborted and a panicking transform counts as an ordinary
/// failure. Exactly one metric is recorded per attempt.
#[derive(Debug, Clone)]
pub struct StageExecutor {
    store: Arc<dyn ArtifactStore>,
    recorder: Arc<dyn MetricRecorder>,
    backoff: BackoffPolicy,
}

impl StageExecutor {
    /// Creates an executor.
    #[must_use]
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        recorder: Arc<dyn MetricRecorder>,
        config: &ExecutorConfig,
    ) -> Self {
        Self {
            store,
            recorder,
            backoff: config.backoff.clone(),
        }
    }

    /// Returns the artifact store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    /// Returns the backoff policy.
    #[must_use]
    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    /// Resolves each declared input key to its latest version.
    pub async fn resolve_inputs(&self, spec: &StageSpec) -> Result<Vec<Artifact>> {
        let keys = spec.inputs.clone();
        store::blocking(&self.store, move |store| {
            keys.iter().map(|key| store.get(key, None)).collect()
        })
        .await
    }

    /// Resolves the stage's inputs, runs it, and returns the written artifact.
    ///
    /// # Errors
    ///
    /// `NotFound`/`CorruptArtifact` if an input cannot be read, `StageFailed`
    /// once the retry budget is exhausted.
    pub async fn execute(&self, spec: &StageSpec) -> Result<Artifact> {
        let inputs = self.resolve_inputs(spec).await?;
        self.execute_with_inputs(spec, inputs, None).await
    }

    /// Runs the stage on already-resolved inputs.
    pub async fn execute_with_inputs(
        &self,
        spec: &StageSpec,
        inputs: Vec<Artifact>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Artifact> {
        self.execute_tracked(spec, inputs, cancel)
            .await
            .map(|report| report.artifact)
    }

    /// Runs the stage on already-resolved inputs and reports attempts used.
    ///
    /// An attempt that runs past the stage timeout is a timeout even if it
    /// eventually returned output. If `cancel` is set after a failed attempt,
    /// including during the backoff that follows it, no further attempt
    /// starts and `Cancelled` is returned. A running attempt is never
    /// interrupted.
    pub async fn execute_tracked(
        &self,
        spec: &StageSpec,
        inputs: Vec<Artifact>,
        cancel: Option<&CancellationToken>,
    ) -> Result<ExecutionReport> {
        let budget = spec.retry_budget.max(1);
        let inputs = Arc::new(inputs);
        let mut last_error = String::new();

        for attempt in 1..=budget {
            let timer = SpanTimer::start(format!("{}#{attempt}", spec.name));
            let transform = spec.transform.clone();
            let attempt_inputs = inputs.clone();
            let mut handle =
                tokio::spawn(async move { transform.apply(attempt_inputs.as_slice()).await });

            let result = match tokio::time::timeout(spec.timeout, &mut handle).await {
                Ok(Ok(Ok(_))) if timer.elapsed() > spec.timeout => Err((
                    AttemptOutcome::Timeout,
                    format!(
                        "attempt finished after the {}ms timeout",
                        spec.timeout.as_millis()
                    ),
                )),
                Ok(Ok(Ok(content))) => Ok(content),
                Ok(Ok(Err(e))) => Err((AttemptOutcome::Failure, format!("{e:#}"))),
                Ok(Err(join)) => Err((AttemptOutcome::Failure, format!("transform panicked: {join}"))),
                Err(_) => {
                    handle.abort();
                    Err((
                        AttemptOutcome::Timeout,
                        format!("attempt timed out after {}ms", spec.timeout.as_millis()),
                    ))
                }
            };
            let duration_ms = timer.finish();

            match result {
                Ok(content) => {
                    self.record(spec, attempt, AttemptOutcome::Success, duration_ms);
                    let output = spec.output.clone();
                    let artifact =
                        store::blocking(&self.store, move |store| store.put(&output, content))
                            .await?;
                    info!(
                        stage = %spec.name,
                        attempt,
                        key = %artifact.key,
                        version = artifact.version,
                        duration_ms,
                        "Stage attempt succeeded"
                    );
                    return Ok(ExecutionReport {
                        artifact,
                        attempts: attempt,
                    });
                }
                Err((outcome, message)) => {
                    self.record(spec, attempt, outcome, duration_ms);
                    warn!(
                        stage = %spec.name,
                        attempt,
                        budget,
                        outcome = %outcome,
                        error = %message,
                        "Stage attempt failed"
                    );
                    last_error = message;

                    if attempt == budget {
                        break;
                    }
                    if let Some(token) = cancel.filter(|t| t.is_cancelled()) {
                        return Err(cancelled(token));
                    }

                    let delay = self.backoff.delay_for(attempt);
                    debug!(stage = %spec.name, attempt, delay_ms = delay.as_millis() as u64, "Backing off");
                    match cancel {
                        Some(token) => {
                            tokio::select! {
                                () = tokio::time::sleep(delay) => {}
                                () = token.cancelled() => {
                                    debug!(stage = %spec.name, attempt, "Cancelled during backoff");
                                    return Err(cancelled(token));
                                }
                            }
                        }
                        None => tokio::time::sleep(delay).await,
                    }
                }
            }
        }

        Err(OpsflowError::StageFailed {
            stage: spec.name.clone(),
            attempts: budget,
            last_error,
        })
    }

    fn record(&self, spec: &StageSpec, attempt: u32, outcome: AttemptOutcome, duration_ms: f64) {
        self.recorder.record(
            Metric::new(&spec.name, ATTEMPT_DURATION_METRIC, duration_ms)
                .with_dimension("outcome", outcome.as_str())
                .with_dimension("attempt", attempt.to_string()),
        );
    }
}

fn cancelled(token: &CancellationToken) -> OpsflowError {
    OpsflowError::Cancelled(token.reason().unwrap_or_else(|| "cancelled".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::{AlarmSpec, Comparison, MonitorSink};
    use crate::store::InMemoryArtifactStore;
    use crate::testing::{
        CollectingNotifier, ConcatTransform, CountingTransform, FailingTransform, FlakyTransform,
        SlowTransform, StaticTransform,
    };
    use std::time::Duration;

    struct Harness {
        store: Arc<InMemoryArtifactStore>,
        monitor: Arc<MonitorSink>,
        executor: StageExecutor,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryArtifactStore::new());
        let monitor = Arc::new(MonitorSink::default());
        let config = ExecutorConfig {
            backoff: BackoffPolicy::new().with_base_delay_ms(1).with_max_delay_ms(4),
        };
        let executor = StageExecutor::new(store.clone(), monitor.clone(), &config);
        Harness {
            store,
            monitor,
            executor,
        }
    }

    fn outcomes(monitor: &MonitorSink) -> Vec<String> {
        monitor
            .history(ATTEMPT_DURATION_METRIC)
            .iter()
            .map(|m| m.dimension("outcome").unwrap_or_default().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_execute_writes_output_version() {
        let h = harness();
        h.store.put("raw", b"a".to_vec()).unwrap();
        h.store.put("labels", b"b".to_vec()).unwrap();

        let spec = StageSpec::new("join", "joined", Arc::new(ConcatTransform))
            .with_inputs(["raw", "labels"]);
        let first = h.executor.execute(&spec).await.unwrap();
        let second = h.executor.execute(&spec).await.unwrap();

        assert_eq!(first.content, b"ab");
        assert_eq!((first.version, second.version), (1, 2));
        assert_eq!(outcomes(&h.monitor), vec!["success", "success"]);
    }

    #[tokio::test]
    async fn test_inputs_resolve_to_latest_version() {
        let h = harness();
        h.store.put("raw", b"old".to_vec()).unwrap();
        h.store.put("raw", b"new".to_vec()).unwrap();

        let spec = StageSpec::new("copy", "copy", Arc::new(ConcatTransform)).with_input("raw");
        assert_eq!(h.executor.execute(&spec).await.unwrap().content, b"new");
    }

    #[tokio::test]
    async fn test_missing_input_is_not_found() {
        let h = harness();
        let spec = StageSpec::new("copy", "copy", Arc::new(ConcatTransform)).with_input("ghost");
        assert!(matches!(
            h.executor.execute(&spec).await,
            Err(OpsflowError::NotFound(_))
        ));
        assert!(outcomes(&h.monitor).is_empty());
    }

    #[tokio::test]
    async fn test_exhausts_exact_budget() {
        let h = harness();
        let failing = Arc::new(CountingTransform::new(FailingTransform::new("disk full")));
        let spec = StageSpec::new("train", "model", failing.clone()).with_retry_budget(4);

        let err = h.executor.execute(&spec).await.unwrap_err();

        match err {
            OpsflowError::StageFailed {
                stage,
                attempts,
                last_error,
            } => {
                assert_eq!(stage, "train");
                assert_eq!(attempts, 4);
                assert!(last_error.contains("disk full"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(failing.calls(), 4);
        assert_eq!(outcomes(&h.monitor), vec!["failure"; 4]);
        assert!(h.store.list_versions("model").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recovers_within_budget() {
        let h = harness();
        let flaky = Arc::new(FlakyTransform::new(2, b"weights".to_vec()));
        let spec = StageSpec::new("train", "model", flaky).with_retry_budget(3);

        let report = h
            .executor
            .execute_tracked(&spec, Vec::new(), None)
            .await
            .unwrap();

        assert_eq!(report.attempts, 3);
        assert_eq!(report.artifact.content, b"weights");
        assert_eq!(outcomes(&h.monitor), vec!["failure", "failure", "success"]);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failed_attempt() {
        let h = harness();
        let slow = Arc::new(SlowTransform::new(Duration::from_secs(10), b"late".to_vec()));
        let spec = StageSpec::new("train", "model", slow)
            .with_retry_budget(2)
            .with_timeout(Duration::from_millis(20));

        let err = h.executor.execute(&spec).await.unwrap_err();

        assert!(matches!(err, OpsflowError::StageFailed { attempts: 2, ref last_error, .. } if last_error.contains("timed out")));
        assert_eq!(outcomes(&h.monitor), vec!["timeout", "timeout"]);
    }

    #[tokio::test]
    async fn test_slow_sync_transform_times_out() {
        let h = harness();
        let sleepy = Arc::new(crate::stages::FnTransform::new(
            "sleepy",
            |_: &[Artifact]| -> anyhow::Result<Vec<u8>> {
                std::thread::sleep(Duration::from_millis(300));
                Ok(b"late".to_vec())
            },
        ));
        let spec = StageSpec::new("train", "model", sleepy)
            .with_retry_budget(1)
            .with_timeout(Duration::from_millis(20));

        let started = std::time::Instant::now();
        let err = h.executor.execute(&spec).await.unwrap_err();

        assert!(started.elapsed() < Duration::from_millis(250));
        assert!(matches!(err, OpsflowError::StageFailed { attempts: 1, .. }));
        assert_eq!(outcomes(&h.monitor), vec!["timeout"]);
        assert!(h.store.list_versions("model").unwrap().is_empty());
    }

    /// Blocks whatever thread polls it, starving the timer.
    #[derive(Debug)]
    struct ThreadBlockingTransform;

    #[async_trait::async_trait]
    impl crate::stages::Transform for ThreadBlockingTransform {
        async fn apply(&self, _inputs: &[Artifact]) -> anyhow::Result<Vec<u8>> {
            std::thread::sleep(Duration::from_millis(100));
            Ok(b"late".to_vec())
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_output_returned_after_timeout_is_discarded() {
        let h = harness();
        let spec = StageSpec::new("train", "model", Arc::new(ThreadBlockingTransform))
            .with_retry_budget(1)
            .with_timeout(Duration::from_millis(10));

        let err = h.executor.execute(&spec).await.unwrap_err();

        assert!(matches!(err, OpsflowError::StageFailed { ref last_error, .. } if last_error.contains("after the 10ms timeout")));
        assert_eq!(outcomes(&h.monitor), vec!["timeout"]);
        assert!(h.store.list_versions("model").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_panicking_transform_is_a_failed_attempt() {
        let h = harness();
        let panicky = Arc::new(crate::stages::FnTransform::new(
            "panicky",
            |_: &[Artifact]| -> anyhow::Result<Vec<u8>> { panic!("bad tensor shape") },
        ));
        let spec = StageSpec::new("train", "model", panicky).with_retry_budget(2);

        let err = h.executor.execute(&spec).await.unwrap_err();
        assert!(matches!(err, OpsflowError::StageFailed { attempts: 2, ref last_error, .. } if last_error.contains("panicked")));
    }

    #[tokio::test]
    async fn test_cancellation_stops_further_attempts() {
        let h = harness();
        let failing = Arc::new(CountingTransform::new(FailingTransform::new("nope")));
        let spec = StageSpec::new("train", "model", failing.clone()).with_retry_budget(5);
        let token = CancellationToken::new();
        token.cancel("operator");

        let err = h
            .executor
            .execute_with_inputs(&spec, Vec::new(), Some(&token))
            .await
            .unwrap_err();

        assert!(matches!(err, OpsflowError::Cancelled(ref reason) if reason == "operator"));
        assert_eq!(failing.calls(), 1);
    }

    #[tokio::test]
    async fn test_attempt_metrics_feed_alarms() {
        let store = Arc::new(InMemoryArtifactStore::new());
        let notifier = Arc::new(CollectingNotifier::new());
        let monitor = Arc::new(MonitorSink::new(notifier.clone()));
        monitor
            .set_alarm(AlarmSpec::new(
                "slow-training",
                ATTEMPT_DURATION_METRIC,
                -1.0,
                Comparison::GreaterThan,
                2,
            ))
            .unwrap();
        let executor = StageExecutor::new(store, monitor, &ExecutorConfig::default());

        let spec = StageSpec::new("train", "model", Arc::new(StaticTransform::new(b"m".to_vec())));
        executor.execute(&spec).await.unwrap();
        assert!(notifier.is_empty());
        executor.execute(&spec).await.unwrap();
        assert_eq!(notifier.len(), 1);
    }
}
