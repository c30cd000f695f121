//! Pipeline engine.
//!
//! The engine accepts run specifications, executes their stages in order on
//! a background task, and persists the run record after every transition.
//! Runs are independent: each has its own record, cancellation token and
//! task, and they share only the artifact store.
//!
//! Re-submitting under a run id that has a saved record resumes it: stages
//! whose previous output still resolves and whose inputs are unchanged are
//! skipped.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::executor::StageExecutor;
use super::run::{PipelineRun, RunFailure};
use super::spec::{RunSpec, StageSpec};
use super::state::{InMemoryRunStateStore, JsonFileRunStateStore, RunStateStore};
use crate::cancellation::CancellationToken;
use crate::config::{ExecutorConfig, OpsflowConfig};
use crate::core::{Artifact, ArtifactRef, RunStatus, StageStatus};
use crate::errors::{ContractErrorInfo, OpsflowError, PipelineValidationError, Result};
use crate::events::{kinds, EventSink, NoOpEventSink};
use crate::monitor::{MetricRecorder, NoOpRecorder};
use crate::store::{self, ArtifactStore, FsArtifactStore, InMemoryArtifactStore};
use crate::utils::{fingerprint, generate_run_id};

const MAX_RUN_ID_LEN: usize = 128;

/// Builder for [`PipelineEngine`].
#[derive(Debug, Clone)]
pub struct EngineBuilder {
    store: Arc<dyn ArtifactStore>,
    recorder: Arc<dyn MetricRecorder>,
    state: Arc<dyn RunStateStore>,
    events: Arc<dyn EventSink>,
    executor: ExecutorConfig,
}

impl EngineBuilder {
    /// Starts a builder over `store` with in-memory run state and no-op
    /// metric and event sinks.
    #[must_use]
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            store,
            recorder: Arc::new(NoOpRecorder),
            state: Arc::new(InMemoryRunStateStore::new()),
            events: Arc::new(NoOpEventSink),
            executor: ExecutorConfig::default(),
        }
    }

    /// Starts a builder from configuration.
    ///
    /// With a `state_dir`, artifacts live under `<state_dir>/artifacts` and
    /// run records under `<state_dir>/runs`; otherwise both are in memory.
    pub fn from_config(config: &OpsflowConfig) -> Result<Self> {
        let builder = match &config.state_dir {
            Some(dir) => Self::new(Arc::new(FsArtifactStore::open(dir.join("artifacts"))?))
                .state_store(Arc::new(JsonFileRunStateStore::open(dir.join("runs"))?)),
            None => Self::new(Arc::new(InMemoryArtifactStore::new())),
        };
        Ok(builder.executor_config(config.executor.clone()))
    }

    /// Sets the metric recorder that receives per-attempt metrics.
    #[must_use]
    pub fn recorder(mut self, recorder: Arc<dyn MetricRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    /// Sets the run state store.
    #[must_use]
    pub fn state_store(mut self, state: Arc<dyn RunStateStore>) -> Self {
        self.state = state;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Sets the executor configuration.
    #[must_use]
    pub fn executor_config(mut self, config: ExecutorConfig) -> Self {
        self.executor = config;
        self
    }

    /// Builds the engine.
    #[must_use]
    pub fn build(self) -> PipelineEngine {
        PipelineEngine {
            inner: Arc::new(EngineInner {
                executor: StageExecutor::new(self.store, self.recorder, &self.executor),
                state: self.state,
                events: self.events,
                active: DashMap::new(),
            }),
        }
    }
}

/// Executes pipeline runs.
///
/// Cloning is cheap; clones share the same runs.
#[derive(Debug, Clone)]
pub struct PipelineEngine {
    inner: Arc<EngineInner>,
}

#[derive(Debug)]
struct EngineInner {
    executor: StageExecutor,
    state: Arc<dyn RunStateStore>,
    events: Arc<dyn EventSink>,
    active: DashMap<String, Arc<ActiveRun>>,
}

#[derive(Debug)]
struct ActiveRun {
    record: RwLock<PipelineRun>,
    /// Serializes mutate-and-save so saved records never go backwards.
    persist: Mutex<()>,
    token: CancellationToken,
    done: watch::Sender<bool>,
}

impl PipelineEngine {
    /// Starts a builder over `store`.
    #[must_use]
    pub fn builder(store: Arc<dyn ArtifactStore>) -> EngineBuilder {
        EngineBuilder::new(store)
    }

    /// Creates an engine over `store` with default settings.
    #[must_use]
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        EngineBuilder::new(store).build()
    }

    /// Returns the shared artifact store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        self.inner.executor.store()
    }

    /// Writes a pre-seeded input artifact.
    pub fn seed(&self, key: &str, content: impl Into<Vec<u8>>) -> Result<Artifact> {
        self.store().put(key, content.into())
    }

    /// Validates and starts a run under a fresh run id.
    ///
    /// # Errors
    ///
    /// `InvalidPipeline` if the run specification is malformed; nothing is executed.
    pub async fn submit(&self, spec: RunSpec) -> Result<String> {
        self.submit_with_id(generate_run_id(), spec).await
    }

    /// Validates and starts (or resumes) a run under `run_id`.
    ///
    /// # Errors
    ///
    /// `InvalidPipeline` if the run specification or run id is malformed, `RunInProgress`
    /// if a run with this id is still executing.
    pub async fn submit_with_id(&self, run_id: impl Into<String>, spec: RunSpec) -> Result<String> {
        let run_id = run_id.into();
        validate_run_id(&run_id)?;
        if self.inner.active.contains_key(&run_id) {
            return Err(OpsflowError::RunInProgress(run_id));
        }

        let seeded = self.seeded_keys(&spec).await?;
        spec.validate(|key| seeded.contains(key))?;

        let previous = self.inner.state.load(&run_id).await?;
        let attempt = previous.as_ref().map_or(1, |p| p.attempt + 1);
        let record = PipelineRun::new(&run_id, &spec, attempt);
        let (done, _) = watch::channel(false);
        let run = Arc::new(ActiveRun {
            record: RwLock::new(record),
            persist: Mutex::new(()),
            token: CancellationToken::new(),
            done,
        });

        match self.inner.active.entry(run_id.clone()) {
            Entry::Occupied(_) => return Err(OpsflowError::RunInProgress(run_id)),
            Entry::Vacant(slot) => {
                slot.insert(run.clone());
            }
        }

        self.inner.update(&run, |_| ()).await;
        info!(
            run_id = %run_id,
            attempt,
            pipeline = spec.name.as_deref().unwrap_or(""),
            stages = spec.stages.len(),
            "Run submitted"
        );
        self.inner
            .emit(
                kinds::RUN_SUBMITTED,
                json!({ "run_id": run_id, "attempt": attempt, "stages": spec.stage_names() }),
            )
            .await;

        let inner = self.inner.clone();
        let span = info_span!("run", run_id = %run_id, attempt);
        tokio::spawn(async move { inner.drive(run, spec, previous).await }.instrument(span));

        Ok(run_id)
    }

    /// Submits a run and waits for it to finish.
    pub async fn run(&self, spec: RunSpec) -> Result<PipelineRun> {
        let run_id = self.submit(spec).await?;
        self.wait(&run_id).await
    }

    /// Returns the current record of a run.
    ///
    /// # Errors
    ///
    /// `NotFound` if no run with this id exists.
    pub async fn status(&self, run_id: &str) -> Result<PipelineRun> {
        let active = self
            .inner
            .active
            .get(run_id)
            .map(|entry| entry.value().record.read().clone());
        if let Some(record) = active {
            return Ok(record);
        }
        self.inner
            .state
            .load(run_id)
            .await?
            .ok_or_else(|| OpsflowError::not_found(format!("run '{run_id}'")))
    }

    /// Cancels a run.
    pub async fn cancel(&self, run_id: &str) -> Result<PipelineRun> {
        self.cancel_with_reason(run_id, "cancelled by caller").await
    }

    /// Cancels a run with a reason.
    ///
    /// The status becomes `Cancelled` and is persisted before this returns.
    /// The in-flight stage, if any, finishes its current attempt but no
    /// further attempt or stage starts. Cancelling a finished run is a no-op.
    ///
    /// # Errors
    ///
    /// `NotFound` if no run with this id exists.
    pub async fn cancel_with_reason(
        &self,
        run_id: &str,
        reason: impl Into<String>,
    ) -> Result<PipelineRun> {
        let reason = reason.into();
        let active = self.inner.active.get(run_id).map(|e| e.value().clone());

        if let Some(run) = active {
            run.token.cancel(reason.clone());
            let changed = self
                .inner
                .update(&run, |record| mark_cancelled(record, &reason))
                .await;
            if changed {
                self.inner.announce_cancelled(run_id, &reason).await;
            }
            let record = run.record.read().clone();
            return Ok(record);
        }

        let Some(mut record) = self.inner.state.load(run_id).await? else {
            return Err(OpsflowError::not_found(format!("run '{run_id}'")));
        };
        if mark_cancelled(&mut record, &reason) {
            warn!(run_id, "Cancelling orphaned run record");
            self.inner.state.save(&record).await?;
            self.inner.announce_cancelled(run_id, &reason).await;
        }
        Ok(record)
    }

    /// Waits for a run to reach a terminal status and returns its record.
    ///
    /// # Errors
    ///
    /// `NotFound` if no run with this id exists.
    pub async fn wait(&self, run_id: &str) -> Result<PipelineRun> {
        let active = self.inner.active.get(run_id).map(|e| e.value().clone());
        let Some(run) = active else {
            return self.status(run_id).await;
        };

        let mut done = run.done.subscribe();
        let finished = done.wait_for(|finished| *finished).await.map(|_| ());
        if finished.is_err() {
            return Err(OpsflowError::Internal(format!(
                "run '{run_id}' stopped without reporting completion"
            )));
        }
        let record = run.record.read().clone();
        Ok(record)
    }

    /// Waits for several runs concurrently.
    pub async fn wait_all(&self, run_ids: &[String]) -> Vec<Result<PipelineRun>> {
        futures::future::join_all(run_ids.iter().map(|id| self.wait(id))).await
    }

    /// Lists all known run ids.
    pub async fn list_runs(&self) -> Result<Vec<String>> {
        self.inner.state.list().await
    }

    /// Returns the ids of runs currently executing.
    #[must_use]
    pub fn active_runs(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.active.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    async fn seeded_keys(&self, spec: &RunSpec) -> Result<HashSet<String>> {
        let inputs: HashSet<String> = spec
            .stages
            .iter()
            .flat_map(|s| s.inputs.iter().cloned())
            .collect();
        store::blocking(self.store(), move |store| {
            let mut seeded = HashSet::new();
            for key in inputs {
                if store.contains(&key)? {
                    seeded.insert(key);
                }
            }
            Ok(seeded)
        })
        .await
    }
}

impl EngineInner {
    /// Applies `f` to the run record and saves the result.
    ///
    /// A failed save is logged; the in-memory record stays authoritative.
    async fn update<F, R>(&self, run: &ActiveRun, f: F) -> R
    where
        F: FnOnce(&mut PipelineRun) -> R + Send,
        R: Send,
    {
        let _guard = run.persist.lock().await;
        let (result, snapshot) = {
            let mut record = run.record.write();
            let result = f(&mut record);
            (result, record.clone())
        };
        if let Err(e) = self.state.save(&snapshot).await {
            error!(run_id = %snapshot.run_id, error = %e, "Failed to persist run state");
        }
        result
    }

    async fn emit(&self, kind: &str, data: serde_json::Value) {
        self.events.emit(kind, Some(data)).await;
    }

    async fn announce_cancelled(&self, run_id: &str, reason: &str) {
        info!(run_id, reason, "Run cancelled");
        self.emit(kinds::RUN_CANCELLED, json!({ "run_id": run_id, "reason": reason }))
            .await;
    }

    async fn drive(self: Arc<Self>, run: Arc<ActiveRun>, spec: RunSpec, previous: Option<PipelineRun>) {
        let run_id = run.record.read().run_id.clone();

        let started = self
            .update(&run, |record| record.transition(RunStatus::Running))
            .await;
        if started {
            info!("Run started");
            self.emit(kinds::RUN_STARTED, json!({ "run_id": run_id })).await;
            self.execute_stages(&run, &run_id, &spec, previous.as_ref())
                .await;
        }

        let status = run.record.read().status;
        info!(status = %status, "Run finished");
        self.active
            .remove_if(&run_id, |_, current| Arc::ptr_eq(current, &run));
        run.done.send_replace(true);
    }

    async fn execute_stages(
        &self,
        run: &ActiveRun,
        run_id: &str,
        spec: &RunSpec,
        previous: Option<&PipelineRun>,
    ) {
        for stage in &spec.stages {
            if run.token.is_cancelled() {
                self.stop_cancelled(run, run_id).await;
                return;
            }

            let inputs = match self.executor.resolve_inputs(stage).await {
                Ok(inputs) => inputs,
                Err(e) => {
                    self.fail(run, run_id, &stage.name, e.to_string(), 0).await;
                    return;
                }
            };
            let input_fingerprint = fingerprint(
                inputs
                    .iter()
                    .map(|a| (a.key.as_str(), a.content_hash.as_str())),
            );

            if let Some(output) = self
                .reusable_output(previous, stage, &input_fingerprint)
                .await
            {
                info!(stage = %stage.name, output = %output, "Skipping stage with unchanged inputs");
                let data = json!({ "run_id": run_id, "stage": stage.name, "output": output });
                self.update(run, |record| {
                    if let Some(s) = record.stage_mut(&stage.name) {
                        s.skip(output, input_fingerprint);
                    }
                })
                .await;
                self.emit(kinds::STAGE_SKIPPED, data).await;
                continue;
            }

            self.update(run, |record| {
                if let Some(s) = record.stage_mut(&stage.name) {
                    s.start(input_fingerprint);
                }
            })
            .await;
            debug!(stage = %stage.name, "Stage started");
            self.emit(
                kinds::STAGE_STARTED,
                json!({ "run_id": run_id, "stage": stage.name }),
            )
            .await;

            match self
                .executor
                .execute_tracked(stage, inputs, Some(&run.token))
                .await
            {
                Ok(report) => {
                    let output = report.artifact.to_ref();
                    let data = json!({
                        "run_id": run_id,
                        "stage": stage.name,
                        "output": output,
                        "attempts": report.attempts,
                    });
                    self.update(run, |record| {
                        if let Some(s) = record.stage_mut(&stage.name) {
                            s.succeed(output, report.attempts);
                        }
                    })
                    .await;
                    self.emit(kinds::STAGE_SUCCEEDED, data).await;
                }
                Err(OpsflowError::Cancelled(_)) => {
                    self.stop_cancelled(run, run_id).await;
                    return;
                }
                Err(OpsflowError::StageFailed {
                    attempts,
                    last_error,
                    ..
                }) => {
                    self.fail(run, run_id, &stage.name, last_error, attempts).await;
                    return;
                }
                Err(other) => {
                    self.fail(run, run_id, &stage.name, other.to_string(), 0).await;
                    return;
                }
            }
        }

        let succeeded = self
            .update(run, |record| {
                record.all_stages_complete() && record.transition(RunStatus::Succeeded)
            })
            .await;
        if succeeded {
            info!("Run succeeded");
            self.emit(kinds::RUN_SUCCEEDED, json!({ "run_id": run_id }))
                .await;
        }
    }

    /// Marks the remaining stages cancelled and the run cancelled if the
    /// caller's `cancel` has not already done so.
    async fn stop_cancelled(&self, run: &ActiveRun, run_id: &str) {
        let reason = run
            .token
            .reason()
            .unwrap_or_else(|| "cancelled".to_string());
        let changed = self
            .update(run, |record| {
                for stage in &mut record.stages {
                    if matches!(stage.status, StageStatus::Pending | StageStatus::Running) {
                        stage.cancel();
                    }
                }
                mark_cancelled(record, &reason)
            })
            .await;
        if changed {
            self.announce_cancelled(run_id, &reason).await;
        }
    }

    async fn fail(&self, run: &ActiveRun, run_id: &str, stage: &str, error: String, attempts: u32) {
        warn!(stage, attempts, error = %error, "Stage failed; stopping run");
        let data = json!({
            "run_id": run_id,
            "stage": stage,
            "attempts": attempts,
            "error": error,
        });
        let failed = self
            .update(run, |record| {
                if let Some(s) = record.stage_mut(stage) {
                    s.fail(error.clone(), attempts);
                }
                let failed = record.transition(RunStatus::Failed);
                if failed {
                    record.failure = Some(RunFailure {
                        stage: stage.to_string(),
                        error,
                        attempts,
                    });
                }
                failed
            })
            .await;

        self.emit(kinds::STAGE_FAILED, data.clone()).await;
        if failed {
            self.emit(kinds::RUN_FAILED, data).await;
        }
    }

    async fn reusable_output(
        &self,
        previous: Option<&PipelineRun>,
        stage: &StageSpec,
        input_fingerprint: &str,
    ) -> Option<ArtifactRef> {
        let record = previous?.stage(&stage.name)?;
        if !record.status.is_complete()
            || record.input_fingerprint.as_deref() != Some(input_fingerprint)
        {
            return None;
        }
        let output = record.output.clone().filter(|o| o.key == stage.output)?;
        let reference = output.clone();
        match store::blocking(self.executor.store(), move |store| store.resolve(&reference)).await {
            Ok(_) => Some(output),
            Err(e) => {
                debug!(stage = %stage.name, output = %output, error = %e, "Previous output not reusable");
                None
            }
        }
    }
}

fn mark_cancelled(record: &mut PipelineRun, reason: &str) -> bool {
    let changed = record.transition(RunStatus::Cancelled);
    if changed {
        record.cancel_reason = Some(reason.to_string());
    }
    changed
}

fn validate_run_id(run_id: &str) -> Result<()> {
    let valid = !run_id.is_empty()
        && run_id.len() <= MAX_RUN_ID_LEN
        && !run_id.starts_with('.')
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        return Ok(());
    }
    Err(PipelineValidationError::new(format!("Invalid run id '{run_id}'"))
        .with_error_info(
            ContractErrorInfo::new("PIPELINE-INVALID-RUN-ID", "run id rejected").with_fix_hint(
                "Use up to 128 ASCII letters, digits, '-', '_' or '.', not starting with '.'.",
            ),
        )
        .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use crate::stages::IdentityTransform;
    use crate::pipeline::BackoffPolicy;
    use crate::testing::{ConcatTransform, CountingTransform, FailingTransform, StaticTransform};
    use pretty_assertions::assert_eq;
    use std::time::{Duration, Instant};

    fn engine() -> (PipelineEngine, Arc<CollectingEventSink>) {
        let events = Arc::new(CollectingEventSink::new());
        let engine = PipelineEngine::builder(Arc::new(InMemoryArtifactStore::new()))
            .event_sink(events.clone())
            .build();
        (engine, events)
    }

    fn linear() -> RunSpec {
        RunSpec::new()
            .with_name("linear")
            .stage(StageSpec::new("ingest", "raw", Arc::new(IdentityTransform)).with_input("seed"))
            .stage(StageSpec::new("train", "model", Arc::new(ConcatTransform)).with_input("raw"))
    }

    #[tokio::test]
    async fn test_run_succeeds_and_records_outputs() {
        let (engine, events) = engine();
        engine.seed("seed", b"data".to_vec()).unwrap();

        let run = engine.run(linear()).await.unwrap();

        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(run.attempt, 1);
        assert_eq!(run.final_output().unwrap().key, "model");
        assert_eq!(engine.store().get("model", None).unwrap().content, b"data");
        assert_eq!(
            events.event_types(),
            vec![
                kinds::RUN_SUBMITTED,
                kinds::RUN_STARTED,
                kinds::STAGE_STARTED,
                kinds::STAGE_SUCCEEDED,
                kinds::STAGE_STARTED,
                kinds::STAGE_SUCCEEDED,
                kinds::RUN_SUCCEEDED,
            ]
        );
    }

    #[tokio::test]
    async fn test_invalid_spec_is_rejected_before_execution() {
        let (engine, events) = engine();
        let err = engine.submit(linear()).await.unwrap_err();

        assert!(matches!(err, OpsflowError::InvalidPipeline(ref e) if e.code() == Some("PIPELINE-UNKNOWN-INPUT")));
        assert!(events.is_empty());
        assert!(engine.list_runs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stored_key_does_not_hide_misordered_producer() {
        let (engine, _) = engine();
        engine.seed("seed", b"x".to_vec()).unwrap();
        engine.seed("raw", b"left over from an earlier run".to_vec()).unwrap();
        let spec = RunSpec::new()
            .stage(StageSpec::new("preprocess", "clean", Arc::new(IdentityTransform)).with_input("raw"))
            .stage(StageSpec::new("ingest", "raw", Arc::new(IdentityTransform)).with_input("seed"));

        let err = engine.submit(spec).await.unwrap_err();

        assert!(matches!(err, OpsflowError::InvalidPipeline(ref e) if e.message.contains("later stage 'ingest'")));
        assert!(engine.list_runs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_during_backoff_starts_no_new_attempt() {
        let events = Arc::new(CollectingEventSink::new());
        let engine = PipelineEngine::builder(Arc::new(InMemoryArtifactStore::new()))
            .event_sink(events)
            .executor_config(ExecutorConfig {
                backoff: BackoffPolicy::new()
                    .with_base_delay_ms(300)
                    .with_max_delay_ms(300),
            })
            .build();
        let failing = Arc::new(CountingTransform::new(FailingTransform::new("gpu lost")));
        let spec = RunSpec::new()
            .stage(StageSpec::new("train", "model", failing.clone()).with_retry_budget(3));

        let run_id = engine.submit(spec).await.unwrap();
        while failing.calls() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let cancelled_at = Instant::now();
        engine.cancel(&run_id).await.unwrap();
        let run = engine.wait(&run_id).await.unwrap();

        assert!(cancelled_at.elapsed() < Duration::from_millis(250));
        assert_eq!(failing.calls(), 1);
        assert_eq!(run.status, RunStatus::Cancelled);
        assert_eq!(
            run.stage_statuses(),
            vec![("train".to_string(), StageStatus::Cancelled)]
        );
    }

    #[tokio::test]
    async fn test_invalid_run_id_rejected() {
        let (engine, _) = engine();
        engine.seed("seed", b"x".to_vec()).unwrap();
        for bad in ["", "../escape", ".hidden", "a/b"] {
            assert!(matches!(
                engine.submit_with_id(bad, linear()).await,
                Err(OpsflowError::InvalidPipeline(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_failure_leaves_later_stages_pending() {
        let (engine, _) = engine();
        engine.seed("seed", b"x".to_vec()).unwrap();
        let spec = RunSpec::new()
            .stage(StageSpec::new("ingest", "raw", Arc::new(IdentityTransform)).with_input("seed"))
            .stage(
                StageSpec::new("train", "model", Arc::new(FailingTransform::new("oom")))
                    .with_input("raw")
                    .with_retry_budget(2),
            )
            .stage(StageSpec::new("package", "bundle", Arc::new(IdentityTransform)).with_input("model"));

        let run = engine.run(spec).await.unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        let failure = run.failure.clone().unwrap();
        assert_eq!((failure.stage.as_str(), failure.attempts), ("train", 2));
        assert!(failure.error.contains("oom"));
        assert_eq!(
            run.stage_statuses(),
            vec![
                ("ingest".to_string(), StageStatus::Succeeded),
                ("train".to_string(), StageStatus::Failed),
                ("package".to_string(), StageStatus::Pending),
            ]
        );
    }

    #[tokio::test]
    async fn test_status_and_cancel_unknown_run() {
        let (engine, _) = engine();
        assert!(matches!(engine.status("nope").await, Err(OpsflowError::NotFound(_))));
        assert!(matches!(engine.cancel("nope").await, Err(OpsflowError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_cancel_finished_run_is_noop() {
        let (engine, events) = engine();
        let spec = RunSpec::new().stage(StageSpec::new(
            "emit",
            "out",
            Arc::new(StaticTransform::new(b"x".to_vec())),
        ));
        let run = engine.run(spec).await.unwrap();
        let before = events.len();

        let after = engine.cancel(&run.run_id).await.unwrap();

        assert_eq!(after.status, RunStatus::Succeeded);
        assert_eq!(events.len(), before);
    }

    #[tokio::test]
    async fn test_resubmission_increments_attempt() {
        let (engine, _) = engine();
        engine.seed("seed", b"x".to_vec()).unwrap();

        engine.submit_with_id("nightly", linear()).await.unwrap();
        engine.wait("nightly").await.unwrap();
        engine.submit_with_id("nightly", linear()).await.unwrap();
        let second = engine.wait("nightly").await.unwrap();

        assert_eq!(second.attempt, 2);
        assert_eq!(second.status, RunStatus::Succeeded);
        assert_eq!(
            second.stage_statuses(),
            vec![
                ("ingest".to_string(), StageStatus::Skipped),
                ("train".to_string(), StageStatus::Skipped),
            ]
        );
        assert_eq!(engine.list_runs().await.unwrap(), vec!["nightly".to_string()]);
    }

    #[tokio::test]
    async fn test_from_config_uses_state_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = OpsflowConfig {
            state_dir: Some(dir.path().to_path_buf()),
            ..OpsflowConfig::default()
        };
        let engine = EngineBuilder::from_config(&config).unwrap().build();
        engine.seed("seed", b"x".to_vec()).unwrap();

        let run = engine.run(linear()).await.unwrap();

        assert_eq!(run.status, RunStatus::Succeeded);
        assert!(dir.path().join("runs").join(format!("{}.json", run.run_id)).exists());
        assert!(dir.path().join("artifacts").is_dir());
    }
}
