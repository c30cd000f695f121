//! Test fixtures for pipeline testing.

use std::sync::Arc;

use crate::config::ExecutorConfig;
use crate::events::CollectingEventSink;
use crate::monitor::MonitorSink;
use crate::pipeline::{BackoffPolicy, InMemoryRunStateStore, PipelineEngine, RunSpec, StageSpec};
use crate::stages::{IdentityTransform, Transform};
use crate::store::InMemoryArtifactStore;

use super::mocks::{CollectingNotifier, ConcatTransform};

/// Key of the seeded input read by [`ml_pipeline`].
pub const SOURCE_KEY: &str = "source";

/// An engine wired to in-memory collaborators the test can inspect.
#[derive(Debug)]
pub struct TestEngine {
    /// The engine.
    pub engine: PipelineEngine,
    /// Shared artifact store.
    pub store: Arc<InMemoryArtifactStore>,
    /// Monitor receiving per-attempt metrics.
    pub monitor: Arc<MonitorSink>,
    /// Notifier behind the monitor.
    pub notifier: Arc<CollectingNotifier>,
    /// Lifecycle events.
    pub events: Arc<CollectingEventSink>,
    /// Run state.
    pub state: Arc<InMemoryRunStateStore>,
}

impl TestEngine {
    /// Creates an engine with no backoff delay between attempts.
    #[must_use]
    pub fn new() -> Self {
        let store = Arc::new(InMemoryArtifactStore::new());
        let notifier = Arc::new(CollectingNotifier::new());
        let monitor = Arc::new(MonitorSink::new(notifier.clone()));
        let events = Arc::new(CollectingEventSink::new());
        let state = Arc::new(InMemoryRunStateStore::new());

        let engine = PipelineEngine::builder(store.clone())
            .recorder(monitor.clone())
            .event_sink(events.clone())
            .state_store(state.clone())
            .executor_config(ExecutorConfig {
                backoff: BackoffPolicy::immediate(),
            })
            .build();

        Self {
            engine,
            store,
            monitor,
            notifier,
            events,
            state,
        }
    }

    /// Creates an engine with [`SOURCE_KEY`] seeded.
    #[must_use]
    pub fn seeded(content: &[u8]) -> Self {
        let fixture = Self::new();
        fixture.seed(SOURCE_KEY, content);
        fixture
    }

    /// Writes a seed artifact, panicking on failure.
    pub fn seed(&self, key: &str, content: &[u8]) {
        if let Err(e) = self.engine.seed(key, content.to_vec()) {
            panic!("failed to seed '{key}': {e}");
        }
    }
}

impl Default for TestEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// A three-stage pipeline: `ingest` (source -> raw), `preprocess`
/// (raw -> clean) and `train` (clean -> model) with the given transform.
#[must_use]
pub fn ml_pipeline(train: Arc<dyn Transform>, train_budget: u32) -> RunSpec {
    RunSpec::new()
        .with_name("ml")
        .stage(StageSpec::new("ingest", "raw", Arc::new(IdentityTransform)).with_input(SOURCE_KEY))
        .stage(StageSpec::new("preprocess", "clean", Arc::new(ConcatTransform)).with_input("raw"))
        .stage(
            StageSpec::new("train", "model", train)
                .with_input("clean")
                .with_retry_budget(train_budget),
        )
}
