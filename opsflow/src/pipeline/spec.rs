//! Stage and run specifications, with static validation.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::{ContractErrorInfo, PipelineValidationError};
use crate::stages::Transform;

/// Default attempt timeout applied when a stage does not set one.
pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(300);

/// Specification for a single pipeline stage.
#[derive(Debug, Clone)]
pub struct StageSpec {
    /// The unique name of the stage.
    pub name: String,
    /// Keys of the artifacts the stage reads, in the order passed to the transform.
    pub inputs: Vec<String>,
    /// Key of the artifact the stage writes.
    pub output: String,
    /// Total number of attempts allowed (at least 1).
    pub retry_budget: u32,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// The computation.
    pub transform: Arc<dyn Transform>,
}

impl StageSpec {
    /// Creates a stage with one attempt and the default timeout.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        output: impl Into<String>,
        transform: Arc<dyn Transform>,
    ) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            output: output.into(),
            retry_budget: 1,
            timeout: DEFAULT_STAGE_TIMEOUT,
            transform,
        }
    }

    /// Sets the input keys.
    #[must_use]
    pub fn with_inputs(mut self, inputs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.inputs = inputs.into_iter().map(Into::into).collect();
        self
    }

    /// Adds an input key.
    #[must_use]
    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.inputs.push(input.into());
        self
    }

    /// Sets the retry budget (total attempts).
    #[must_use]
    pub fn with_retry_budget(mut self, attempts: u32) -> Self {
        self.retry_budget = attempts;
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Validates the stage in isolation.
    ///
    /// # Errors
    ///
    /// Returns an error if the name or output key is blank or the retry
    /// budget is zero.
    pub fn validate(&self) -> Result<(), PipelineValidationError> {
        if self.name.trim().is_empty() {
            return Err(invalid("PIPELINE-BLANK-NAME", "Stage name cannot be empty", &[]));
        }
        if self.output.trim().is_empty() {
            return Err(invalid(
                "PIPELINE-BLANK-OUTPUT",
                format!("Stage '{}' has an empty output key", self.name),
                &[&self.name],
            ));
        }
        if self.retry_budget == 0 {
            return Err(invalid(
                "PIPELINE-ZERO-BUDGET",
                format!("Stage '{}' has a retry budget of 0", self.name),
                &[&self.name],
            )
            .with_error_info(
                ContractErrorInfo::new("PIPELINE-ZERO-BUDGET", "retry budget must be at least 1")
                    .with_fix_hint("A budget of 1 means a single attempt with no retries."),
            ));
        }
        Ok(())
    }
}

/// An ordered sequence of stages forming one pipeline.
#[derive(Debug, Clone, Default)]
pub struct RunSpec {
    /// Optional pipeline name used in logs and events.
    pub name: Option<String>,
    /// Stages in execution order.
    pub stages: Vec<StageSpec>,
}

impl RunSpec {
    /// Creates an empty run specification.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a run specification from stages.
    #[must_use]
    pub fn from_stages(stages: Vec<StageSpec>) -> Self {
        Self { name: None, stages }
    }

    /// Sets the pipeline name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Appends a stage.
    #[must_use]
    pub fn stage(mut self, stage: StageSpec) -> Self {
        self.stages.push(stage);
        self
    }

    /// Returns the stage names in order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name.clone()).collect()
    }

    /// Validates stage ordering against the set of pre-seeded keys.
    ///
    /// Each input key must be written by a strictly earlier stage, or be
    /// seeded and not written by this or any later stage. A stored key never
    /// excuses a misordered producer. Stages run in declared order, so this
    /// ordering check is all the graph validation needed.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure found.
    pub fn validate<F>(&self, is_seeded: F) -> Result<(), PipelineValidationError>
    where
        F: Fn(&str) -> bool,
    {
        if self.stages.is_empty() {
            return Err(invalid("PIPELINE-EMPTY", "Pipeline has no stages", &[])
                .with_error_info(
                    ContractErrorInfo::new("PIPELINE-EMPTY", "no stages")
                        .with_fix_hint("Add at least one stage before submitting."),
                ));
        }

        let mut names = HashSet::new();
        let mut produced: HashSet<&str> = HashSet::new();

        for (idx, stage) in self.stages.iter().enumerate() {
            stage.validate()?;

            if !names.insert(stage.name.as_str()) {
                return Err(invalid(
                    "PIPELINE-DUPLICATE-STAGE",
                    format!("Stage name '{}' is used more than once", stage.name),
                    &[&stage.name],
                ));
            }

            for input in &stage.inputs {
                if produced.contains(input.as_str()) {
                    continue;
                }
                let producer = self.stages[idx..]
                    .iter()
                    .find(|s| s.output == *input)
                    .map(|s| s.name.clone());
                if producer.is_none() && is_seeded(input) {
                    continue;
                }
                let message = match &producer {
                    Some(producer) if *producer == stage.name => format!(
                        "Stage '{}' reads '{}' which is its own output",
                        stage.name, input
                    ),
                    Some(producer) => format!(
                        "Stage '{}' reads '{}' which is only produced by later stage '{}'",
                        stage.name, input, producer
                    ),
                    None => format!(
                        "Stage '{}' reads '{}' which is neither seeded nor produced by an earlier stage",
                        stage.name, input
                    ),
                };
                let later = producer.filter(|p| *p != stage.name);
                let mut stages = vec![stage.name.clone()];
                stages.extend(later);
                return Err(PipelineValidationError::new(message)
                    .with_stages(stages)
                    .with_error_info(
                        ContractErrorInfo::new(
                            "PIPELINE-UNKNOWN-INPUT",
                            format!("Input '{input}' unavailable"),
                        )
                        .with_context_entry("stage", stage.name.clone())
                        .with_context_entry("input", input.clone())
                        .with_fix_hint(
                            "Seed the artifact before submitting or move its producer earlier.",
                        ),
                    ));
            }

            if !produced.insert(stage.output.as_str()) {
                let first = self
                    .stages
                    .iter()
                    .find(|s| s.output == stage.output)
                    .map_or_else(String::new, |s| s.name.clone());
                return Err(invalid(
                    "PIPELINE-DUPLICATE-OUTPUT",
                    format!(
                        "Stages '{}' and '{}' both write '{}'",
                        first, stage.name, stage.output
                    ),
                    &[&first, &stage.name],
                ));
            }
        }

        Ok(())
    }
}

fn invalid(code: &str, message: impl Into<String>, stages: &[&String]) -> PipelineValidationError {
    let message = message.into();
    PipelineValidationError::new(message.clone())
        .with_stages(stages.iter().map(|s| (*s).to_string()).collect())
        .with_error_info(ContractErrorInfo::new(code, message))
}
