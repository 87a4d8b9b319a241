//! Ordered multi-stage task pipelines
//!
//! A [`Pipeline`] is an ordered sequence of [`Task`] stages operating on one
//! shared data frame per invocation. Order is fixed by configuration and
//! never rearranged at runtime; stages are not assumed commutative. A
//! failing stage is logged and the pipeline continues with the remaining
//! enabled stages - one filter's failure must not prevent the others from
//! running. The caller consults the returned [`PipelineRun`] to decide
//! whether the frame is publishable.

use crate::plugin::PluginRegistry;
use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// One enableable pipeline stage
///
/// `F` is the frame type threaded through the pipeline by exclusive
/// reference; its lifetime is exactly one message's processing.
pub trait Task<F>: Send {
    /// Stage name (set from configuration at init)
    fn name(&self) -> &str;

    /// Validate configuration and prepare the stage
    ///
    /// Missing or malformed parameters fail with
    /// [`Error::Config`](crate::Error::Config), which is fatal to the
    /// pipeline being built.
    fn init(&mut self, config: &TaskConfig) -> Result<()>;

    /// Transform the frame in place
    ///
    /// An `Err` marks this stage failed for this invocation only.
    fn process(&mut self, frame: &mut F) -> Result<()>;
}

/// Configuration entry for one pipeline stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Instance name; defaults to `task_type` when omitted
    #[serde(default)]
    pub task_name: String,

    /// Plugin key the stage is resolved by
    pub task_type: String,

    /// Disabled stages never observe or mutate the frame
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Stage-specific settings
    #[serde(default)]
    pub params: serde_json::Value,
}

fn default_true() -> bool {
    true
}

impl TaskConfig {
    /// Create a config for `task_type` with null params
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            task_name: String::new(),
            task_type: task_type.into(),
            enabled: true,
            params: serde_json::Value::Null,
        }
    }

    /// Set the instance name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.task_name = name.into();
        self
    }

    /// Enable or disable the stage
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the stage parameters
    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    /// Effective stage name
    pub fn effective_name(&self) -> &str {
        if self.task_name.is_empty() {
            &self.task_type
        } else {
            &self.task_name
        }
    }

    /// Deserialize `params` into a settings struct; params are required
    pub fn parse_params<T: DeserializeOwned>(&self) -> Result<T> {
        if self.params.is_null() {
            return Err(Error::Config(format!(
                "task '{}' requires params",
                self.effective_name()
            )));
        }
        serde_json::from_value(self.params.clone()).map_err(|e| {
            Error::Config(format!(
                "task '{}': invalid params: {}",
                self.effective_name(),
                e
            ))
        })
    }

    /// Deserialize `params`, falling back to `T::default()` on null/empty
    pub fn parse_params_or_default<T: DeserializeOwned + Default>(&self) -> Result<T> {
        let empty = match &self.params {
            serde_json::Value::Null => true,
            serde_json::Value::Object(map) => map.is_empty(),
            _ => false,
        };
        if empty {
            return Ok(T::default());
        }
        serde_json::from_value(self.params.clone()).map_err(|e| {
            Error::Config(format!(
                "task '{}': invalid params: {}",
                self.effective_name(),
                e
            ))
        })
    }
}

struct StageSlot<F> {
    name: String,
    enabled: bool,
    task: Box<dyn Task<F>>,
}

/// Report of one pipeline invocation
#[derive(Debug, Clone, Default)]
pub struct PipelineRun {
    /// Number of stages that actually ran (disabled stages excluded)
    pub executed: usize,
    /// Names of stages that ran and failed, in execution order
    pub failed_stages: Vec<String>,
}

impl PipelineRun {
    /// Logical AND of all executed stages' results
    pub fn all_succeeded(&self) -> bool {
        self.failed_stages.is_empty()
    }
}

/// Ordered composition of tasks sharing one data frame per invocation
pub struct Pipeline<F> {
    name: String,
    stages: Vec<StageSlot<F>>,
}

impl<F> std::fmt::Debug for Pipeline<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field(
                "stages",
                &self.stages.iter().map(|s| &s.name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl<F> Pipeline<F> {
    /// Build a pipeline from ordered stage configs, resolving each stage
    /// from `registry` and running its `init`
    ///
    /// Disabled stages are still resolved and validated - a bad config is a
    /// bootstrap failure regardless of the enable flag - but they are never
    /// invoked at execution time. Any resolution or init failure aborts the
    /// build.
    pub fn from_config(
        name: impl Into<String>,
        configs: &[TaskConfig],
        registry: &PluginRegistry<dyn Task<F>>,
    ) -> Result<Self> {
        let name = name.into();
        let mut stages = Vec::with_capacity(configs.len());
        for config in configs {
            let mut task = registry.resolve(&config.task_type)?;
            task.init(config)?;
            tracing::debug!(
                pipeline = %name,
                stage = %config.effective_name(),
                enabled = config.enabled,
                "pipeline stage ready"
            );
            stages.push(StageSlot {
                name: config.effective_name().to_string(),
                enabled: config.enabled,
                task,
            });
        }
        Ok(Self { name, stages })
    }

    /// Pipeline name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stage names in configured order, including disabled stages
    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name.clone()).collect()
    }

    /// Total number of configured stages
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether no stages are configured
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run the enabled stages over `frame` in configured order
    ///
    /// A failing stage is logged and recorded; the remaining stages still
    /// run, so the frame may carry partial results.
    pub fn process(&mut self, frame: &mut F) -> PipelineRun {
        let mut run = PipelineRun::default();
        for slot in &mut self.stages {
            if !slot.enabled {
                continue;
            }
            run.executed += 1;
            if let Err(e) = slot.task.process(frame) {
                tracing::warn!(
                    pipeline = %self.name,
                    stage = %slot.name,
                    "pipeline stage failed: {}",
                    e
                );
                run.failed_stages.push(slot.name.clone());
            }
        }
        run
    }
}
