//! Lidar detection filter component
//!
//! Filter node: the component runtime plus an ordered pipeline of filter
//! stages. Each inbound frame's candidate object list is cloned into a
//! working frame, narrowed stage by stage, and republished.
//!
//! Failure policy for this node: the narrowed frame is published only when
//! every executed stage succeeded; otherwise publication is suppressed and
//! the failure is recorded against the component.

use crate::component::{Component, ComponentContext};
use crate::channel::Writer;
use crate::data::Message;
use crate::nodes::Pose;
use crate::pipeline::{Pipeline, Task, TaskConfig};
use crate::plugin::PluginRegistry;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Semantic class of a detected object
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectLabel {
    /// Not classified
    #[default]
    Unknown,
    /// Car, truck, bus
    Vehicle,
    /// Person on foot
    Pedestrian,
    /// Bicycle or motorcycle with rider
    Cyclist,
    /// Static vegetation
    Vegetation,
}

/// One detected object candidate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LidarObject {
    /// Detection id, unique within the frame
    pub id: u64,
    /// Box center in world coordinates, meters
    pub center: [f64; 3],
    /// Detection confidence in `[0, 1]`
    pub score: f64,
    /// Semantic class
    pub label: ObjectLabel,
}

/// Data frame threaded through the filter pipeline
///
/// Exclusively owned by one pipeline invocation; built by cloning the shared
/// inbound payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LidarFrame {
    /// Capture timestamp, seconds
    pub timestamp: f64,
    /// Candidate objects, narrowed in place by the filter stages
    pub objects: Vec<LidarObject>,
}

/// Payload of the filter component's input and output channels
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LidarFramePayload {
    /// The detection frame
    pub frame: LidarFrame,
    /// Lidar pose at capture time
    pub pose: Pose,
}

/// Registry key of [`ScoreThresholdFilter`]
pub const SCORE_THRESHOLD_FILTER: &str = "ScoreThresholdFilter";
/// Registry key of [`RoiBoundaryFilter`]
pub const ROI_BOUNDARY_FILTER: &str = "RoiBoundaryFilter";
/// Registry key of [`LabelFilter`]
pub const LABEL_FILTER: &str = "LabelFilter";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct ScoreThresholdParams {
    threshold: f64,
}

/// Drops objects scored below a configured threshold
#[derive(Debug, Default)]
pub struct ScoreThresholdFilter {
    name: String,
    params: ScoreThresholdParams,
}

impl Task<LidarFrame> for ScoreThresholdFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self, config: &TaskConfig) -> Result<()> {
        let params: ScoreThresholdParams = config.parse_params()?;
        if !(0.0..=1.0).contains(&params.threshold) {
            return Err(Error::Config(format!(
                "task '{}': threshold {} outside [0, 1]",
                config.effective_name(),
                params.threshold
            )));
        }
        self.name = config.effective_name().to_string();
        self.params = params;
        Ok(())
    }

    fn process(&mut self, frame: &mut LidarFrame) -> Result<()> {
        if frame.objects.iter().any(|o| !o.score.is_finite()) {
            return Err(Error::Process(format!(
                "{}: non-finite detection score",
                self.name
            )));
        }
        let before = frame.objects.len();
        frame.objects.retain(|o| o.score >= self.params.threshold);
        tracing::debug!(
            stage = %self.name,
            dropped = before - frame.objects.len(),
            kept = frame.objects.len(),
            "score filter applied"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct RoiBoundaryParams {
    min_x: f64,
    max_x: f64,
    min_y: f64,
    max_y: f64,
}

/// Drops objects whose center lies outside an axis-aligned region of
/// interest
#[derive(Debug, Default)]
pub struct RoiBoundaryFilter {
    name: String,
    params: RoiBoundaryParams,
}

impl Task<LidarFrame> for RoiBoundaryFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self, config: &TaskConfig) -> Result<()> {
        let params: RoiBoundaryParams = config.parse_params()?;
        if params.min_x >= params.max_x || params.min_y >= params.max_y {
            return Err(Error::Config(format!(
                "task '{}': degenerate region of interest",
                config.effective_name()
            )));
        }
        self.name = config.effective_name().to_string();
        self.params = params;
        Ok(())
    }

    fn process(&mut self, frame: &mut LidarFrame) -> Result<()> {
        let p = self.params;
        frame.objects.retain(|o| {
            o.center[0] >= p.min_x
                && o.center[0] <= p.max_x
                && o.center[1] >= p.min_y
                && o.center[1] <= p.max_y
        });
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LabelParams {
    #[serde(default)]
    drop_labels: Vec<ObjectLabel>,
}

/// Drops objects carrying a blacklisted semantic class
#[derive(Debug, Default)]
pub struct LabelFilter {
    name: String,
    params: LabelParams,
}

impl Task<LidarFrame> for LabelFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self, config: &TaskConfig) -> Result<()> {
        self.params = config.parse_params_or_default()?;
        self.name = config.effective_name().to_string();
        Ok(())
    }

    fn process(&mut self, frame: &mut LidarFrame) -> Result<()> {
        frame
            .objects
            .retain(|o| !self.params.drop_labels.contains(&o.label));
        Ok(())
    }
}

/// Register the built-in filter stages
///
/// Called once during single-threaded bootstrap, before the registry is
/// shared.
pub fn register_builtin_filters(registry: &mut PluginRegistry<dyn Task<LidarFrame>>) -> Result<()> {
    registry.register(SCORE_THRESHOLD_FILTER, || {
        Box::new(ScoreThresholdFilter::default()) as Box<dyn Task<LidarFrame>>
    })?;
    registry.register(ROI_BOUNDARY_FILTER, || {
        Box::new(RoiBoundaryFilter::default()) as Box<dyn Task<LidarFrame>>
    })?;
    registry.register(LABEL_FILTER, || {
        Box::new(LabelFilter::default()) as Box<dyn Task<LidarFrame>>
    })?;
    Ok(())
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct LidarFilterParams {
    #[serde(default = "default_true")]
    use_filter_bank: bool,
}

impl Default for LidarFilterParams {
    fn default() -> Self {
        Self {
            use_filter_bank: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Filter component: runtime + ordered filter pipeline
pub struct LidarFilterComponent {
    name: String,
    registry: Arc<PluginRegistry<dyn Task<LidarFrame>>>,
    pipeline: Option<Pipeline<LidarFrame>>,
    writer: Option<Writer<LidarFramePayload>>,
}

impl LidarFilterComponent {
    /// Create an uninitialized component resolving stages from `registry`
    pub fn new(registry: Arc<PluginRegistry<dyn Task<LidarFrame>>>) -> Self {
        Self {
            name: String::new(),
            registry,
            pipeline: None,
            writer: None,
        }
    }
}

impl Component for LidarFilterComponent {
    type Input = LidarFramePayload;

    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self, ctx: &ComponentContext) -> Result<()> {
        self.name = ctx.config.name.clone();

        let params: LidarFilterParams = if ctx.config.params.is_null() {
            LidarFilterParams::default()
        } else {
            serde_json::from_value(ctx.config.params.clone()).map_err(|e| {
                Error::Config(format!("component '{}': invalid params: {}", self.name, e))
            })?
        };

        if params.use_filter_bank {
            let pipeline =
                Pipeline::from_config(self.name.clone(), &ctx.config.pipeline, &self.registry)?;
            tracing::info!(
                component = %self.name,
                stages = ?pipeline.stage_names(),
                "filter bank ready"
            );
            self.pipeline = Some(pipeline);
        } else {
            tracing::info!(component = %self.name, "filter bank disabled, passing frames through");
        }

        self.writer = Some(ctx.bus.writer(&ctx.config.output_channel)?);
        Ok(())
    }

    fn process(&mut self, message: Arc<Message<LidarFramePayload>>) -> Result<()> {
        // The inbound payload is shared with every other subscriber; clone
        // before mutating.
        let mut frame = message.payload.frame.clone();

        if let Some(pipeline) = self.pipeline.as_mut() {
            let run = pipeline.process(&mut frame);
            if !run.all_succeeded() {
                return Err(Error::Process(format!(
                    "{}: {} filter stage(s) failed: {:?}",
                    self.name,
                    run.failed_stages.len(),
                    run.failed_stages
                )));
            }
        }

        let writer = self
            .writer
            .as_ref()
            .ok_or_else(|| Error::Process(format!("{}: writer not bound", self.name)))?;
        writer.write_message(
            Message::new(LidarFramePayload {
                frame,
                pose: message.payload.pose,
            })
            .with_timestamp(message.timestamp),
        );
        Ok(())
    }
}
