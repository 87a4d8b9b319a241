//! Traffic light detection component
//!
//! Detection node: the component runtime plus one algorithm plugin resolved
//! by name at init. Each inbound message's candidate lights are copied into
//! an algorithm working frame, classified by the detector backend, and
//! repackaged (with the pass-through pose, stoplines and capture timestamp)
//! onto the output channel.
//!
//! Failure policy for this node: on detector failure the out-envelope error
//! code is set to `ProcessError` and publication is suppressed - downstream
//! subscribers observe zero messages for that input, not an error
//! placeholder.

use crate::component::{Component, ComponentContext};
use crate::channel::Writer;
use crate::data::{ErrorCode, Message};
use crate::nodes::Pose;
use crate::plugin::{PluginOptions, PluginRegistry};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Traffic light color classification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LightColor {
    /// Not classified, or evidence too weak
    #[default]
    Unknown,
    /// Red light
    Red,
    /// Yellow light
    Yellow,
    /// Green light
    Green,
    /// Light off / occluded
    Black,
}

/// Per-color detection evidence produced upstream
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ColorScores {
    /// Red evidence
    pub red: f64,
    /// Yellow evidence
    pub yellow: f64,
    /// Green evidence
    pub green: f64,
    /// Off/occluded evidence
    pub black: f64,
}

impl ColorScores {
    fn sum(&self) -> f64 {
        self.red + self.yellow + self.green + self.black
    }

    fn best(&self) -> (LightColor, f64) {
        let candidates = [
            (LightColor::Red, self.red),
            (LightColor::Yellow, self.yellow),
            (LightColor::Green, self.green),
            (LightColor::Black, self.black),
        ];
        let mut best = (LightColor::Unknown, f64::MIN);
        for (color, score) in candidates {
            if score > best.1 {
                best = (color, score);
            }
        }
        best
    }

    fn is_valid(&self) -> bool {
        [self.red, self.yellow, self.green, self.black]
            .iter()
            .all(|s| s.is_finite() && *s >= 0.0)
    }
}

/// One candidate traffic light
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrafficLight {
    /// Stable light id from the map
    pub id: String,
    /// Projection region in image coordinates, `[x, y, width, height]`
    pub region: [f64; 4],
    /// Classified color (filled by the detector)
    pub color: LightColor,
    /// Classification confidence in `[0, 1]` (filled by the detector)
    pub confidence: f64,
    /// Raw per-color evidence from the upstream preprocessor
    pub scores: ColorScores,
}

/// Algorithm working frame for one detection invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrafficLightFrame {
    /// Capture timestamp, seconds
    pub timestamp: f64,
    /// Candidate lights, classified in place by the detector
    pub lights: Vec<TrafficLight>,
}

/// Stopline geometry passed through unchanged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StopLine {
    /// Polyline in world coordinates
    pub points: Vec<[f64; 2]>,
}

/// Payload of the detection component's input and output channels
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrafficDetectPayload {
    /// Candidate (input) or classified (output) lights
    pub frame: TrafficLightFrame,
    /// Vehicle pose at capture time
    pub car_pose: Pose,
    /// Stoplines relevant to the lights
    pub stoplines: Vec<StopLine>,
}

/// Capability set of a traffic light detector backend
pub trait TrafficLightDetector: Send {
    /// Backend name
    fn name(&self) -> &str;

    /// Bind device and backend configuration
    fn init(&mut self, options: &PluginOptions) -> Result<()>;

    /// Classify every light in the frame in place
    fn detect(&mut self, frame: &mut TrafficLightFrame) -> Result<()>;
}

/// Registry key of [`HighestScoreDetector`]
pub const HIGHEST_SCORE_DETECTOR: &str = "HighestScoreDetector";
/// Registry key of [`ConservativeDetector`]
pub const CONSERVATIVE_DETECTOR: &str = "ConservativeDetector";

/// Picks the color with the highest evidence score
#[derive(Debug, Default)]
pub struct HighestScoreDetector;

impl TrafficLightDetector for HighestScoreDetector {
    fn name(&self) -> &str {
        HIGHEST_SCORE_DETECTOR
    }

    fn init(&mut self, options: &PluginOptions) -> Result<()> {
        if options.gpu_id < -1 {
            return Err(Error::Config(format!(
                "{}: invalid gpu_id {}",
                self.name(),
                options.gpu_id
            )));
        }
        tracing::debug!(detector = %self.name(), gpu_id = options.gpu_id, "detector initialized");
        Ok(())
    }

    fn detect(&mut self, frame: &mut TrafficLightFrame) -> Result<()> {
        for light in frame.lights.iter_mut() {
            if !light.scores.is_valid() {
                return Err(Error::Process(format!(
                    "{}: malformed evidence for light '{}'",
                    self.name(),
                    light.id
                )));
            }
            let total = light.scores.sum();
            if total <= 0.0 {
                light.color = LightColor::Unknown;
                light.confidence = 0.0;
                continue;
            }
            let (color, score) = light.scores.best();
            light.color = color;
            light.confidence = score / total;
        }
        Ok(())
    }
}

/// Like [`HighestScoreDetector`], but reports `Unknown` below a confidence
/// floor instead of guessing
#[derive(Debug)]
pub struct ConservativeDetector {
    min_confidence: f64,
}

impl Default for ConservativeDetector {
    fn default() -> Self {
        Self {
            min_confidence: 0.6,
        }
    }
}

impl ConservativeDetector {
    /// Override the confidence floor
    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }
}

impl TrafficLightDetector for ConservativeDetector {
    fn name(&self) -> &str {
        CONSERVATIVE_DETECTOR
    }

    fn init(&mut self, options: &PluginOptions) -> Result<()> {
        if options.gpu_id < -1 {
            return Err(Error::Config(format!(
                "{}: invalid gpu_id {}",
                self.name(),
                options.gpu_id
            )));
        }
        tracing::debug!(
            detector = %self.name(),
            min_confidence = self.min_confidence,
            "detector initialized"
        );
        Ok(())
    }

    fn detect(&mut self, frame: &mut TrafficLightFrame) -> Result<()> {
        let mut inner = HighestScoreDetector::default();
        inner.detect(frame)?;
        for light in frame.lights.iter_mut() {
            if light.confidence < self.min_confidence {
                light.color = LightColor::Unknown;
            }
        }
        Ok(())
    }
}

/// Register the built-in detector backends
///
/// Called once during single-threaded bootstrap, before the registry is
/// shared.
pub fn register_builtin_detectors(
    registry: &mut PluginRegistry<dyn TrafficLightDetector>,
) -> Result<()> {
    registry.register(HIGHEST_SCORE_DETECTOR, || {
        Box::new(HighestScoreDetector::default()) as Box<dyn TrafficLightDetector>
    })?;
    registry.register(CONSERVATIVE_DETECTOR, || {
        Box::new(ConservativeDetector::default()) as Box<dyn TrafficLightDetector>
    })?;
    Ok(())
}

/// Detection component: runtime + one detector plugin
pub struct TrafficLightDetectionComponent {
    name: String,
    registry: Arc<PluginRegistry<dyn TrafficLightDetector>>,
    detector: Option<Box<dyn TrafficLightDetector>>,
    writer: Option<Writer<TrafficDetectPayload>>,
}

impl TrafficLightDetectionComponent {
    /// Create an uninitialized component resolving detectors from `registry`
    pub fn new(registry: Arc<PluginRegistry<dyn TrafficLightDetector>>) -> Self {
        Self {
            name: String::new(),
            registry,
            detector: None,
            writer: None,
        }
    }

    /// Run detection and fill `out_message`
    ///
    /// On failure the out-envelope is tagged `ProcessError`; the caller
    /// decides (per this node's policy: suppresses) publication.
    fn internal_process(
        &mut self,
        in_message: &Message<TrafficDetectPayload>,
        out_message: &mut Message<TrafficDetectPayload>,
    ) -> Result<()> {
        if in_message.error_code != ErrorCode::Success {
            out_message.error_code = ErrorCode::ProcessError;
            return Err(Error::Process(format!(
                "{}: upstream message tagged {}",
                self.name,
                in_message.error_code.as_str()
            )));
        }

        let detector = self
            .detector
            .as_mut()
            .ok_or_else(|| Error::Process(format!("{}: detector not initialized", self.name)))?;

        // Working copy for the algorithm; the inbound envelope stays shared
        // and untouched.
        let mut frame = TrafficLightFrame {
            timestamp: in_message.timestamp,
            lights: in_message.payload.frame.lights.clone(),
        };

        if let Err(e) = detector.detect(&mut frame) {
            out_message.error_code = ErrorCode::ProcessError;
            tracing::error!(component = %self.name, "traffic light detection failed: {}", e);
            return Err(e);
        }

        out_message.timestamp = in_message.timestamp;
        out_message.payload = TrafficDetectPayload {
            frame,
            car_pose: in_message.payload.car_pose,
            stoplines: in_message.payload.stoplines.clone(),
        };
        Ok(())
    }
}

impl Component for TrafficLightDetectionComponent {
    type Input = TrafficDetectPayload;

    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self, ctx: &ComponentContext) -> Result<()> {
        self.name = ctx.config.name.clone();

        let plugin = ctx.config.plugin.as_ref().ok_or_else(|| {
            Error::Config(format!("component '{}' requires a plugin block", self.name))
        })?;

        let mut detector = self.registry.resolve(&plugin.name)?;
        detector.init(&plugin.options())?;
        tracing::info!(
            component = %self.name,
            detector = %plugin.name,
            gpu_id = plugin.gpu_id,
            "traffic light detector ready"
        );

        self.writer = Some(ctx.bus.writer(&ctx.config.output_channel)?);
        self.detector = Some(detector);
        Ok(())
    }

    fn process(&mut self, message: Arc<Message<TrafficDetectPayload>>) -> Result<()> {
        tracing::debug!(
            component = %self.name,
            timestamp = message.timestamp,
            lights = message.payload.frame.lights.len(),
            "detection input"
        );

        let mut out_message = Message::new(TrafficDetectPayload::default());
        self.internal_process(message.as_ref(), &mut out_message)?;

        let writer = self
            .writer
            .as_ref()
            .ok_or_else(|| Error::Process(format!("{}: writer not bound", self.name)))?;
        writer.write_message(out_message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn light(id: &str, red: f64, yellow: f64, green: f64) -> TrafficLight {
        TrafficLight {
            id: id.to_string(),
            region: [10.0, 20.0, 32.0, 64.0],
            scores: ColorScores {
                red,
                yellow,
                green,
                black: 0.0,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_highest_score_classification() {
        let mut detector = HighestScoreDetector::default();
        detector.init(&PluginOptions::default()).unwrap();

        let mut frame = TrafficLightFrame {
            timestamp: 1.0,
            lights: vec![light("tl_1", 0.8, 0.1, 0.1), light("tl_2", 0.0, 0.0, 0.9)],
        };
        detector.detect(&mut frame).unwrap();

        assert_eq!(frame.lights[0].color, LightColor::Red);
        assert!((frame.lights[0].confidence - 0.8).abs() < 1e-9);
        assert_eq!(frame.lights[1].color, LightColor::Green);
    }

    #[test]
    fn test_zero_evidence_yields_unknown() {
        let mut detector = HighestScoreDetector::default();
        let mut frame = TrafficLightFrame {
            timestamp: 1.0,
            lights: vec![light("tl_1", 0.0, 0.0, 0.0)],
        };
        detector.detect(&mut frame).unwrap();
        assert_eq!(frame.lights[0].color, LightColor::Unknown);
        assert_eq!(frame.lights[0].confidence, 0.0);
    }

    #[test]
    fn test_malformed_evidence_fails() {
        let mut detector = HighestScoreDetector::default();
        let mut frame = TrafficLightFrame {
            timestamp: 1.0,
            lights: vec![light("tl_1", f64::NAN, 0.0, 0.0)],
        };
        assert!(matches!(
            detector.detect(&mut frame),
            Err(Error::Process(_))
        ));
    }

    #[test]
    fn test_conservative_floor() {
        let mut detector = ConservativeDetector::default().with_min_confidence(0.7);
        detector.init(&PluginOptions::default()).unwrap();

        let mut frame = TrafficLightFrame {
            timestamp: 1.0,
            // 0.5/1.0 confidence: below the floor.
            lights: vec![light("tl_1", 0.5, 0.3, 0.2), light("tl_2", 0.9, 0.05, 0.05)],
        };
        detector.detect(&mut frame).unwrap();

        assert_eq!(frame.lights[0].color, LightColor::Unknown);
        assert_eq!(frame.lights[1].color, LightColor::Red);
    }

    #[test]
    fn test_invalid_gpu_id_fails_init() {
        let mut detector = HighestScoreDetector::default();
        let options = PluginOptions {
            gpu_id: -2,
            ..Default::default()
        };
        assert!(matches!(detector.init(&options), Err(Error::Config(_))));
    }

    #[test]
    fn test_internal_process_tags_error_code() {
        let mut registry = PluginRegistry::new();
        register_builtin_detectors(&mut registry).unwrap();
        let mut component = TrafficLightDetectionComponent::new(Arc::new(registry));
        component.name = "tl_detect".to_string();
        component.detector = Some(Box::new(HighestScoreDetector::default()));

        let in_message =
            Message::new(TrafficDetectPayload::default()).with_error_code(ErrorCode::ProcessError);
        let mut out_message = Message::new(TrafficDetectPayload::default());
        assert!(component
            .internal_process(&in_message, &mut out_message)
            .is_err());
        assert_eq!(out_message.error_code, ErrorCode::ProcessError);
    }

    #[test]
    fn test_internal_process_passes_through_pose() {
        let mut registry = PluginRegistry::new();
        register_builtin_detectors(&mut registry).unwrap();
        let mut component = TrafficLightDetectionComponent::new(Arc::new(registry));
        component.name = "tl_detect".to_string();
        component.detector = Some(Box::new(HighestScoreDetector::default()));

        let pose = Pose {
            position: [1.0, 2.0, 0.0],
            heading: 0.5,
        };
        let in_message = Message::new(TrafficDetectPayload {
            frame: TrafficLightFrame {
                timestamp: 0.0,
                lights: vec![light("tl_1", 0.9, 0.05, 0.05)],
            },
            car_pose: pose,
            stoplines: vec![StopLine {
                points: vec![[0.0, 0.0], [1.0, 0.0]],
            }],
        })
        .with_timestamp(12.5);

        let mut out_message = Message::new(TrafficDetectPayload::default());
        component
            .internal_process(&in_message, &mut out_message)
            .unwrap();

        assert_eq!(out_message.timestamp, 12.5);
        assert_eq!(out_message.payload.car_pose, pose);
        assert_eq!(out_message.payload.stoplines.len(), 1);
        assert_eq!(out_message.payload.frame.lights[0].color, LightColor::Red);
        assert!(out_message.is_success());
    }
}
