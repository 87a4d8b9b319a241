//! End-to-end tests of the onboard execution framework: launched components,
//! live channels, registries bootstrapped the way the launcher does it.

use percept_runtime_core::channel::ChannelBus;
use percept_runtime_core::component::{ComponentRuntime, Lifecycle};
use percept_runtime_core::data::{ErrorCode, Message};
use percept_runtime_core::manifest::{ComponentConfig, PluginParam};
use percept_runtime_core::nodes::lidar_filter::{
    register_builtin_filters, LidarFilterComponent, LidarFrame, LidarFramePayload, LidarObject,
    ObjectLabel, LABEL_FILTER, SCORE_THRESHOLD_FILTER,
};
use percept_runtime_core::nodes::traffic_light::{
    register_builtin_detectors, ColorScores, LightColor, TrafficDetectPayload,
    TrafficLightDetectionComponent, TrafficLightFrame, TrafficLight, TrafficLightDetector,
    HIGHEST_SCORE_DETECTOR,
};
use percept_runtime_core::nodes::Pose;
use percept_runtime_core::pipeline::{Pipeline, Task, TaskConfig};
use percept_runtime_core::plugin::PluginRegistry;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn detector_registry() -> Arc<PluginRegistry<dyn TrafficLightDetector>> {
    let mut registry = PluginRegistry::new();
    register_builtin_detectors(&mut registry).unwrap();
    Arc::new(registry)
}

fn filter_registry() -> Arc<PluginRegistry<dyn Task<LidarFrame>>> {
    let mut registry = PluginRegistry::new();
    register_builtin_filters(&mut registry).unwrap();
    Arc::new(registry)
}

fn lidar_object(id: u64, score: f64) -> LidarObject {
    LidarObject {
        id,
        center: [1.0, 1.0, 0.0],
        score,
        label: ObjectLabel::Vehicle,
    }
}

fn lidar_payload(scores: &[f64]) -> LidarFramePayload {
    LidarFramePayload {
        frame: LidarFrame {
            timestamp: 1.0,
            objects: scores
                .iter()
                .enumerate()
                .map(|(i, s)| lidar_object(i as u64 + 1, *s))
                .collect(),
        },
        pose: Pose::default(),
    }
}

fn candidate_light(id: &str, red: f64, yellow: f64, green: f64) -> TrafficLight {
    TrafficLight {
        id: id.to_string(),
        region: [100.0, 50.0, 32.0, 64.0],
        color: LightColor::Unknown,
        confidence: 0.0,
        scores: ColorScores {
            red,
            yellow,
            green,
            black: 0.0,
        },
    }
}

async fn recv_one<T: Send + Sync + 'static>(
    reader: &mut percept_runtime_core::channel::Reader<T>,
) -> Arc<Message<T>> {
    tokio::time::timeout(Duration::from_secs(2), reader.recv())
        .await
        .expect("timed out waiting for message")
        .expect("channel closed")
}

/// Scenario 1: enabled FilterA narrows by score, disabled FilterB never
/// runs - through a fully launched filter component.
#[tokio::test]
async fn filter_component_applies_enabled_stages_only() {
    let bus = Arc::new(ChannelBus::new());
    let mut out = bus
        .subscribe::<LidarFramePayload>("/perception/lidar/filtered", "probe")
        .unwrap();

    let config = ComponentConfig {
        name: "lidar_detection_filter".to_string(),
        component_type: "LidarFilterComponent".to_string(),
        input_channels: vec!["/perception/lidar/detection".to_string()],
        output_channel: "/perception/lidar/filtered".to_string(),
        pipeline: vec![
            TaskConfig::new(SCORE_THRESHOLD_FILTER)
                .with_name("FilterA")
                .with_params(json!({"threshold": 0.5})),
            // Would drop every vehicle if it ever ran.
            TaskConfig::new(LABEL_FILTER)
                .with_name("FilterB")
                .with_params(json!({"drop_labels": ["vehicle"]}))
                .with_enabled(false),
        ],
        ..Default::default()
    };

    let runtime = ComponentRuntime::launch(
        LidarFilterComponent::new(filter_registry()),
        bus.clone(),
        config,
    );
    assert_eq!(runtime.state(), Lifecycle::Ready);

    let writer = bus
        .writer::<LidarFramePayload>("/perception/lidar/detection")
        .unwrap();
    writer.write(lidar_payload(&[0.2, 0.6, 0.9]));

    let msg = recv_one(&mut out).await;
    let scores: Vec<f64> = msg.payload.frame.objects.iter().map(|o| o.score).collect();
    assert_eq!(scores, vec![0.6, 0.9]);
    // FilterB's logic never applied: the vehicles survived.
    assert!(msg
        .payload
        .frame
        .objects
        .iter()
        .all(|o| o.label == ObjectLabel::Vehicle));
    assert!(msg.is_success());

    runtime.join().await.unwrap();
}

/// Scenario 2: an unknown plugin key fails Init; the component stays
/// non-Ready and is never scheduled.
#[tokio::test]
async fn unknown_plugin_key_leaves_component_failed() {
    let bus = Arc::new(ChannelBus::new());

    let config = ComponentConfig {
        name: "traffic_light_detection".to_string(),
        component_type: "TrafficLightDetectionComponent".to_string(),
        input_channels: vec!["/perception/camera/traffic_light_crop".to_string()],
        output_channel: "/perception/traffic_light/detection".to_string(),
        plugin: Some(PluginParam {
            name: "Unknown".to_string(),
            ..Default::default()
        }),
        ..Default::default()
    };

    let runtime = ComponentRuntime::launch(
        TrafficLightDetectionComponent::new(detector_registry()),
        bus.clone(),
        config,
    );
    assert_eq!(runtime.state(), Lifecycle::Failed);
    assert!(!runtime.state().is_ready());

    // The failed component never subscribed, so nothing is scheduled.
    let writer = bus
        .writer::<TrafficDetectPayload>("/perception/camera/traffic_light_crop")
        .unwrap();
    let delivery = writer.write(TrafficDetectPayload::default());
    assert_eq!(delivery.delivered, 0);
    assert_eq!(runtime.stats().processed(), 0);
    assert_eq!(runtime.stats().failures(), 0);
}

/// Scenario 3: the detection algorithm fails -> proc fails and the output
/// channel receives zero messages for that input.
#[tokio::test]
async fn detection_failure_publishes_nothing() {
    let bus = Arc::new(ChannelBus::new());
    let mut out = bus
        .subscribe::<TrafficDetectPayload>("/perception/traffic_light/detection", "probe")
        .unwrap();

    let config = ComponentConfig {
        name: "traffic_light_detection".to_string(),
        component_type: "TrafficLightDetectionComponent".to_string(),
        input_channels: vec!["/perception/camera/traffic_light_crop".to_string()],
        output_channel: "/perception/traffic_light/detection".to_string(),
        plugin: Some(PluginParam {
            name: HIGHEST_SCORE_DETECTOR.to_string(),
            ..Default::default()
        }),
        ..Default::default()
    };

    let runtime = ComponentRuntime::launch(
        TrafficLightDetectionComponent::new(detector_registry()),
        bus.clone(),
        config,
    );
    assert_eq!(runtime.state(), Lifecycle::Ready);

    let writer = bus
        .writer::<TrafficDetectPayload>("/perception/camera/traffic_light_crop")
        .unwrap();

    // Upstream marked the frame failed; detection must not republish it.
    writer.write_message(
        Message::new(TrafficDetectPayload::default()).with_error_code(ErrorCode::ProcessError),
    );

    // A well-formed frame afterwards still flows, proving the component
    // survived and the first input produced exactly zero output messages.
    writer.write(TrafficDetectPayload {
        frame: TrafficLightFrame {
            timestamp: 2.0,
            lights: vec![candidate_light("tl_1", 0.9, 0.05, 0.05)],
        },
        car_pose: Pose::default(),
        stoplines: vec![],
    });

    let msg = recv_one(&mut out).await;
    assert_eq!(msg.payload.frame.lights[0].color, LightColor::Red);
    assert!(msg.is_success());
    assert!(out.try_recv().is_none());

    assert_eq!(runtime.stats().failures(), 1);
    assert_eq!(runtime.stats().processed(), 1);

    runtime.join().await.unwrap();
}

/// Scenario 4: two concurrent producers, one subscriber: exactly two bursts
/// arrive, nothing duplicated or lost, per-producer order preserved.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_producers_preserve_per_producer_order() {
    #[derive(Debug, Clone)]
    struct Tick {
        producer: u8,
        n: u64,
    }

    const BURST: u64 = 200;

    let bus = Arc::new(ChannelBus::new());
    let mut reader = bus.subscribe::<Tick>("/test/concurrent", "probe").unwrap();

    let mut producers = Vec::new();
    for producer in [1u8, 2u8] {
        let writer = bus.writer::<Tick>("/test/concurrent").unwrap();
        producers.push(tokio::spawn(async move {
            for n in 1..=BURST {
                writer.write(Tick { producer, n });
            }
        }));
    }
    for handle in producers {
        handle.await.unwrap();
    }

    let mut last_seen = [0u64; 3];
    let mut total = 0u64;
    while let Some(msg) = reader.try_recv() {
        total += 1;
        let p = msg.payload.producer as usize;
        assert_eq!(
            msg.payload.n,
            last_seen[p] + 1,
            "producer {} out of order",
            p
        );
        last_seen[p] = msg.payload.n;
    }
    assert_eq!(total, 2 * BURST);
    assert_eq!(last_seen[1], BURST);
    assert_eq!(last_seen[2], BURST);
}

/// Same ordered config on identical input yields identical output.
#[tokio::test]
async fn pipeline_is_deterministic() {
    let registry = filter_registry();
    let configs = vec![
        TaskConfig::new(SCORE_THRESHOLD_FILTER).with_params(json!({"threshold": 0.4})),
        TaskConfig::new(LABEL_FILTER).with_params(json!({"drop_labels": ["vegetation"]})),
    ];

    let mut first = LidarFrame {
        timestamp: 1.0,
        objects: vec![
            lidar_object(1, 0.3),
            lidar_object(2, 0.5),
            lidar_object(3, 0.8),
        ],
    };
    let mut second = first.clone();

    Pipeline::from_config("run_a", &configs, &registry)
        .unwrap()
        .process(&mut first);
    Pipeline::from_config("run_b", &configs, &registry)
        .unwrap()
        .process(&mut second);

    assert_eq!(first, second);
}

/// Resolving the same key repeatedly yields the same concrete behavior.
#[test]
fn plugin_resolution_is_injective() {
    let registry = detector_registry();
    let a = registry.resolve(HIGHEST_SCORE_DETECTOR).unwrap();
    let b = registry.resolve(HIGHEST_SCORE_DETECTOR).unwrap();
    assert_eq!(a.name(), b.name());
    assert_eq!(a.name(), HIGHEST_SCORE_DETECTOR);
}

/// Messages on channel X reach every subscriber of X, unmodified, and no
/// subscriber of channel Y.
#[tokio::test]
async fn channel_isolation_and_payload_integrity() {
    let bus = Arc::new(ChannelBus::new());
    let mut x1 = bus.subscribe::<LidarFramePayload>("/test/x", "x1").unwrap();
    let mut x2 = bus.subscribe::<LidarFramePayload>("/test/x", "x2").unwrap();
    let mut y = bus.subscribe::<LidarFramePayload>("/test/y", "y").unwrap();

    let payload = lidar_payload(&[0.1, 0.9]);
    let writer = bus.writer::<LidarFramePayload>("/test/x").unwrap();
    let delivery = writer.write(payload.clone());
    assert_eq!(delivery.delivered, 2);

    let m1 = recv_one(&mut x1).await;
    let m2 = recv_one(&mut x2).await;
    assert_eq!(m1.payload, payload);
    assert_eq!(m2.payload, payload);
    // Both subscribers share the same immutable envelope.
    assert!(Arc::ptr_eq(&m1, &m2));
    assert!(y.try_recv().is_none());
}

/// A published detection output is never `Success` with garbage: every
/// published light is classified.
#[tokio::test]
async fn no_success_tagged_garbage() {
    let bus = Arc::new(ChannelBus::new());
    let mut out = bus
        .subscribe::<TrafficDetectPayload>("/perception/traffic_light/detection", "probe")
        .unwrap();

    let config = ComponentConfig {
        name: "traffic_light_detection".to_string(),
        component_type: "TrafficLightDetectionComponent".to_string(),
        input_channels: vec!["/perception/camera/traffic_light_crop".to_string()],
        output_channel: "/perception/traffic_light/detection".to_string(),
        plugin: Some(PluginParam {
            name: HIGHEST_SCORE_DETECTOR.to_string(),
            ..Default::default()
        }),
        ..Default::default()
    };
    let runtime = ComponentRuntime::launch(
        TrafficLightDetectionComponent::new(detector_registry()),
        bus.clone(),
        config,
    );

    let writer = bus
        .writer::<TrafficDetectPayload>("/perception/camera/traffic_light_crop")
        .unwrap();
    writer.write(TrafficDetectPayload {
        frame: TrafficLightFrame {
            timestamp: 3.0,
            lights: vec![
                candidate_light("tl_1", 0.1, 0.1, 0.8),
                candidate_light("tl_2", 0.7, 0.2, 0.1),
            ],
        },
        car_pose: Pose {
            position: [3.0, 4.0, 0.0],
            heading: 1.0,
        },
        stoplines: vec![],
    });

    let msg = recv_one(&mut out).await;
    assert!(msg.is_success());
    assert_eq!(msg.payload.frame.lights[0].color, LightColor::Green);
    assert_eq!(msg.payload.frame.lights[1].color, LightColor::Red);
    // Pose passed through untouched.
    assert_eq!(msg.payload.car_pose.position, [3.0, 4.0, 0.0]);

    runtime.join().await.unwrap();
}

/// Distinct components fail independently: one component's per-message
/// failures never disturb a sibling sharing the bus.
#[tokio::test]
async fn failing_component_does_not_affect_siblings() {
    let bus = Arc::new(ChannelBus::new());
    let mut filtered = bus
        .subscribe::<LidarFramePayload>("/perception/lidar/filtered", "probe")
        .unwrap();

    let failing_config = ComponentConfig {
        name: "failing_filter".to_string(),
        component_type: "LidarFilterComponent".to_string(),
        input_channels: vec!["/perception/lidar/raw".to_string()],
        output_channel: "/perception/lidar/failing_out".to_string(),
        pipeline: vec![TaskConfig::new(SCORE_THRESHOLD_FILTER)
            .with_params(json!({"threshold": 0.5}))],
        ..Default::default()
    };
    let healthy_config = ComponentConfig {
        name: "healthy_filter".to_string(),
        component_type: "LidarFilterComponent".to_string(),
        input_channels: vec!["/perception/lidar/detection".to_string()],
        output_channel: "/perception/lidar/filtered".to_string(),
        pipeline: vec![TaskConfig::new(SCORE_THRESHOLD_FILTER)
            .with_params(json!({"threshold": 0.5}))],
        ..Default::default()
    };

    let failing = ComponentRuntime::launch(
        LidarFilterComponent::new(filter_registry()),
        bus.clone(),
        failing_config,
    );
    let healthy = ComponentRuntime::launch(
        LidarFilterComponent::new(filter_registry()),
        bus.clone(),
        healthy_config,
    );

    // Non-finite score makes the failing component's stage error out.
    bus.writer::<LidarFramePayload>("/perception/lidar/raw")
        .unwrap()
        .write(lidar_payload(&[f64::NAN]));
    bus.writer::<LidarFramePayload>("/perception/lidar/detection")
        .unwrap()
        .write(lidar_payload(&[0.7]));

    let msg = recv_one(&mut filtered).await;
    assert_eq!(msg.payload.frame.objects.len(), 1);

    assert_eq!(healthy.stats().failures(), 0);
    assert_eq!(failing.stats().processed(), 0);

    failing.join().await.unwrap();
    healthy.join().await.unwrap();
}
