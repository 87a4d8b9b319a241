//! Onboard Perception Launcher
//!
//! Boots a manifest-declared component graph: plugin registries and the
//! component table are populated during single-threaded bootstrap, every
//! component is launched onto the channel bus, and the process runs until
//! Ctrl-C.
//!
//! Usage: `onboard [manifest.yaml] [--demo]`
//!
//! Without a path the embedded default deployment is used. `--demo` feeds a
//! few synthetic frames through the default channels and exits.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use percept_runtime_core::channel::ChannelBus;
use percept_runtime_core::component::registry::ComponentRegistry;
use percept_runtime_core::component::ComponentRuntime;
use percept_runtime_core::manifest;
use percept_runtime_core::nodes::lidar_filter::{
    register_builtin_filters, LidarFilterComponent, LidarFrame, LidarFramePayload, LidarObject,
    ObjectLabel,
};
use percept_runtime_core::nodes::traffic_light::{
    register_builtin_detectors, ColorScores, TrafficDetectPayload, TrafficLight,
    TrafficLightDetectionComponent, TrafficLightFrame,
};
use percept_runtime_core::nodes::Pose;
use percept_runtime_core::plugin::PluginRegistry;

const DEFAULT_MANIFEST: &str = include_str!("../pipelines/onboard_perception.yaml");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut manifest_path: Option<String> = None;
    let mut demo = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--demo" => demo = true,
            path => manifest_path = Some(path.to_string()),
        }
    }

    // Load configuration
    let manifest = match &manifest_path {
        Some(path) => manifest::parse_file(path)?,
        None => manifest::parse_yaml(DEFAULT_MANIFEST)?,
    };
    manifest::validate(&manifest)?;
    tracing::info!(
        deployment = %manifest.metadata.name,
        components = manifest.components.len(),
        "manifest loaded"
    );

    let bus = Arc::new(ChannelBus::new());

    // Single-threaded bootstrap: plugin registries first, frozen by Arc.
    let mut detectors = PluginRegistry::new();
    register_builtin_detectors(&mut detectors)?;
    let detectors = Arc::new(detectors);

    let mut filters = PluginRegistry::new();
    register_builtin_filters(&mut filters)?;
    let filters = Arc::new(filters);

    // Component table: type name -> constructor, so the manifest alone
    // decides what runs.
    let mut components = ComponentRegistry::new();
    {
        let detectors = detectors.clone();
        components.register("TrafficLightDetectionComponent", move |config, bus| {
            Ok(ComponentRuntime::launch(
                TrafficLightDetectionComponent::new(detectors.clone()),
                bus,
                config,
            ))
        })?;
    }
    {
        let filters = filters.clone();
        components.register("LidarFilterComponent", move |config, bus| {
            Ok(ComponentRuntime::launch(
                LidarFilterComponent::new(filters.clone()),
                bus,
                config,
            ))
        })?;
    }

    let runtimes = components.launch_all(&manifest, bus.clone())?;
    let failed = runtimes.iter().filter(|r| !r.state().is_ready()).count();
    if failed > 0 {
        tracing::warn!(failed, "some components failed init and will not run");
    }

    if demo {
        run_demo(&bus).await?;
    } else {
        tracing::info!("onboard runtime up, Ctrl-C to stop");
        tokio::signal::ctrl_c().await?;
        tracing::info!("shutdown signal received");
    }

    for runtime in runtimes {
        let name = runtime.name().to_string();
        let stats = (runtime.stats().processed(), runtime.stats().failures());
        runtime.join().await?;
        tracing::info!(component = %name, processed = stats.0, failures = stats.1, "component stopped");
    }
    Ok(())
}

/// Feed one synthetic frame through each default channel and report what
/// comes out the other end.
async fn run_demo(bus: &Arc<ChannelBus>) -> Result<()> {
    let mut lights_out =
        bus.subscribe::<TrafficDetectPayload>("/perception/traffic_light/detection", "demo")?;
    let mut lidar_out = bus.subscribe::<LidarFramePayload>("/perception/lidar/filtered", "demo")?;

    let camera = bus.writer::<TrafficDetectPayload>("/perception/camera/traffic_light_crop")?;
    let lidar = bus.writer::<LidarFramePayload>("/perception/lidar/detection")?;

    camera.write(TrafficDetectPayload {
        frame: TrafficLightFrame {
            timestamp: 0.0,
            lights: vec![TrafficLight {
                id: "demo_light".to_string(),
                region: [420.0, 80.0, 32.0, 64.0],
                scores: ColorScores {
                    red: 0.1,
                    yellow: 0.05,
                    green: 0.8,
                    black: 0.05,
                },
                ..Default::default()
            }],
        },
        car_pose: Pose::default(),
        stoplines: vec![],
    });

    lidar.write(LidarFramePayload {
        frame: LidarFrame {
            timestamp: 0.0,
            objects: vec![
                LidarObject {
                    id: 1,
                    center: [12.0, 3.0, 0.5],
                    score: 0.92,
                    label: ObjectLabel::Vehicle,
                },
                LidarObject {
                    id: 2,
                    center: [30.0, -6.0, 0.4],
                    score: 0.31,
                    label: ObjectLabel::Unknown,
                },
            ],
        },
        pose: Pose::default(),
    });

    let lights = tokio::time::timeout(Duration::from_secs(2), lights_out.recv())
        .await
        .map_err(|_| anyhow::anyhow!("no traffic light output within 2s"))?
        .ok_or_else(|| anyhow::anyhow!("traffic light channel closed"))?;
    for light in &lights.payload.frame.lights {
        tracing::info!(
            id = %light.id,
            color = ?light.color,
            confidence = light.confidence,
            "traffic light classified"
        );
    }

    let objects = tokio::time::timeout(Duration::from_secs(2), lidar_out.recv())
        .await
        .map_err(|_| anyhow::anyhow!("no lidar output within 2s"))?
        .ok_or_else(|| anyhow::anyhow!("lidar channel closed"))?;
    tracing::info!(
        kept = objects.payload.frame.objects.len(),
        "lidar objects after filtering"
    );

    Ok(())
}
