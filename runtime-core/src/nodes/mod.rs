//! Concrete onboard node compositions
//!
//! Two node families exercise the framework end to end:
//!
//! - [`traffic_light`] - a detection component: runtime + a single
//!   algorithm plugin resolved by name from a
//!   [`PluginRegistry`](crate::plugin::PluginRegistry)
//! - [`lidar_filter`] - a filter component: runtime + an ordered
//!   [`Pipeline`](crate::pipeline::Pipeline) of filter stages narrowing a
//!   candidate object list

pub mod lidar_filter;
pub mod traffic_light;

use serde::{Deserialize, Serialize};

/// Vehicle pose passed through detection messages unchanged
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// World position, meters
    pub position: [f64; 3],
    /// Heading, radians
    pub heading: f64,
}
