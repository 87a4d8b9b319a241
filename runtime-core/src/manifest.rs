//! Pipeline manifest parsing and validation
//!
//! The manifest declares the whole processing graph - which components
//! exist, which channels they read and write, which algorithm plugin or
//! filter pipeline each one runs - so a deployment is assembled purely from
//! configuration, without source changes.

use crate::pipeline::TaskConfig;
use crate::plugin::PluginOptions;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Onboard pipeline manifest (v1)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Schema version
    pub version: String,

    /// Deployment metadata
    #[serde(default)]
    pub metadata: ManifestMetadata,

    /// Components to instantiate, in declaration order
    pub components: Vec<ComponentConfig>,
}

/// Deployment metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Deployment name
    #[serde(default)]
    pub name: String,

    /// Optional description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Declarative binding of one component to its channels and algorithms
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComponentConfig {
    /// Unique component instance name
    pub name: String,

    /// Component type registered in the
    /// [`ComponentRegistry`](crate::component::registry::ComponentRegistry)
    pub component_type: String,

    /// Channels the component is triggered by
    #[serde(default)]
    pub input_channels: Vec<String>,

    /// Channel results are republished on
    #[serde(default)]
    pub output_channel: String,

    /// Algorithm plugin binding, for single-plugin components
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<PluginParam>,

    /// Ordered filter stages, for pipeline components
    #[serde(default)]
    pub pipeline: Vec<TaskConfig>,

    /// Component-specific settings
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Plugin lookup key plus the options record passed to its `init`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginParam {
    /// Registry key of the algorithm implementation
    pub name: String,

    /// GPU device id, -1 for CPU-only
    #[serde(default)]
    pub gpu_id: i32,

    /// Directory the plugin's own configuration lives in
    #[serde(default)]
    pub config_path: String,

    /// Configuration file name within `config_path`
    #[serde(default)]
    pub config_file: String,
}

impl PluginParam {
    /// The options record for the resolved plugin's `init`
    pub fn options(&self) -> PluginOptions {
        PluginOptions {
            gpu_id: self.gpu_id,
            config_path: self.config_path.clone(),
            config_file: self.config_file.clone(),
        }
    }
}

/// Parse a YAML manifest string
pub fn parse_yaml(yaml: &str) -> Result<Manifest> {
    serde_yaml::from_str(yaml).map_err(|e| Error::Manifest(format!("Failed to parse manifest: {}", e)))
}

/// Read and parse a YAML manifest file
pub fn parse_file(path: impl AsRef<Path>) -> Result<Manifest> {
    let text = std::fs::read_to_string(path.as_ref())?;
    parse_yaml(&text)
}

/// Validate a manifest for correctness
pub fn validate(manifest: &Manifest) -> Result<()> {
    if manifest.version != "v1" {
        return Err(Error::Manifest(format!(
            "Unsupported manifest version: {}",
            manifest.version
        )));
    }

    if manifest.components.is_empty() {
        return Err(Error::Manifest(
            "Manifest must contain at least one component".to_string(),
        ));
    }

    let mut seen = std::collections::HashSet::new();
    for component in &manifest.components {
        if !seen.insert(&component.name) {
            return Err(Error::Manifest(format!(
                "Duplicate component name: {}",
                component.name
            )));
        }
        if component.input_channels.is_empty() {
            return Err(Error::Manifest(format!(
                "Component '{}' has no input channels",
                component.name
            )));
        }
        if component.output_channel.is_empty() {
            return Err(Error::Manifest(format!(
                "Component '{}' has no output channel",
                component.name
            )));
        }
    }

    Ok(())
}
