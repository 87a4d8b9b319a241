//! Declarative component-type registry
//!
//! Binds a component-type name to a builder closure at process bootstrap, so
//! whole deployments are instantiated purely from a manifest. Registration
//! is an explicit call sequence executed before any build - there is no
//! load-time self-registration.

use crate::channel::ChannelBus;
use crate::component::ComponentRuntime;
use crate::manifest::{ComponentConfig, Manifest};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

type ComponentBuilder =
    Box<dyn Fn(ComponentConfig, Arc<ChannelBus>) -> Result<ComponentRuntime> + Send + Sync>;

/// Component-type name -> builder table
pub struct ComponentRegistry {
    builders: HashMap<String, ComponentBuilder>,
}

impl ComponentRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    /// Register a builder for `component_type`
    ///
    /// The builder typically captures the plugin registries its component
    /// resolves algorithms from, then calls
    /// [`ComponentRuntime::launch`](crate::component::ComponentRuntime::launch).
    pub fn register<F>(&mut self, component_type: impl Into<String>, builder: F) -> Result<()>
    where
        F: Fn(ComponentConfig, Arc<ChannelBus>) -> Result<ComponentRuntime> + Send + Sync + 'static,
    {
        let component_type = component_type.into();
        if self.builders.contains_key(&component_type) {
            return Err(Error::Config(format!(
                "component type '{}' is already registered",
                component_type
            )));
        }
        tracing::debug!(component_type = %component_type, "component type registered");
        self.builders.insert(component_type, Box::new(builder));
        Ok(())
    }

    /// Instantiate and launch one component from its config
    ///
    /// An unknown `component_type` is a bootstrap error; an init failure
    /// inside the component is not - it surfaces as a `Failed` runtime.
    pub fn build(&self, config: ComponentConfig, bus: Arc<ChannelBus>) -> Result<ComponentRuntime> {
        let builder = self
            .builders
            .get(&config.component_type)
            .ok_or_else(|| {
                Error::Config(format!(
                    "unknown component type '{}'. Registered types: {:?}",
                    config.component_type,
                    self.types()
                ))
            })?;
        builder(config, bus)
    }

    /// Launch every component a manifest declares, in declaration order
    ///
    /// Components whose init fails come back `Failed` but do not abort the
    /// rest of the deployment.
    pub fn launch_all(&self, manifest: &Manifest, bus: Arc<ChannelBus>) -> Result<Vec<ComponentRuntime>> {
        let mut runtimes = Vec::with_capacity(manifest.components.len());
        for config in &manifest.components {
            let runtime = self.build(config.clone(), bus.clone())?;
            tracing::info!(
                component = %runtime.name(),
                state = %runtime.state().as_str(),
                "component launched"
            );
            runtimes.push(runtime);
        }
        Ok(runtimes)
    }

    /// All registered component-type names, sorted
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.builders.keys().cloned().collect();
        types.sort();
        types
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
