//! Name-keyed algorithm plugin registry
//!
//! Maps a string key to a factory producing a boxed algorithm instance, so
//! algorithm selection is data-driven: a component names its backend in
//! configuration and resolves it at Init, no recompilation involved.
//!
//! Registration happens during single-threaded process bootstrap through
//! explicit calls (`register`) - there is no load-time self-registration.
//! Freezing is structural: `register` needs `&mut self`, so wrapping the
//! registry in an `Arc` afterwards leaves only lock-free reads.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Options record handed to a resolved plugin's `init`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginOptions {
    /// GPU device the plugin should bind, -1 for CPU-only
    #[serde(default)]
    pub gpu_id: i32,
    /// Directory the plugin's own configuration lives in
    #[serde(default)]
    pub config_path: String,
    /// Configuration file name within `config_path`
    #[serde(default)]
    pub config_file: String,
}

type PluginFactory<P> = Box<dyn Fn() -> Box<P> + Send + Sync>;

/// Registry of algorithm factories for one capability set `P`
///
/// `P` is the (unsized) trait object type of the capability set, e.g.
/// `PluginRegistry<dyn TrafficLightDetector>`. One key maps to one concrete
/// implementation type for the registry's lifetime, so resolution is
/// injective.
pub struct PluginRegistry<P: ?Sized> {
    factories: HashMap<String, PluginFactory<P>>,
}

impl<P: ?Sized> PluginRegistry<P> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a factory under `key`
    ///
    /// Bootstrap-only; a duplicate key is a configuration error.
    pub fn register<F>(&mut self, key: impl Into<String>, factory: F) -> Result<()>
    where
        F: Fn() -> Box<P> + Send + Sync + 'static,
    {
        let key = key.into();
        if self.factories.contains_key(&key) {
            return Err(Error::Config(format!(
                "plugin '{}' is already registered",
                key
            )));
        }
        tracing::debug!(plugin = %key, "plugin registered");
        self.factories.insert(key, Box::new(factory));
        Ok(())
    }

    /// Create a new instance of the plugin registered under `key`
    pub fn resolve(&self, key: &str) -> Result<Box<P>> {
        let factory = self.factories.get(key).ok_or_else(|| Error::PluginNotFound {
            key: key.to_string(),
            available: self.keys(),
        })?;
        Ok(factory())
    }

    /// Whether `key` is registered
    pub fn contains(&self, key: &str) -> bool {
        self.factories.contains_key(key)
    }

    /// All registered keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.factories.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of registered plugins
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl<P: ?Sized> Default for PluginRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}
