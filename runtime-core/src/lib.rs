//! Percept Runtime Core - message-triggered component execution engine
//!
//! This crate is the onboard execution framework every perception node is
//! built on: sensor frames flow through named channels into processing
//! components, which run detection or filtering logic and republish derived
//! results for downstream consumers (planning, visualization).
//!
//! # Architecture
//!
//! - [`channel`] - name-keyed, typed publish/subscribe bus decoupling
//!   producers from consumers
//! - [`plugin`] - frozen-after-bootstrap registry mapping string keys to
//!   algorithm factories, enabling algorithm swapping from configuration
//! - [`pipeline`] - ordered, individually enableable task stages mutating a
//!   shared per-invocation data frame
//! - [`component`] - lifecycle runtime binding one processing unit to its
//!   input/output channels, one tokio task per component
//! - [`nodes`] - the concrete onboard compositions (traffic-light detection,
//!   lidar detection filtering)
//! - [`manifest`] - YAML pipeline configuration so the whole graph is
//!   instantiated without source changes
//!
//! # Example
//!
//! ```ignore
//! use percept_runtime_core::channel::ChannelBus;
//! use percept_runtime_core::component::ComponentRuntime;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> percept_runtime_core::Result<()> {
//!     percept_runtime_core::init()?;
//!
//!     let bus = Arc::new(ChannelBus::new());
//!     let runtime = ComponentRuntime::launch(my_component, bus.clone(), config);
//!     assert!(runtime.state().is_ready());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod component;
pub mod data;
pub mod manifest;
pub mod nodes;
pub mod pipeline;
pub mod plugin;

mod error;
pub use error::{Error, Result};

/// Initialize the percept runtime core
///
/// This should be called once at startup to initialize logging.
pub fn init() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init()
        .map_err(|e| Error::Other(format!("Failed to install tracing subscriber: {}", e)))?;

    tracing::info!("Percept runtime core initialized");
    Ok(())
}
