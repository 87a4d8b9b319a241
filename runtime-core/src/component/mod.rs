//! Component lifecycle runtime
//!
//! A [`Component`] is one processing unit bound to input channels and an
//! output channel. [`ComponentRuntime::launch`] runs its `init` and, on
//! success, spawns a single tokio task that drains the merged input streams
//! and calls `process` once per inbound message - so `process` invocations
//! for one component instance are strictly serialized, while distinct
//! components run in parallel with no ordering between them.
//!
//! Lifecycle: `Created -> Ready | Failed`. Init failure is terminal for the
//! component (logged once, never scheduled) and does not affect any other
//! component sharing the bus. A `process` failure is recorded per message
//! and publishes nothing; whether a node instead forwards an error-tagged
//! envelope is that node's documented policy, not a runtime guarantee.

pub mod registry;

use crate::channel::{ChannelBus, Reader};
use crate::data::Message;
use crate::manifest::ComponentConfig;
use crate::Result;
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Component lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Constructed but not yet initialized
    Created,
    /// Init succeeded; the component is scheduled on its input channels
    Ready,
    /// Init failed; terminal - the component is never scheduled
    Failed,
}

impl Lifecycle {
    /// Convert to string for logging/display
    pub fn as_str(&self) -> &'static str {
        match self {
            Lifecycle::Created => "created",
            Lifecycle::Ready => "ready",
            Lifecycle::Failed => "failed",
        }
    }

    /// Whether the component reached `Ready`
    pub fn is_ready(&self) -> bool {
        matches!(self, Lifecycle::Ready)
    }
}

/// Everything a component sees at init time
pub struct ComponentContext {
    /// The process-wide channel bus
    pub bus: Arc<ChannelBus>,
    /// This component's declarative configuration
    pub config: ComponentConfig,
}

/// One message-triggered processing unit
///
/// `init` resolves configuration, binds the output writer and resolves any
/// plugin/pipeline dependency; any sub-failure is fatal and leaves the
/// component `Failed`. `process` runs to completion synchronously and
/// publishes its result (if any) through the writer bound at init.
pub trait Component: Send {
    /// Payload type of the input channel(s)
    type Input: Send + Sync + 'static;

    /// Component instance name (available after init)
    fn name(&self) -> &str;

    /// Resolve configuration and dependencies
    fn init(&mut self, ctx: &ComponentContext) -> Result<()>;

    /// Handle one inbound message
    fn process(&mut self, message: Arc<Message<Self::Input>>) -> Result<()>;
}

/// Lock-free per-component execution counters
#[derive(Debug, Default)]
pub struct ComponentStats {
    processed: AtomicU64,
    failures: AtomicU64,
}

impl ComponentStats {
    /// Messages handled successfully
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Messages whose processing failed
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    fn record_success(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }
}

/// Handle to a launched component
///
/// Owns the component's task: dropping the runtime (or calling
/// [`shutdown`](Self::shutdown)) stops the component and unsubscribes it
/// from its input channels.
#[derive(Debug)]
pub struct ComponentRuntime {
    name: String,
    state: Lifecycle,
    stats: Arc<ComponentStats>,
    handle: Option<JoinHandle<()>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl ComponentRuntime {
    /// Initialize `component` and, on success, schedule it on its input
    /// channels
    ///
    /// Never panics and never fails the caller: an init failure is logged
    /// once and captured as a `Failed` runtime, halting only this component.
    pub fn launch<C>(mut component: C, bus: Arc<ChannelBus>, config: ComponentConfig) -> Self
    where
        C: Component + 'static,
    {
        let name = config.name.clone();
        let stats = Arc::new(ComponentStats::default());

        let ctx = ComponentContext {
            bus: bus.clone(),
            config,
        };
        if let Err(e) = component.init(&ctx) {
            tracing::error!(component = %name, "component init failed: {}", e);
            return Self {
                name,
                state: Lifecycle::Failed,
                stats,
                handle: None,
                shutdown: None,
            };
        }

        let mut readers: Vec<Reader<C::Input>> = Vec::new();
        for channel in &ctx.config.input_channels {
            match ctx.bus.subscribe::<C::Input>(channel, &name) {
                Ok(reader) => readers.push(reader),
                Err(e) => {
                    tracing::error!(component = %name, channel = %channel, "input binding failed: {}", e);
                    return Self {
                        name,
                        state: Lifecycle::Failed,
                        stats,
                        handle: None,
                        shutdown: None,
                    };
                }
            }
        }

        tracing::info!(
            component = %name,
            inputs = ?ctx.config.input_channels,
            output = %ctx.config.output_channel,
            "component ready"
        );

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(run_loop(
            component,
            readers,
            stats.clone(),
            shutdown_rx,
            name.clone(),
        ));

        Self {
            name,
            state: Lifecycle::Ready,
            stats,
            handle: Some(handle),
            shutdown: Some(shutdown_tx),
        }
    }

    /// Component instance name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state
    pub fn state(&self) -> Lifecycle {
        self.state
    }

    /// Execution counters
    pub fn stats(&self) -> &ComponentStats {
        &self.stats
    }

    /// Ask the component task to stop
    ///
    /// Queued messages that were not yet processed are dropped.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }

    /// Stop the component and wait for its task to finish
    pub async fn join(mut self) -> Result<()> {
        self.shutdown();
        if let Some(handle) = self.handle.take() {
            handle
                .await
                .map_err(|e| crate::Error::Other(format!("component task join failed: {}", e)))?;
        }
        Ok(())
    }
}

/// Per-component message loop: one task per component, one message at a time.
async fn run_loop<C>(
    mut component: C,
    readers: Vec<Reader<C::Input>>,
    stats: Arc<ComponentStats>,
    mut shutdown_rx: oneshot::Receiver<()>,
    name: String,
) where
    C: Component,
{
    let mut inputs = stream::select_all(readers.into_iter().map(Reader::into_stream));
    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                tracing::debug!(component = %name, "component stopping");
                break;
            }
            maybe = inputs.next() => {
                match maybe {
                    Some(message) => match component.process(message) {
                        Ok(()) => stats.record_success(),
                        Err(e) => {
                            stats.record_failure();
                            tracing::warn!(component = %name, "processing failed: {}", e);
                        }
                    },
                    None => {
                        tracing::debug!(component = %name, "all input channels closed");
                        break;
                    }
                }
            }
        }
    }
}
