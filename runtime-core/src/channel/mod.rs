//! Name-keyed typed publish/subscribe channel bus
//!
//! Producers and consumers are decoupled by logical channel identity: a
//! producer obtains a [`Writer`] for a channel name, subscribers obtain a
//! [`Reader`], and neither knows about the other. A channel name resolves to
//! exactly one payload type for the lifetime of the process; binding the same
//! name with a different type fails with
//! [`Error::ChannelTypeMismatch`](crate::Error::ChannelTypeMismatch).
//!
//! Delivery contract:
//! - at-most-once per subscriber, no redelivery on subscriber failure
//! - FIFO per producer per channel; ordering across producers or across
//!   channels is unspecified
//! - a closed subscriber is pruned and reported in the [`Delivery`] summary
//!   without blocking delivery to the remaining subscribers
//!
//! Messages are fanned out as `Arc<Message<T>>`: every subscriber sees the
//! same immutable envelope, and a stage that needs to mutate clones the
//! payload explicitly.

use crate::data::Message;
use crate::{Error, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Summary of one publish operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Subscribers the message was handed to
    pub delivered: usize,
    /// Subscribers found closed (and pruned) during this publish
    pub closed: usize,
}

struct Subscriber<T> {
    name: String,
    tx: mpsc::UnboundedSender<Arc<Message<T>>>,
}

/// Shared per-channel state: the subscriber list, traversed under a read
/// lock on every publish and rewritten only when subscribers come and go.
struct ChannelCore<T> {
    name: String,
    subscribers: RwLock<Vec<Subscriber<T>>>,
}

/// Type-erased channel table entry
struct ChannelSlot {
    type_id: TypeId,
    type_name: &'static str,
    core: Arc<dyn Any + Send + Sync>,
}

/// Name-keyed publish/subscribe bus
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct ChannelBus {
    channels: DashMap<String, ChannelSlot>,
}

impl ChannelBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Resolve (or create) the channel core for `channel`, enforcing the
    /// one-name-one-type invariant.
    fn core_for<T: Send + Sync + 'static>(&self, channel: &str) -> Result<Arc<ChannelCore<T>>> {
        match self.channels.entry(channel.to_string()) {
            Entry::Occupied(occupied) => {
                let slot = occupied.get();
                if slot.type_id != TypeId::of::<T>() {
                    return Err(Error::ChannelTypeMismatch {
                        channel: channel.to_string(),
                        expected: slot.type_name.to_string(),
                        actual: std::any::type_name::<T>().to_string(),
                    });
                }
                slot.core
                    .clone()
                    .downcast::<ChannelCore<T>>()
                    .map_err(|_| Error::ChannelTypeMismatch {
                        channel: channel.to_string(),
                        expected: slot.type_name.to_string(),
                        actual: std::any::type_name::<T>().to_string(),
                    })
            }
            Entry::Vacant(vacant) => {
                let core = Arc::new(ChannelCore::<T> {
                    name: channel.to_string(),
                    subscribers: RwLock::new(Vec::new()),
                });
                vacant.insert(ChannelSlot {
                    type_id: TypeId::of::<T>(),
                    type_name: std::any::type_name::<T>(),
                    core: core.clone(),
                });
                tracing::debug!(channel = %channel, payload = %std::any::type_name::<T>(), "channel created");
                Ok(core)
            }
        }
    }

    /// Obtain a writer for `channel`
    ///
    /// Multiple writers per channel are allowed (one per producer); each
    /// carries its own sequence counter.
    pub fn writer<T: Send + Sync + 'static>(&self, channel: &str) -> Result<Writer<T>> {
        let core = self.core_for::<T>(channel)?;
        Ok(Writer {
            core,
            sequence: AtomicU64::new(0),
            last_publish_bits: AtomicU64::new(f64::NAN.to_bits()),
        })
    }

    /// Subscribe `subscriber` to `channel`
    ///
    /// The returned [`Reader`] receives every message published after this
    /// call. Dropping the reader unsubscribes (the writer prunes it on its
    /// next publish).
    pub fn subscribe<T: Send + Sync + 'static>(
        &self,
        channel: &str,
        subscriber: &str,
    ) -> Result<Reader<T>> {
        let core = self.core_for::<T>(channel)?;
        let (tx, rx) = mpsc::unbounded_channel();
        core.subscribers.write().push(Subscriber {
            name: subscriber.to_string(),
            tx,
        });
        tracing::debug!(channel = %channel, subscriber = %subscriber, "subscribed");
        Ok(Reader {
            channel: channel.to_string(),
            subscriber: subscriber.to_string(),
            rx,
        })
    }

    /// Names of all channels created so far, sorted
    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl Default for ChannelBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Publishing half of a channel binding
///
/// A writer may be used from multiple threads; subscriber-list traversal is
/// serialized internally. Sequence numbers are per-writer, starting at 1.
pub struct Writer<T> {
    core: Arc<ChannelCore<T>>,
    sequence: AtomicU64,
    /// Bit pattern of the last published timestamp. Written by `publish`,
    /// read by `last_publish_timestamp`; NaN means "never published".
    last_publish_bits: AtomicU64,
}

impl<T: Send + Sync + 'static> Writer<T> {
    /// Channel this writer publishes to
    pub fn channel(&self) -> &str {
        &self.core.name
    }

    /// Publish a payload, stamping the current monotonic time and the next
    /// sequence number. Returns once delivery to all in-process subscribers
    /// has been initiated.
    pub fn write(&self, payload: T) -> Delivery {
        self.write_message(Message::new(payload))
    }

    /// Publish a pre-built envelope, stamping only the sequence number
    ///
    /// Used by nodes that pass through an upstream capture timestamp or
    /// forward an error-tagged envelope.
    pub fn write_message(&self, mut message: Message<T>) -> Delivery {
        message.sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        self.publish(Arc::new(message))
    }

    fn publish(&self, message: Arc<Message<T>>) -> Delivery {
        self.last_publish_bits
            .store(message.timestamp.to_bits(), Ordering::Release);

        let mut delivery = Delivery::default();
        {
            let subscribers = self.core.subscribers.read();
            for sub in subscribers.iter() {
                if sub.tx.send(message.clone()).is_err() {
                    tracing::warn!(
                        channel = %self.core.name,
                        subscriber = %sub.name,
                        "subscriber queue closed, pruning"
                    );
                    delivery.closed += 1;
                } else {
                    delivery.delivered += 1;
                }
            }
        }
        if delivery.closed > 0 {
            self.core.subscribers.write().retain(|s| !s.tx.is_closed());
        }
        delivery
    }

    /// Timestamp of the most recent publish, if any
    pub fn last_publish_timestamp(&self) -> Option<f64> {
        let ts = f64::from_bits(self.last_publish_bits.load(Ordering::Acquire));
        if ts.is_nan() {
            None
        } else {
            Some(ts)
        }
    }

    /// Sequence number of the most recent publish (0 before the first)
    pub fn last_sequence(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}

impl<T> std::fmt::Debug for Writer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Writer")
            .field("channel", &self.core.name)
            .finish()
    }
}

/// Subscribing half of a channel binding
///
/// Messages queue unboundedly until received; dropping the reader
/// unsubscribes.
pub struct Reader<T> {
    channel: String,
    subscriber: String,
    rx: mpsc::UnboundedReceiver<Arc<Message<T>>>,
}

impl<T> Reader<T> {
    /// Channel this reader is subscribed to
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Subscriber name given at subscription time
    pub fn subscriber(&self) -> &str {
        &self.subscriber
    }

    /// Receive the next message, waiting if none is queued
    ///
    /// Returns `None` once the channel is torn down.
    pub async fn recv(&mut self) -> Option<Arc<Message<T>>> {
        self.rx.recv().await
    }

    /// Receive without waiting
    pub fn try_recv(&mut self) -> Option<Arc<Message<T>>> {
        self.rx.try_recv().ok()
    }

    /// Convert into a stream, for merging multiple inputs
    pub fn into_stream(self) -> UnboundedReceiverStream<Arc<Message<T>>> {
        UnboundedReceiverStream::new(self.rx)
    }
}

impl<T> std::fmt::Debug for Reader<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader")
            .field("channel", &self.channel)
            .field("subscriber", &self.subscriber)
            .finish()
    }
}
