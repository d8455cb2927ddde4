//! In-process topics
//!
//! Producers hand messages to a bounded mpsc channel guarded by a byte budget;
//! a dispatcher task fans them out over a broadcast channel to subscribers.
//! Topics carry span ingest batches and annotation events from request
//! handlers to the long-lived consumer pipelines.
//!
//! On shutdown every dispatcher drains its mpsc channel before exiting, so
//! anything accepted by `publish` reaches subscribers that are still running.

mod error;

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

pub use error::TopicError;

use crate::core::constants::{
    DEFAULT_TOPIC_BUFFER_SIZE, DEFAULT_TOPIC_CHANNEL_CAPACITY, ENV_TOPIC_BUFFER_SIZE,
    ENV_TOPIC_CHANNEL_CAPACITY,
};

/// Anything that travels over a topic
pub trait TopicMessage: Clone + Send + Sync + 'static {
    /// Estimate message size in bytes for backpressure
    fn size_bytes(&self) -> usize;
}

/// Topic configuration
#[derive(Clone, Debug)]
pub struct TopicConfig {
    pub buffer_size: usize,
    pub channel_capacity: usize,
}

impl Default for TopicConfig {
    fn default() -> Self {
        let buffer_size = std::env::var(ENV_TOPIC_BUFFER_SIZE)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_TOPIC_BUFFER_SIZE);

        let channel_capacity = std::env::var(ENV_TOPIC_CHANNEL_CAPACITY)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_TOPIC_CHANNEL_CAPACITY);

        Self {
            buffer_size,
            channel_capacity,
        }
    }
}

/// Cheap to clone; every clone shares the topic's byte budget
#[derive(Clone, Debug)]
pub struct Publisher<T: TopicMessage> {
    tx: mpsc::Sender<T>,
    buffer_bytes: Arc<AtomicUsize>,
    max_bytes: usize,
}

impl<T: TopicMessage> Publisher<T> {
    /// Hand `msg` to the dispatcher without waiting
    ///
    /// Fails with `BufferFull` when the byte budget or the channel is
    /// exhausted; the reservation is released again on failure.
    pub fn publish(&self, msg: T) -> Result<(), TopicError> {
        let size = msg.size_bytes();
        self.buffer_bytes
            .fetch_update(Ordering::SeqCst, Ordering::Relaxed, |used| {
                used.checked_add(size).filter(|&next| next <= self.max_bytes)
            })
            .map_err(|_| TopicError::BufferFull)?;

        self.tx.try_send(msg).map_err(|e| {
            self.buffer_bytes.fetch_sub(size, Ordering::SeqCst);
            match e {
                mpsc::error::TrySendError::Full(_) => TopicError::BufferFull,
                mpsc::error::TrySendError::Closed(_) => TopicError::ChannelClosed,
            }
        })
    }

    #[cfg(test)]
    fn buffered_bytes(&self) -> usize {
        self.buffer_bytes.load(Ordering::Relaxed)
    }
}

/// Subscriber handle
pub struct Subscriber<T: TopicMessage> {
    rx: broadcast::Receiver<T>,
}

impl<T: TopicMessage> Subscriber<T> {
    pub async fn recv(&mut self) -> Result<T, TopicError> {
        self.rx.recv().await.map_err(|e| e.into())
    }

    /// Non-blocking receive used while draining on shutdown
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

struct TopicInner<T: TopicMessage> {
    broadcast_tx: broadcast::Sender<T>,
    publisher: Publisher<T>,
}

/// Type-erased topic storage
trait AnyTopic: Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

impl<T: TopicMessage> AnyTopic for TopicInner<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

type TopicMap = HashMap<String, (TypeId, Arc<dyn AnyTopic>)>;

struct DispatcherEntry {
    handle: JoinHandle<()>,
    shutdown_tx: oneshot::Sender<()>,
}

/// Owns every topic and its dispatcher task
///
/// Dropping the service stops the dispatchers, after which publishing fails
/// with `ChannelClosed`.
pub struct TopicService {
    topics: RwLock<TopicMap>,
    dispatchers: RwLock<Vec<DispatcherEntry>>,
    default_config: TopicConfig,
}

impl TopicService {
    pub fn new() -> Self {
        Self::with_config(TopicConfig::default())
    }

    pub fn with_config(config: TopicConfig) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            dispatchers: RwLock::new(Vec::new()),
            default_config: config,
        }
    }

    /// Create a topic or get the existing one with the same message type
    pub fn topic<T: TopicMessage>(&self, name: &str) -> Result<Topic<T>, TopicError> {
        let type_id = TypeId::of::<T>();
        let mut topics = self.topics.write();

        if let Some((existing_type, topic)) = topics.get(name) {
            let inner = (*existing_type == type_id)
                .then(|| topic.as_any().downcast_ref::<TopicInner<T>>())
                .flatten()
                .ok_or_else(|| TopicError::TypeMismatch(name.to_string()))?;
            return Ok(Topic {
                name: name.to_string(),
                publisher: inner.publisher.clone(),
                broadcast_tx: inner.broadcast_tx.clone(),
            });
        }

        let config = &self.default_config;
        let (mpsc_tx, mpsc_rx) = mpsc::channel(config.channel_capacity);
        let (broadcast_tx, _) = broadcast::channel(config.channel_capacity);
        let buffer_bytes = Arc::new(AtomicUsize::new(0));

        let publisher = Publisher {
            tx: mpsc_tx,
            buffer_bytes: buffer_bytes.clone(),
            max_bytes: config.buffer_size,
        };

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle =
            Self::start_dispatcher(mpsc_rx, broadcast_tx.clone(), buffer_bytes, shutdown_rx);
        self.dispatchers.write().push(DispatcherEntry {
            handle,
            shutdown_tx,
        });

        topics.insert(
            name.to_string(),
            (
                type_id,
                Arc::new(TopicInner {
                    broadcast_tx: broadcast_tx.clone(),
                    publisher: publisher.clone(),
                }),
            ),
        );
        tracing::debug!(topic = name, "Topic created");

        Ok(Topic {
            name: name.to_string(),
            publisher,
            broadcast_tx,
        })
    }

    fn start_dispatcher<T: TopicMessage>(
        mut rx: mpsc::Receiver<T>,
        broadcast_tx: broadcast::Sender<T>,
        buffer_bytes: Arc<AtomicUsize>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) -> JoinHandle<()> {
        let forward = move |msg: T| {
            let msg_size = msg.size_bytes();
            let _ = broadcast_tx.send(msg);
            buffer_bytes.fetch_sub(msg_size, Ordering::SeqCst);
        };

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => {
                        while let Ok(msg) = rx.try_recv() {
                            forward(msg);
                        }
                        break;
                    }
                    msg = rx.recv() => match msg {
                        Some(msg) => forward(msg),
                        None => break,
                    }
                }
            }
        })
    }

    /// Signal every dispatcher to drain, then wait for them
    pub async fn shutdown(&self) {
        let entries: Vec<_> = std::mem::take(&mut *self.dispatchers.write());

        let mut handles = Vec::with_capacity(entries.len());
        for entry in entries {
            let _ = entry.shutdown_tx.send(());
            handles.push(entry.handle);
        }
        for handle in handles {
            let _ = handle.await;
        }
        tracing::debug!("Topic dispatchers drained");
    }
}

impl Default for TopicService {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a specific topic
#[derive(Clone)]
pub struct Topic<T: TopicMessage> {
    name: String,
    publisher: Publisher<T>,
    broadcast_tx: broadcast::Sender<T>,
}

impl<T: TopicMessage> Topic<T> {
    pub fn publisher(&self) -> Publisher<T> {
        self.publisher.clone()
    }

    pub fn subscribe(&self) -> Subscriber<T> {
        Subscriber {
            rx: self.broadcast_tx.subscribe(),
        }
    }

    pub fn publish(&self, msg: T) -> Result<(), TopicError> {
        self.publisher.publish(msg)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
