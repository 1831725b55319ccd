//! In-process transport: named topics backed by tokio channels.
//!
//! Used in tests and to run bridges back to back inside one process.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{StreamExt, StreamMap};
use tracing::debug;

use weft_core::{BridgeError, Message, Result};

use super::{TransportFactory, TransportRecord};
use crate::sink::MessageSink;
use crate::source::{FrameStream, InboundFrame, MessageSource, Nack};

pub const DEFAULT_TOPIC_CAPACITY: usize = 1024;

struct Topic {
    tx: mpsc::Sender<Vec<u8>>,
    rx: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    nack_tx: mpsc::UnboundedSender<Nack>,
    nack_rx: Mutex<Option<mpsc::UnboundedReceiver<Nack>>>,
}

impl Topic {
    fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        let (nack_tx, nack_rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            nack_tx,
            nack_rx: Mutex::new(Some(nack_rx)),
        }
    }
}

/// Set of named single-consumer topics shared by memory sources and sinks.
pub struct MemoryExchange {
    topics: DashMap<String, Arc<Topic>>,
    capacity: usize,
}

impl MemoryExchange {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TOPIC_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    fn topic(&self, name: &str) -> Arc<Topic> {
        Arc::clone(
            self.topics
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Topic::new(self.capacity)))
                .value(),
        )
    }

    /// Sender for raw frames on `topic`.
    pub fn sender(&self, topic: &str) -> mpsc::Sender<Vec<u8>> {
        self.topic(topic).tx.clone()
    }

    /// Encode and send a message on `topic`.
    pub async fn send_message(&self, topic: &str, msg: &Message) -> Result<()> {
        let frame = msg.to_frame()?;
        self.sender(topic)
            .send(frame)
            .await
            .map_err(|_| BridgeError::Publish(format!("memory topic '{topic}' is closed")))
    }

    /// Take the single consumer end of `topic`. `None` if already taken.
    pub fn take_receiver(&self, topic: &str) -> Option<mpsc::Receiver<Vec<u8>>> {
        self.topic(topic)
            .rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    /// Take the negative acknowledgments reported for frames read from `topic`.
    pub fn take_nacks(&self, topic: &str) -> Option<mpsc::UnboundedReceiver<Nack>> {
        self.topic(topic)
            .nack_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }
}

impl Default for MemoryExchange {
    fn default() -> Self {
        Self::new()
    }
}

/// Memory source settings.
///
/// With `topic` set, only that topic is consumed. Otherwise one topic per
/// exposed agent, named by `agent_to_topic_mapping` or by the agent id.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemorySourceConfig {
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub exposed_agents: Vec<String>,
    #[serde(default)]
    pub agent_to_topic_mapping: BTreeMap<String, String>,
    #[serde(default)]
    pub origin: Option<String>,
}

impl MemorySourceConfig {
    /// Topics to consume, deduplicated and in a stable order.
    pub fn topics(&self) -> Result<Vec<String>> {
        if let Some(topic) = &self.topic {
            return Ok(vec![topic.clone()]);
        }
        let mut topics: Vec<String> = Vec::new();
        for agent in &self.exposed_agents {
            let topic = self
                .agent_to_topic_mapping
                .get(agent)
                .cloned()
                .unwrap_or_else(|| agent.clone());
            if !topics.contains(&topic) {
                topics.push(topic);
            }
        }
        if topics.is_empty() {
            return Err(BridgeError::Config(
                "memory source needs a topic or at least one exposed agent".into(),
            ));
        }
        Ok(topics)
    }
}

/// Memory sink settings.
///
/// The topic for a message is looked up by its recipient's agent id in
/// `agent_to_topic_mapping`, then falls back to `topic`, then to the agent id.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemorySinkConfig {
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub agent_to_topic_mapping: BTreeMap<String, String>,
}

impl MemorySinkConfig {
    pub fn topic_for<'a>(&'a self, agent_id: &'a str) -> &'a str {
        self.agent_to_topic_mapping
            .get(agent_id)
            .map(String::as_str)
            .or(self.topic.as_deref())
            .unwrap_or(agent_id)
    }
}

pub struct MemorySource {
    name: String,
    config: MemorySourceConfig,
    exchange: Arc<MemoryExchange>,
}

impl MemorySource {
    pub fn new(name: &str, config: MemorySourceConfig, exchange: Arc<MemoryExchange>) -> Self {
        Self {
            name: name.to_string(),
            config,
            exchange,
        }
    }
}

#[async_trait]
impl MessageSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn origin(&self) -> Option<&str> {
        self.config.origin.as_deref()
    }

    async fn subscribe(&self) -> Result<FrameStream> {
        let topics = self.config.topics()?;
        let mut streams = StreamMap::new();
        let mut nacks = HashMap::new();
        for topic in topics {
            let rx = self.exchange.take_receiver(&topic).ok_or_else(|| {
                BridgeError::Config(format!("memory topic '{topic}' already has a consumer"))
            })?;
            nacks.insert(topic.clone(), self.exchange.topic(&topic).nack_tx.clone());
            streams.insert(topic, ReceiverStream::new(rx));
        }
        debug!(source = %self.name, topics = ?nacks.keys().collect::<Vec<_>>(), "Memory source subscribed");

        let stream = async_stream::stream! {
            let mut sequence = 0u64;
            while let Some((topic, data)) = streams.next().await {
                let mut frame = InboundFrame::new(sequence, data);
                if let Some(nack) = nacks.get(&topic) {
                    frame = frame.with_nack(nack.clone());
                }
                yield frame;
                sequence += 1;
            }
        };
        Ok(Box::pin(stream))
    }
}

pub struct MemorySink {
    name: String,
    config: MemorySinkConfig,
    exchange: Arc<MemoryExchange>,
}

impl MemorySink {
    pub fn new(name: &str, config: MemorySinkConfig, exchange: Arc<MemoryExchange>) -> Self {
        Self {
            name: name.to_string(),
            config,
            exchange,
        }
    }
}

#[async_trait]
impl MessageSink for MemorySink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, msg: &Message) -> Result<()> {
        let topic = self.config.topic_for(msg.to.agent_id());
        let frame = msg.to_frame()?;
        debug!(sink = %self.name, topic = %topic, to = %msg.to, "Publishing to memory topic");
        self.exchange.sender(topic).send(frame).await.map_err(|_| {
            BridgeError::Publish(format!("memory topic '{topic}' has no consumer"))
        })
    }
}

/// Factory for the `memory` transport tag.
pub struct MemoryTransport {
    exchange: Arc<MemoryExchange>,
}

impl MemoryTransport {
    pub fn new(exchange: Arc<MemoryExchange>) -> Self {
        Self { exchange }
    }
}

impl TransportFactory for MemoryTransport {
    fn kind(&self) -> &str {
        "memory"
    }

    fn build_source(&self, name: &str, record: &TransportRecord) -> Result<Arc<dyn MessageSource>> {
        let config: MemorySourceConfig = record.parse_args()?;
        config.topics()?;
        Ok(Arc::new(MemorySource::new(
            name,
            config,
            Arc::clone(&self.exchange),
        )))
    }

    fn build_sink(&self, name: &str, record: &TransportRecord) -> Result<Arc<dyn MessageSink>> {
        let config: MemorySinkConfig = record.parse_args()?;
        Ok(Arc::new(MemorySink::new(
            name,
            config,
            Arc::clone(&self.exchange),
        )))
    }
}
