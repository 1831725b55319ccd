#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use weft_bridge::transport::memory::{MemorySource, MemorySourceConfig};
use weft_bridge::{Bridge, ExposureGate, MemoryExchange, MessageSink, SinkRegistry};
use weft_core::{AgentAddress, BridgeError, LocalBus, Message, Result, StartupBarrier};

pub const SYSTEM: &str = "weft";
pub const INBOUND_TOPIC: &str = "inbound";

pub fn addr(raw: &str) -> AgentAddress {
    AgentAddress::parse(raw).unwrap()
}

pub fn msg(from: &str, to: &str, payload: &str) -> Message {
    Message::new(addr(from), addr(to), payload)
}

pub fn frame(from: &str, to: &str, payload: &str) -> Vec<u8> {
    msg(from, to, payload).to_frame().unwrap()
}

pub async fn recv(rx: &mut mpsc::Receiver<Message>) -> Message {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timeout")
        .expect("mailbox closed")
}

/// Records every published message.
pub struct RecordingSink {
    published: Mutex<Vec<Message>>,
    closed: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            published: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn published(&self) -> Vec<Message> {
        self.published.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.published.lock().unwrap().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn publish(&self, msg: &Message) -> Result<()> {
        self.published.lock().unwrap().push(msg.clone());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Recording sinks for every system the inbound tests send from.
pub fn inbound_sinks() -> SinkRegistry {
    SinkRegistry::new()
        .with("test_system", RecordingSink::new())
        .unwrap()
        .with("ext", RecordingSink::new())
        .unwrap()
        .with("client_net", RecordingSink::new())
        .unwrap()
}

/// Rejects every publish.
#[derive(Default)]
pub struct FailingSink {
    pub calls: AtomicUsize,
}

#[async_trait]
impl MessageSink for FailingSink {
    fn name(&self) -> &str {
        "failing"
    }

    async fn publish(&self, _msg: &Message) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(BridgeError::Publish("broker unavailable".into()))
    }
}

/// A bridge named `weft` reading from the memory topic `inbound`, with local
/// agents `console` and `echo` registered and exposed.
pub struct Harness {
    pub bridge: Arc<Bridge>,
    pub bus: Arc<LocalBus>,
    pub exchange: Arc<MemoryExchange>,
    pub barrier: Arc<StartupBarrier>,
    pub console: mpsc::Receiver<Message>,
    pub echo: mpsc::Receiver<Message>,
}

impl Harness {
    pub fn new(sinks: SinkRegistry) -> Self {
        Self::build(sinks, None, Vec::new())
    }

    pub fn build(sinks: SinkRegistry, origin: Option<&str>, wait_for: Vec<&str>) -> Self {
        Self::with_exchange(Arc::new(MemoryExchange::new()), sinks, origin, wait_for)
    }

    pub fn with_exchange(
        exchange: Arc<MemoryExchange>,
        sinks: SinkRegistry,
        origin: Option<&str>,
        wait_for: Vec<&str>,
    ) -> Self {
        Self::assemble(exchange, LocalBus::new(), sinks, origin, wait_for)
    }

    /// Harness whose agent mailboxes hold at most `capacity` messages.
    pub fn with_mailbox_capacity(capacity: usize, sinks: SinkRegistry) -> Self {
        Self::assemble(
            Arc::new(MemoryExchange::new()),
            LocalBus::with_capacity(capacity),
            sinks,
            None,
            Vec::new(),
        )
    }

    fn assemble(
        exchange: Arc<MemoryExchange>,
        bus: LocalBus,
        sinks: SinkRegistry,
        origin: Option<&str>,
        wait_for: Vec<&str>,
    ) -> Self {
        let bus = Arc::new(bus);
        let console = bus.register("console").unwrap();
        let echo = bus.register("echo").unwrap();
        let barrier = Arc::new(StartupBarrier::new(wait_for));
        let source = Arc::new(MemorySource::new(
            "inbound",
            MemorySourceConfig {
                topic: Some(INBOUND_TOPIC.into()),
                origin: origin.map(str::to_string),
                ..Default::default()
            },
            exchange.clone(),
        ));
        let bridge = Bridge::new(
            SYSTEM,
            ExposureGate::new(["console", "echo"]),
            sinks,
            source,
            bus.clone(),
            barrier.clone(),
        )
        .unwrap();
        Self {
            bridge: Arc::new(bridge),
            bus,
            exchange,
            barrier,
            console,
            echo,
        }
    }

    pub async fn send_frame(&self, data: Vec<u8>) {
        self.exchange.sender(INBOUND_TOPIC).send(data).await.unwrap();
    }
}
