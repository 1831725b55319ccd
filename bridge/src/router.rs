//! Bridge router: mediates between the internal bus and named external systems.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

use weft_core::address::SYSTEM_SEPARATOR;
use weft_core::message::keys;
use weft_core::{
    BridgeError, BridgeStats, BridgeStatsSnapshot, InternalBus, Message, Result, StartupBarrier,
};

use crate::exposure::ExposureGate;
use crate::sink::SinkRegistry;
use crate::source::{InboundFrame, MessageSource};

/// Routes every message crossing the boundary of this process.
///
/// Owns the exposure whitelist, one inbound source and the registry of
/// outbound sinks. Share it as `Arc<Bridge>`: agents call [`post`](Self::post)
/// concurrently while the consumption task runs.
pub struct Bridge {
    system_name: String,
    gate: ExposureGate,
    sinks: SinkRegistry,
    source: Arc<dyn MessageSource>,
    bus: Arc<dyn InternalBus>,
    barrier: Arc<StartupBarrier>,
    stats: BridgeStats,
    started: AtomicBool,
    consuming: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Bridge {
    /// Assemble a bridge, validating the startup invariants.
    ///
    /// Fails with `Config` if `system_name` is empty or names one of the
    /// external systems, if the source's origin is not a registered external
    /// system, or if an exposed or awaited agent is not registered on the bus.
    pub fn new(
        system_name: impl Into<String>,
        gate: ExposureGate,
        sinks: SinkRegistry,
        source: Arc<dyn MessageSource>,
        bus: Arc<dyn InternalBus>,
        barrier: Arc<StartupBarrier>,
    ) -> Result<Self> {
        let system_name = system_name.into();
        if system_name.is_empty() || system_name.contains(SYSTEM_SEPARATOR) {
            return Err(BridgeError::Config(format!(
                "system_name '{system_name}' must be non-empty and must not contain '{SYSTEM_SEPARATOR}'"
            )));
        }
        if sinks.contains(&system_name) {
            return Err(BridgeError::Config(format!(
                "system_name '{system_name}' collides with an external system of the same name"
            )));
        }
        if let Some(origin) = source.origin() {
            if !sinks.contains(origin) {
                return Err(BridgeError::Config(format!(
                    "source origin '{origin}' is not a configured external system"
                )));
            }
        }
        let mut unknown: Vec<&str> = gate
            .agents()
            .filter(|agent| !bus.is_registered(agent))
            .collect();
        unknown.sort();
        if !unknown.is_empty() {
            return Err(BridgeError::Config(format!(
                "exposed agents are not registered locally: {}",
                unknown.join(", ")
            )));
        }
        let mut unknown: Vec<&str> = barrier
            .wait_set()
            .iter()
            .map(String::as_str)
            .filter(|agent| !bus.is_registered(agent))
            .collect();
        unknown.sort();
        if !unknown.is_empty() {
            return Err(BridgeError::Config(format!(
                "wait_for_agents are not registered locally: {}",
                unknown.join(", ")
            )));
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        info!(
            system = %system_name,
            source = source.name(),
            external_systems = ?sinks.names(),
            "Bridge assembled"
        );
        Ok(Self {
            system_name,
            gate,
            sinks,
            source,
            bus,
            barrier,
            stats: BridgeStats::new(),
            started: AtomicBool::new(false),
            consuming: AtomicBool::new(false),
            shutdown_tx,
            shutdown_rx,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// This bridge's externally visible name.
    pub fn system_name(&self) -> &str {
        &self.system_name
    }

    pub fn gate(&self) -> &ExposureGate {
        &self.gate
    }

    pub fn sinks(&self) -> &SinkRegistry {
        &self.sinks
    }

    pub fn stats(&self) -> BridgeStatsSnapshot {
        self.stats.snapshot()
    }

    /// Whether the source is subscribed and frames are being consumed.
    ///
    /// `false` before the barrier opens, after `stop`, and when subscribing
    /// failed (counted in `source_failures`).
    pub fn is_consuming(&self) -> bool {
        self.consuming.load(Ordering::SeqCst)
    }

    /// Start sinks, then spawn the source consumption task.
    ///
    /// The task does not subscribe to the source until the startup barrier opens.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!(system = %self.system_name, "Bridge already started");
            return Ok(());
        }
        for (name, sink) in self.sinks.iter() {
            sink.start().await?;
            debug!(system = %name, sink = sink.name(), "Sink started");
        }

        let bridge = Arc::clone(self);
        let shutdown = self.shutdown_rx.clone();
        let task = tokio::spawn(async move { bridge.consume(shutdown).await });
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(task);
        info!(system = %self.system_name, "Bridge started");
        Ok(())
    }

    /// Stop consumption, wait for the consumption task, then close every sink.
    ///
    /// A frame still waiting for mailbox space is abandoned and rejected with
    /// `Delivery`. Sinks finish any in-flight publish before closing.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Bridge consumption task failed");
            }
        }
        for (name, sink) in self.sinks.iter() {
            if let Err(e) = sink.close().await {
                warn!(system = %name, error = %e, "Failed to close sink");
            }
        }
        info!(system = %self.system_name, stats = ?self.stats.snapshot(), "Bridge stopped");
    }

    /// Send a message on behalf of a local agent.
    ///
    /// Local targets (bare or tagged with this system's name) go to the
    /// internal bus; everything else goes through [`route_outbound`](Self::route_outbound).
    pub async fn post(&self, msg: &Message) -> Result<()> {
        let own = msg
            .to
            .system_of()
            .map(|s| s == self.system_name)
            .unwrap_or(true);
        if own {
            let mut local = msg.clone();
            local.to = msg.to.to_local()?;
            return self.bus.deliver(local).await;
        }
        self.route_outbound(msg).await
    }

    /// Publish a message from a local agent to the sink of its target system.
    ///
    /// The published copy has `from` tagged with this bridge's system name and
    /// `to` stripped to the bare agent id. `msg` itself is never consumed.
    pub async fn route_outbound(&self, msg: &Message) -> Result<()> {
        let result = self.publish_outbound(msg).await;
        match &result {
            Ok(()) => self.stats.record_published(),
            Err(e) => {
                self.stats.record_publish_failed();
                warn!(from = %msg.from, to = %msg.to, code = e.code(), error = %e, "Outbound message not published");
            }
        }
        result
    }

    async fn publish_outbound(&self, msg: &Message) -> Result<()> {
        let system = msg.to.system_of()?;
        if !msg.from.is_local() {
            return Err(BridgeError::Misrouted(format!(
                "outbound sender {} is not a local agent",
                msg.from
            )));
        }
        let sink = self
            .sinks
            .get(system)
            .ok_or_else(|| BridgeError::UnknownSystem(system.to_string()))?;

        let outgoing = Message {
            from: msg.from.with_system(&self.system_name)?,
            to: msg.to.to_local()?,
            payload: msg.payload.clone(),
            headers: msg.headers.clone(),
        };
        debug!(system = %system, from = %outgoing.from, to = %outgoing.to, "Publishing outbound message");
        sink.publish(&outgoing).await.map_err(|e| match e {
            BridgeError::Publish(_) => e,
            other => BridgeError::Publish(other.to_string()),
        })
    }

    /// Deliver a message received from an external system to a local agent.
    ///
    /// `to` must be bare or tagged with this bridge's system name and must name
    /// an exposed agent. A bare `from` is tagged with `origin`; the sender's
    /// system must be a registered external system so the agent can reply.
    pub async fn route_inbound(&self, msg: Message, origin: Option<&str>) -> Result<()> {
        let msg = match self.admit_inbound(msg, origin) {
            Ok(msg) => msg,
            Err(e) => {
                self.stats.record_rejected();
                debug!(code = e.code(), error = %e, "Inbound message rejected");
                return Err(e);
            }
        };
        let (from, to) = (msg.from.to_string(), msg.to.to_string());
        match self.bus.deliver(msg).await {
            Ok(()) => {
                self.stats.record_delivered();
                debug!(from = %from, to = %to, "Inbound message delivered");
                Ok(())
            }
            Err(e) => {
                self.stats.record_rejected();
                warn!(from = %from, to = %to, error = %e, "Inbound delivery failed");
                Err(e)
            }
        }
    }

    fn admit_inbound(&self, mut msg: Message, origin: Option<&str>) -> Result<Message> {
        if let Ok(target_system) = msg.to.system_of() {
            if target_system != self.system_name {
                return Err(BridgeError::Misrouted(format!(
                    "inbound target {} is not addressed to system '{}'",
                    msg.to, self.system_name
                )));
            }
        }
        self.gate.admit(msg.to.agent_id())?;

        let from = match (msg.from.system_of(), origin) {
            (Ok(system), _) if system == self.system_name => {
                return Err(BridgeError::Misrouted(format!(
                    "inbound sender {} claims this system",
                    msg.from
                )))
            }
            (Ok(_), _) => msg.from.clone(),
            (Err(_), Some(origin)) => msg.from.with_system(origin)?,
            (Err(e), None) => return Err(e),
        };
        let origin_system = from.system_of()?.to_string();
        if !self.sinks.contains(&origin_system) {
            return Err(BridgeError::UnknownSystem(origin_system));
        }

        msg.from = from;
        msg.to = msg.to.to_local()?;
        msg.headers
            .insert(keys::ORIGIN_SYSTEM.to_string(), origin_system);
        msg.headers.insert(
            keys::RECEIVED_AT.to_string(),
            chrono::Utc::now().timestamp_millis().to_string(),
        );
        Ok(msg)
    }

    /// Decode one frame and route it. Failures never stop consumption.
    async fn handle_frame(&self, frame: &InboundFrame, origin: Option<&str>) {
        let msg = match Message::from_frame(&frame.data) {
            Ok(msg) => msg,
            Err(BridgeError::MalformedAddress(reason)) => {
                self.stats.record_malformed();
                warn!(sequence = frame.sequence, reason = %reason, "Dropping frame with malformed address");
                return;
            }
            Err(e) => {
                self.stats.record_decode_failure();
                warn!(sequence = frame.sequence, error = %e, "Dropping undecodable frame");
                return;
            }
        };
        if let Err(e) = self.route_inbound(msg, origin).await {
            if matches!(e, BridgeError::MalformedAddress(_)) {
                self.stats.record_malformed();
            }
            frame.reject(&e);
        }
    }

    async fn consume(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let source = Arc::clone(&self.source);

        if !self.barrier.is_open() {
            info!(source = source.name(), pending = ?self.barrier.pending(), "Waiting for agents before consuming");
        }
        tokio::select! {
            _ = self.barrier.wait_open() => {}
            _ = shutdown_requested(&mut shutdown) => {
                info!(source = source.name(), "Shutdown before startup barrier opened");
                return;
            }
        }

        let mut stream = match source.subscribe().await {
            Ok(stream) => stream,
            Err(e) => {
                self.stats.record_source_failure();
                error!(source = source.name(), code = e.code(), error = %e, "Failed to subscribe to message source");
                return;
            }
        };
        self.consuming.store(true, Ordering::SeqCst);
        info!(source = source.name(), origin = ?source.origin(), "Consuming from message source");

        loop {
            let frame = tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => {
                    info!(source = source.name(), "Shutting down message source consumption");
                    break;
                }
                frame = stream.next() => match frame {
                    Some(frame) => frame,
                    None => {
                        info!(source = source.name(), "Message source stream ended");
                        break;
                    }
                },
            };
            // Delivery may wait on a full mailbox; shutdown still wins
            tokio::select! {
                biased;
                _ = self.handle_frame(&frame, source.origin()) => {}
                _ = shutdown_requested(&mut shutdown) => {
                    self.stats.record_rejected();
                    warn!(sequence = frame.sequence, "Shutdown while routing; frame abandoned");
                    frame.reject(&BridgeError::Delivery("bridge shutting down".into()));
                    break;
                }
            }
        }
        self.consuming.store(false, Ordering::SeqCst);
    }
}

/// Resolves once shutdown is signalled (or the signal sender is gone).
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}
