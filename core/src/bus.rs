// Internal bus implementation
use crate::{AgentAddress, BridgeError, Message, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Default mailbox size per local agent
pub const DEFAULT_MAILBOX_CAPACITY: usize = 50;

/// Delivers messages between local agents by id.
///
/// `deliver` is a suspension point: it may wait for room in the target's mailbox.
/// Dropping a pending `deliver` future leaves the message undelivered.
#[async_trait]
pub trait InternalBus: Send + Sync {
    async fn deliver(&self, msg: Message) -> Result<()>;

    /// Whether `agent_id` is a locally registered agent.
    fn is_registered(&self, agent_id: &str) -> bool;
}

/// Per-agent bus statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusStats {
    pub total_delivered: u64,
    pub dropped_messages: u64,
    /// Messages sitting in the mailbox after the last delivery
    pub backlog_size: usize,
}

/// In-memory bus with one bounded mailbox per registered agent
pub struct LocalBus {
    // agent_id -> mailbox sender
    mailboxes: Arc<DashMap<String, mpsc::Sender<Message>>>,

    // Statistics
    stats: Arc<DashMap<String, BusStats>>,

    mailbox_capacity: usize,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAILBOX_CAPACITY)
    }

    pub fn with_capacity(mailbox_capacity: usize) -> Self {
        Self {
            mailboxes: Arc::new(DashMap::new()),
            stats: Arc::new(DashMap::new()),
            mailbox_capacity: mailbox_capacity.max(1),
        }
    }

    /// Register a local agent and return the receiving end of its mailbox.
    ///
    /// The id must be a valid local agent id (non-empty, no `@`).
    pub fn register(&self, agent_id: &str) -> Result<mpsc::Receiver<Message>> {
        AgentAddress::local(agent_id)?;
        if self.mailboxes.contains_key(agent_id) {
            return Err(BridgeError::Delivery(format!(
                "agent '{agent_id}' is already registered"
            )));
        }
        let (tx, rx) = mpsc::channel(self.mailbox_capacity);
        self.mailboxes.insert(agent_id.to_string(), tx);
        self.stats.entry(agent_id.to_string()).or_default();

        info!(agent_id = %agent_id, capacity = self.mailbox_capacity, "Registered local agent mailbox");
        Ok(rx)
    }

    pub fn unregister(&self, agent_id: &str) {
        if self.mailboxes.remove(agent_id).is_some() {
            info!(agent_id = %agent_id, "Unregistered local agent mailbox");
        }
    }

    pub fn registered_agents(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.mailboxes.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Get stats
    pub fn get_stats(&self, agent_id: &str) -> Option<BusStats> {
        self.stats.get(agent_id).map(|s| s.clone())
    }

    pub fn shutdown(&self) {
        info!("Local bus shutting down");
        self.mailboxes.clear();
    }

    // Update stats helper function
    fn update_stats<F>(&self, agent_id: &str, f: F)
    where
        F: FnOnce(&mut BusStats),
    {
        f(self
            .stats
            .entry(agent_id.to_string())
            .or_default()
            .value_mut());
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InternalBus for LocalBus {
    async fn deliver(&self, msg: Message) -> Result<()> {
        let agent_id = msg.to.agent_id().to_string();
        if !msg.to.is_local() {
            return Err(BridgeError::Delivery(format!(
                "local bus cannot deliver to external address {}",
                msg.to
            )));
        }

        // Clone the sender so no map guard is held across the await
        let sender = self
            .mailboxes
            .get(&agent_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| {
                BridgeError::Delivery(format!("no local agent registered as '{agent_id}'"))
            })?;

        debug!(from = %msg.from, to = %msg.to, "Delivering message on local bus");
        // Waiting for a slot is cancel-safe; nothing is recorded until one is held
        let permit = match sender.reserve().await {
            Ok(permit) => permit,
            Err(_) => {
                self.update_stats(&agent_id, |stats| stats.dropped_messages += 1);
                warn!(agent_id = %agent_id, "Mailbox closed; message not delivered");
                return Err(BridgeError::Delivery(format!(
                    "mailbox for '{agent_id}' is closed"
                )));
            }
        };
        permit.send(msg);

        let backlog = self.mailbox_capacity.saturating_sub(sender.capacity());
        self.update_stats(&agent_id, |stats| {
            stats.total_delivered += 1;
            stats.backlog_size = backlog;
        });
        Ok(())
    }

    fn is_registered(&self, agent_id: &str) -> bool {
        self.mailboxes.contains_key(agent_id)
    }
}
