//! Startup barrier: holds external traffic back until the agents it must reach
//! have reported ready.

use std::collections::HashSet;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BarrierState {
    Waiting,
    /// Terminal.
    Open,
}

/// One-way `Waiting -> Open` gate.
///
/// Opens once every agent in the wait-set has called [`report_ready`](Self::report_ready).
/// An empty wait-set starts open. Shared as `Arc<StartupBarrier>`.
#[derive(Debug)]
pub struct StartupBarrier {
    wait_set: HashSet<String>,
    ready: Mutex<HashSet<String>>,
    state_tx: watch::Sender<BarrierState>,
}

impl StartupBarrier {
    pub fn new<I, S>(wait_for: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let wait_set: HashSet<String> = wait_for.into_iter().map(Into::into).collect();
        let initial = if wait_set.is_empty() {
            BarrierState::Open
        } else {
            BarrierState::Waiting
        };
        let (state_tx, _) = watch::channel(initial);
        Self {
            wait_set,
            ready: Mutex::new(HashSet::new()),
            state_tx,
        }
    }

    /// Record that `agent_id` is ready. Returns `true` if this call opened the barrier.
    pub fn report_ready(&self, agent_id: &str) -> bool {
        let mut ready = self.ready.lock().unwrap_or_else(|e| e.into_inner());
        ready.insert(agent_id.to_string());
        if self.is_open() {
            return false;
        }
        let remaining = self.wait_set.iter().filter(|a| !ready.contains(*a)).count();
        debug!(agent_id = %agent_id, remaining, "Agent reported ready");
        if remaining > 0 {
            return false;
        }
        // send_replace stores the value even with no receivers alive
        self.state_tx.send_replace(BarrierState::Open);
        info!(agents = self.wait_set.len(), "Startup barrier open");
        true
    }

    pub fn state(&self) -> BarrierState {
        *self.state_tx.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == BarrierState::Open
    }

    /// Agents from the wait-set that have not reported ready yet, sorted.
    pub fn pending(&self) -> Vec<String> {
        let ready = self.ready.lock().unwrap_or_else(|e| e.into_inner());
        let mut pending: Vec<String> = self
            .wait_set
            .iter()
            .filter(|a| !ready.contains(*a))
            .cloned()
            .collect();
        pending.sort();
        pending
    }

    pub fn wait_set(&self) -> &HashSet<String> {
        &self.wait_set
    }

    /// Resolve once the barrier is open. Returns immediately if it already is.
    pub async fn wait_open(&self) {
        let mut rx = self.state_tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail while we borrow it
        let _ = rx.wait_for(|s| *s == BarrierState::Open).await;
    }
}
