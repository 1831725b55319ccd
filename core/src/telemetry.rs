// Logging setup and bridge counters
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Default filter when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "info,weft_core=info,weft_bridge=info";

/// Install a global fmt subscriber filtered by `RUST_LOG` (falls back to `default_filter`).
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing(default_filter: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().compact().with_target(true))
        .try_init()
        .is_ok();

    if installed {
        info!(target: "telemetry", "Tracing initialized");
    }
}

/// Bridge counters. Monotonic, updated lock-free from any task.
#[derive(Debug, Default)]
pub struct BridgeStats {
    inbound_delivered: AtomicU64,
    inbound_rejected: AtomicU64,
    decode_failures: AtomicU64,
    malformed_addresses: AtomicU64,
    outbound_published: AtomicU64,
    outbound_failed: AtomicU64,
    source_failures: AtomicU64,
}

/// Point-in-time copy of [`BridgeStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeStatsSnapshot {
    pub inbound_delivered: u64,
    pub inbound_rejected: u64,
    pub decode_failures: u64,
    pub malformed_addresses: u64,
    pub outbound_published: u64,
    pub outbound_failed: u64,
    /// Times the source could not be subscribed to
    pub source_failures: u64,
}

impl BridgeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_delivered(&self) {
        self.inbound_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.inbound_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed_addresses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_published(&self) {
        self.outbound_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_publish_failed(&self) {
        self.outbound_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_source_failure(&self) {
        self.source_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BridgeStatsSnapshot {
        BridgeStatsSnapshot {
            inbound_delivered: self.inbound_delivered.load(Ordering::Relaxed),
            inbound_rejected: self.inbound_rejected.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            malformed_addresses: self.malformed_addresses.load(Ordering::Relaxed),
            outbound_published: self.outbound_published.load(Ordering::Relaxed),
            outbound_failed: self.outbound_failed.load(Ordering::Relaxed),
            source_failures: self.source_failures.load(Ordering::Relaxed),
        }
    }
}
