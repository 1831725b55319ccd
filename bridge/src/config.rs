use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use weft_core::address::SYSTEM_SEPARATOR;
use weft_core::bus::DEFAULT_MAILBOX_CAPACITY;
use weft_core::{BridgeError, InternalBus, Result, StartupBarrier};

use crate::exposure::ExposureGate;
use crate::router::Bridge;
use crate::sink::SinkRegistry;
use crate::transport::{TransportRecord, TransportRegistry};

/// Env var naming the config file
pub const CONFIG_PATH_ENV: &str = "WEFT_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "weft.yaml";
/// Overrides `messaging.system_name` when set
pub const SYSTEM_NAME_ENV: &str = "WEFT_SYSTEM_NAME";

const SOURCE_ORIGIN_ARG: &str = "origin";
const SOURCE_AGENTS_ARG: &str = "exposed_agents";

/// Top-level configuration document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeftConfig {
    pub messaging: MessagingConfig,
    /// Agents that must report ready before inbound consumption starts
    #[serde(default)]
    pub wait_for_agents: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagingConfig {
    pub system_name: String,
    #[serde(default)]
    pub internal: InternalBusConfig,
    pub bridge: BridgeSection,
    #[serde(default)]
    pub exposed_agents: Vec<String>,
    #[serde(default)]
    pub external_systems: BTreeMap<String, TransportRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalBusConfig {
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
}

impl Default for InternalBusConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: default_mailbox_capacity(),
        }
    }
}

fn default_mailbox_capacity() -> usize {
    DEFAULT_MAILBOX_CAPACITY
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeSection {
    pub source: TransportRecord,
}

impl WeftConfig {
    /// Load from the path in `WEFT_CONFIG` (or `./weft.yaml`), then apply env overrides.
    ///
    /// A missing file is a `Config` error.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        let mut config = Self::from_path(&path)?;
        if let Some(name) = std::env::var(SYSTEM_NAME_ENV).ok().filter(|s| !s.is_empty()) {
            info!(target: "config", system = %name, "system_name overridden from environment");
            config.messaging.system_name = name;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            BridgeError::Config(format!("cannot read config {}: {e}", path.display()))
        })?;
        let config = Self::from_yaml_str(&text)?;
        info!(target: "config", path = %path.display(), system = %config.messaging.system_name, "Loaded config");
        Ok(config)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|e| BridgeError::Config(format!("invalid config: {e}")))
    }

    /// Checks that need nothing but the document itself.
    ///
    /// Registration of exposed and awaited agents is checked against the bus
    /// in [`build_bridge`](Self::build_bridge).
    pub fn validate(&self) -> Result<()> {
        let name = &self.messaging.system_name;
        if name.is_empty() || name.contains(SYSTEM_SEPARATOR) {
            return Err(BridgeError::Config(format!(
                "system_name '{name}' must be non-empty and must not contain '{SYSTEM_SEPARATOR}'"
            )));
        }
        if self.messaging.external_systems.contains_key(name) {
            return Err(BridgeError::Config(format!(
                "system_name '{name}' is also listed under external_systems"
            )));
        }
        if let Some(bad) = self
            .messaging
            .external_systems
            .keys()
            .find(|k| k.is_empty() || k.contains(SYSTEM_SEPARATOR))
        {
            return Err(BridgeError::Config(format!(
                "external system name '{bad}' must be non-empty and must not contain '{SYSTEM_SEPARATOR}'"
            )));
        }
        if let Some(origin) = self.messaging.bridge.source.args.get(SOURCE_ORIGIN_ARG) {
            let origin = origin.as_str().unwrap_or_default();
            if !self.messaging.external_systems.contains_key(origin) {
                return Err(BridgeError::Config(format!(
                    "bridge.source origin '{origin}' is not listed under external_systems"
                )));
            }
        }
        if let Some(bad) = self
            .messaging
            .exposed_agents
            .iter()
            .chain(&self.wait_for_agents)
            .find(|a| a.is_empty() || a.contains(SYSTEM_SEPARATOR))
        {
            return Err(BridgeError::Config(format!(
                "agent id '{bad}' must be non-empty and must not contain '{SYSTEM_SEPARATOR}'"
            )));
        }
        if self.messaging.internal.mailbox_capacity == 0 {
            return Err(BridgeError::Config("mailbox_capacity must be at least 1".into()));
        }
        Ok(())
    }

    pub fn startup_barrier(&self) -> StartupBarrier {
        StartupBarrier::new(self.wait_for_agents.iter().cloned())
    }

    pub fn exposure_gate(&self) -> ExposureGate {
        ExposureGate::new(self.messaging.exposed_agents.iter().cloned())
    }

    /// Build adapters through `registry` and assemble the bridge.
    ///
    /// Agents named in `exposed_agents` and `wait_for_agents` must already be
    /// registered on `bus`. The source record receives `exposed_agents` unless
    /// it lists its own, so per-agent transports know what to consume.
    pub fn build_bridge(
        &self,
        registry: &TransportRegistry,
        bus: Arc<dyn InternalBus>,
        barrier: Arc<StartupBarrier>,
    ) -> Result<Bridge> {
        self.validate()?;
        let messaging = &self.messaging;

        let mut sinks = SinkRegistry::new();
        for (system, record) in &messaging.external_systems {
            let sink = registry.build_sink(system, record)?;
            sinks.insert(system, sink)?;
        }
        let mut source_record = messaging.bridge.source.clone();
        source_record
            .args
            .entry(SOURCE_AGENTS_ARG.to_string())
            .or_insert_with(|| {
                serde_yaml::Value::Sequence(
                    messaging
                        .exposed_agents
                        .iter()
                        .map(|a| serde_yaml::Value::from(a.as_str()))
                        .collect(),
                )
            });
        let source = registry.build_source(&messaging.system_name, &source_record)?;

        Bridge::new(
            messaging.system_name.clone(),
            self.exposure_gate(),
            sinks,
            source,
            bus,
            barrier,
        )
    }
}
