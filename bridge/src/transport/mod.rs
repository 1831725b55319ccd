//! Transport registry: builds sources and sinks from tagged config records.

pub mod memory;
pub mod tcp;

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::info;

use weft_core::{BridgeError, Result};

use crate::sink::MessageSink;
use crate::source::MessageSource;

pub use memory::{MemoryExchange, MemoryTransport};
pub use tcp::TcpTransport;

/// A `type`-tagged config block; everything besides `type` is transport args.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportRecord {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub args: BTreeMap<String, serde_yaml::Value>,
}

impl TransportRecord {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            args: BTreeMap::new(),
        }
    }

    pub fn with_arg(mut self, key: &str, value: impl Into<serde_yaml::Value>) -> Self {
        self.args.insert(key.to_string(), value.into());
        self
    }

    /// Parse the args into a transport's own config type.
    pub fn parse_args<T: DeserializeOwned>(&self) -> Result<T> {
        let mapping: serde_yaml::Mapping = self
            .args
            .iter()
            .map(|(k, v)| (serde_yaml::Value::String(k.clone()), v.clone()))
            .collect();
        serde_yaml::from_value(serde_yaml::Value::Mapping(mapping)).map_err(|e| {
            BridgeError::Config(format!("invalid '{}' transport args: {e}", self.kind))
        })
    }
}

/// Builds sources and sinks for one transport kind.
pub trait TransportFactory: Send + Sync {
    /// Tag matched against `TransportRecord::kind`
    fn kind(&self) -> &str;

    fn build_source(&self, name: &str, record: &TransportRecord)
        -> Result<Arc<dyn MessageSource>>;

    fn build_sink(&self, name: &str, record: &TransportRecord) -> Result<Arc<dyn MessageSink>>;
}

/// Factories keyed by transport tag.
#[derive(Default)]
pub struct TransportRegistry {
    factories: DashMap<String, Arc<dyn TransportFactory>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `memory` (bound to `exchange`) and `tcp` transports.
    pub fn with_defaults(exchange: Arc<MemoryExchange>) -> Self {
        let registry = Self::new();
        registry.register(Arc::new(MemoryTransport::new(exchange)));
        registry.register(Arc::new(TcpTransport));
        registry
    }

    /// Register a factory; a later registration for the same tag replaces the earlier one.
    pub fn register(&self, factory: Arc<dyn TransportFactory>) {
        info!(target: "transport", kind = factory.kind(), "Registering transport");
        self.factories.insert(factory.kind().to_string(), factory);
    }

    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.factories.iter().map(|e| e.key().clone()).collect();
        kinds.sort();
        kinds
    }

    pub fn build_source(
        &self,
        name: &str,
        record: &TransportRecord,
    ) -> Result<Arc<dyn MessageSource>> {
        self.factory(record)?.build_source(name, record)
    }

    pub fn build_sink(&self, name: &str, record: &TransportRecord) -> Result<Arc<dyn MessageSink>> {
        self.factory(record)?.build_sink(name, record)
    }

    fn factory(&self, record: &TransportRecord) -> Result<Arc<dyn TransportFactory>> {
        self.factories
            .get(&record.kind)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| {
                BridgeError::Config(format!(
                    "unknown transport type '{}' (known: {})",
                    record.kind,
                    self.kinds().join(", ")
                ))
            })
    }
}
