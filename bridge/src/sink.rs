//! Outbound side: one `MessageSink` per named external system.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use weft_core::{BridgeError, Message, Result};

/// Wraps one external producer.
///
/// `publish` borrows the message: on failure the caller still owns it and
/// decides whether to retry. Implementations must keep submission order for
/// calls on the same sink.
#[async_trait]
pub trait MessageSink: Send + Sync {
    fn name(&self) -> &str;

    /// Prepare the transport (background flushers and the like).
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    /// Encode and hand off. Transport rejection is `BridgeError::Publish`.
    async fn publish(&self, msg: &Message) -> Result<()>;

    /// Flush and release the transport. Waits for an in-flight publish.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Sinks keyed by external system name. Built once, read-only afterwards.
#[derive(Default, Clone)]
pub struct SinkRegistry {
    sinks: HashMap<String, Arc<dyn MessageSink>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, system_name: &str, sink: Arc<dyn MessageSink>) -> Result<()> {
        if system_name.is_empty() {
            return Err(BridgeError::Config("external system name is empty".into()));
        }
        if self.sinks.contains_key(system_name) {
            return Err(BridgeError::Config(format!(
                "external system '{system_name}' configured twice"
            )));
        }
        self.sinks.insert(system_name.to_string(), sink);
        Ok(())
    }

    /// Builder-style `insert`.
    pub fn with(mut self, system_name: &str, sink: Arc<dyn MessageSink>) -> Result<Self> {
        self.insert(system_name, sink)?;
        Ok(self)
    }

    pub fn get(&self, system_name: &str) -> Option<&Arc<dyn MessageSink>> {
        self.sinks.get(system_name)
    }

    pub fn contains(&self, system_name: &str) -> bool {
        self.sinks.contains_key(system_name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sinks.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn MessageSink>)> {
        self.sinks.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}
