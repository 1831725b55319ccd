//! Inbound side: a `MessageSource` yields raw frames from one external system.

use std::pin::Pin;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use weft_core::{BridgeError, Result};

/// Lazy, unbounded stream of frames; ends only when the transport closes it.
pub type FrameStream = Pin<Box<dyn futures_core::Stream<Item = InboundFrame> + Send>>;

/// Delivery-failure channel back to the transport a frame came from.
pub type NackSender = mpsc::UnboundedSender<Nack>;

/// Negative acknowledgment for a rejected inbound frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nack {
    pub sequence: u64,
    pub code: String,
    pub reason: String,
}

/// One undecoded frame as received from an external transport.
#[derive(Debug)]
pub struct InboundFrame {
    /// Transport-assigned, increasing per source
    pub sequence: u64,
    pub data: Vec<u8>,
    /// Present when the transport can carry a negative acknowledgment
    pub nack: Option<NackSender>,
}

impl InboundFrame {
    pub fn new(sequence: u64, data: impl Into<Vec<u8>>) -> Self {
        Self {
            sequence,
            data: data.into(),
            nack: None,
        }
    }

    pub fn with_nack(mut self, nack: NackSender) -> Self {
        self.nack = Some(nack);
        self
    }

    /// Report `error` to the originating transport. Returns whether it was reported.
    pub fn reject(&self, error: &BridgeError) -> bool {
        let Some(nack) = &self.nack else {
            return false;
        };
        let sent = nack
            .send(Nack {
                sequence: self.sequence,
                code: error.code().to_string(),
                reason: error.to_string(),
            })
            .is_ok();
        if !sent {
            debug!(sequence = self.sequence, "Nack channel closed; rejection not reported");
        }
        sent
    }
}

/// Wraps one external consumer.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// External system frames from this source originate in. Bare senders are
    /// tagged with it so local agents can reply.
    fn origin(&self) -> Option<&str> {
        None
    }

    /// Start consuming. Called once, after the startup barrier has opened.
    async fn subscribe(&self) -> Result<FrameStream>;
}
