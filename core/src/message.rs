use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::address::AgentAddress;
use crate::{BridgeError, Result};

/// Reserved header keys.
pub mod keys {
    /// Conversation the message belongs to
    pub const THREAD_ID: &str = "thread_id";
    /// Intent of the sender (request, inform, failure, ...)
    pub const PERFORMATIVE: &str = "performative";
    /// External system an inbound message arrived from
    pub const ORIGIN_SYSTEM: &str = "origin_system";
    /// Milliseconds since epoch when the bridge accepted an inbound message
    pub const RECEIVED_AT: &str = "received_at";
}

/// A message between two agents.
///
/// `from` and `to` are never both external addresses handled by one bridge;
/// the bridge only mediates local <-> external traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub from: AgentAddress,
    pub to: AgentAddress,
    pub payload: Vec<u8>,
    pub headers: HashMap<String, String>,
}

impl Message {
    pub fn new(from: AgentAddress, to: AgentAddress, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            from,
            to,
            payload: payload.into(),
            headers: HashMap::new(),
        }
    }

    /// Build a reply addressed back to the sender, preserving the thread.
    pub fn reply(&self, payload: impl Into<Vec<u8>>) -> Self {
        let mut reply = Message::new(self.to.clone(), self.from.clone(), payload);
        if let Some(thread) = self.thread_id() {
            reply
                .headers
                .insert(keys::THREAD_ID.to_string(), thread.to_string());
        }
        reply
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_thread(self, thread_id: impl Into<String>) -> Self {
        self.with_header(keys::THREAD_ID, thread_id)
    }

    pub fn with_performative(self, performative: impl Into<String>) -> Self {
        self.with_header(keys::PERFORMATIVE, performative)
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.headers.get(keys::THREAD_ID).map(String::as_str)
    }

    pub fn performative(&self) -> Option<&str> {
        self.headers.get(keys::PERFORMATIVE).map(String::as_str)
    }

    pub fn origin_system(&self) -> Option<&str> {
        self.headers.get(keys::ORIGIN_SYSTEM).map(String::as_str)
    }

    /// Payload as text, if it is valid UTF-8.
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    /// Encode into a JSON frame for an external transport.
    pub fn to_frame(&self) -> Result<Vec<u8>> {
        let (payload, payload_b64) = match std::str::from_utf8(&self.payload) {
            Ok(text) => (Some(text.to_string()), None),
            Err(_) => (None, Some(BASE64.encode(&self.payload))),
        };
        let frame = WireFrame {
            from: self.from.to_string(),
            to: self.to.to_string(),
            payload,
            payload_b64,
            headers: self.headers.clone(),
        };
        Ok(serde_json::to_vec(&frame)?)
    }

    /// Decode a JSON frame.
    ///
    /// Structural problems give `Decode`; well-formed frames carrying an
    /// invalid address give `MalformedAddress` so callers can count them apart.
    pub fn from_frame(data: &[u8]) -> Result<Self> {
        let frame: WireFrame =
            serde_json::from_slice(data).map_err(|e| BridgeError::Decode(e.to_string()))?;
        let payload = match (frame.payload, frame.payload_b64) {
            (Some(_), Some(_)) => {
                return Err(BridgeError::Decode(
                    "frame carries both payload and payload_b64".into(),
                ))
            }
            (Some(text), None) => text.into_bytes(),
            (None, Some(b64)) => BASE64
                .decode(b64.as_bytes())
                .map_err(|e| BridgeError::Decode(format!("payload_b64: {e}")))?,
            (None, None) => Vec::new(),
        };
        Ok(Self {
            from: AgentAddress::parse(&frame.from)?,
            to: AgentAddress::parse(&frame.to)?,
            payload,
            headers: frame.headers,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFrame {
    from: String,
    to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload_b64: Option<String>,
    #[serde(default)]
    headers: HashMap<String, String>,
}
