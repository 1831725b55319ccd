// Weft Core Library
// Agent addressing, messages and the internal bus the bridge delivers into

pub mod address;
pub mod barrier;
pub mod bus;
pub mod message;
pub mod telemetry;

// Export core types
pub use address::{AgentAddress, SystemName};
pub use barrier::{BarrierState, StartupBarrier};
pub use bus::{BusStats, InternalBus, LocalBus};
pub use message::Message;
pub use telemetry::{BridgeStats, BridgeStatsSnapshot};

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Malformed address: {0}")]
    MalformedAddress(String),

    #[error("Address is not external: {0}")]
    NotExternal(String),

    #[error("Unknown external system: {0}")]
    UnknownSystem(String),

    #[error("Agent is not exposed: {0}")]
    NotExposed(String),

    #[error("Misrouted message: {0}")]
    Misrouted(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("Delivery error: {0}")]
    Delivery(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BridgeError {
    /// Short machine-readable code used in negative acknowledgments and logs.
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::MalformedAddress(_) => "MALFORMED_ADDRESS",
            BridgeError::NotExternal(_) => "NOT_EXTERNAL",
            BridgeError::UnknownSystem(_) => "UNKNOWN_SYSTEM",
            BridgeError::NotExposed(_) => "NOT_EXPOSED",
            BridgeError::Misrouted(_) => "MISROUTED",
            BridgeError::Decode(_) => "DECODE_ERROR",
            BridgeError::Publish(_) => "PUBLISH_ERROR",
            BridgeError::Delivery(_) => "DELIVERY_ERROR",
            BridgeError::Config(_) => "CONFIG_ERROR",
            BridgeError::Io(_) => "IO_ERROR",
            BridgeError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
