// Weft Bridge
// Routes agent messages between the internal bus and named external systems

pub mod config;
pub mod exposure;
pub mod router;
pub mod sink;
pub mod source;
pub mod transport;

pub use config::{BridgeSection, InternalBusConfig, MessagingConfig, WeftConfig};
pub use exposure::ExposureGate;
pub use router::Bridge;
pub use sink::{MessageSink, SinkRegistry};
pub use source::{FrameStream, InboundFrame, MessageSource, Nack, NackSender};
pub use transport::{
    MemoryExchange, MemoryTransport, TcpTransport, TransportFactory, TransportRecord,
    TransportRegistry,
};

pub use weft_core::{BridgeError, Result};
