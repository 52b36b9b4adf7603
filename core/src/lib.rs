// Courier core library
// Client-side messaging facade for broker-backed systems

pub mod config;
pub mod convert;
pub mod correlation;
pub mod facade;
pub mod message;
pub mod registry;
pub mod router;
pub mod rpc;
pub mod sender;
pub mod telemetry;
pub mod transport;

// Export core types
pub use config::CourierConfig;
pub use convert::{JsonConverter, MessageConverter};
pub use correlation::CorrelationTable;
pub use facade::{Courier, SendOptions};
pub use message::{Destination, Message, MessageProperties};
pub use registry::{ConnectionHandle, ConnectionRegistry};
pub use router::ConnectionRouter;
pub use rpc::RequestReplyCoordinator;
pub use sender::{MessagePostProcessor, MessageSender};
pub use transport::{MemoryTransport, Transport, TransportStats};

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CourierError {
    /// A connection key was given but nothing is registered under it.
    /// Never silently substituted with the default connection.
    #[error("no connection registered for key: {0}")]
    UnknownConnectionKey(String),

    #[error("message conversion failed: {0}")]
    Conversion(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("no reply within {0:?}")]
    ReplyTimeout(std::time::Duration),
}

pub type Result<T> = std::result::Result<T, CourierError>;
