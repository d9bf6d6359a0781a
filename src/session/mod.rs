pub mod lock;
pub mod timeout;
pub mod transport;
pub mod simulated;

pub use lock::{ExclusiveLock, LockGuard};
pub use timeout::with_timeout;
pub use transport::{Connection, FanTransport, TransportFactory};
pub use simulated::{SimulatedConnection, SimulatedFan};

use std::collections::HashMap;

/// Raw attribute map returned by a status read, keyed by data point id
pub type StatusMap = HashMap<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Device already has an active session")]
    SessionBusy,

    #[error("Not connected")]
    Disconnected,

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;
