pub mod debounce;
pub mod dispatcher;
pub mod manager;
pub mod models;
pub mod poller;

pub use debounce::SpeedDebouncer;
pub use dispatcher::CommandDispatcher;
pub use manager::FanDevice;
pub use models::*;
pub use poller::{PollOutcome, PollPhase, StatusPoller};

use std::time::Duration;

use crate::session::TransportError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeviceError {
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport failure: {0}")]
    TransportFailure(#[from] TransportError),

    #[error("Device is not responding")]
    Unresponsive,

    #[error("Not supported by this device: {0}")]
    NotSupported(&'static str),
}

pub type Result<T> = std::result::Result<T, DeviceError>;
