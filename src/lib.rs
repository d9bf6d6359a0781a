pub mod accessory;
pub mod config;
pub mod device;
pub mod session;

pub use accessory::{FanAccessory, HapResult, HapStatusError};
pub use config::FanConfig;
pub use device::{DeviceError, DeviceState, FanDevice};
