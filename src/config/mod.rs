pub mod settings;

pub use settings::{ConfigError, DataPoints, FanConfig};
