#![allow(dead_code)]

use std::sync::Arc;

use fanbridge_lib::session::SimulatedFan;
use fanbridge_lib::{FanAccessory, FanConfig, FanDevice};

pub fn test_config() -> FanConfig {
    FanConfig {
        name: "Test Fan".to_string(),
        debounce_ms: 300,
        poll_interval_ms: 10_000,
        fast_retry_interval_ms: 1_000,
        connect_timeout_ms: 500,
        read_timeout_ms: 500,
        set_timeout_ms: 2_000,
        rebuild_threshold: 3,
        ..FanConfig::default()
    }
}

/// A device without the poll timer, so tests decide when reads happen
pub fn idle_device(config: FanConfig) -> (SimulatedFan, Arc<FanDevice>) {
    let fan = SimulatedFan::new(&config.data_points);
    let device = Arc::new(FanDevice::new(config, fan.factory()).expect("valid config"));
    (fan, device)
}

pub fn polling_device(config: FanConfig) -> (SimulatedFan, Arc<FanDevice>) {
    let fan = SimulatedFan::new(&config.data_points);
    let device = Arc::new(FanDevice::start(config, fan.factory()).expect("valid config"));
    (fan, device)
}

pub fn accessory(config: FanConfig) -> (SimulatedFan, FanAccessory) {
    let (fan, device) = idle_device(config);
    (fan, FanAccessory::new(device))
}

pub async fn wait_until_valid(device: &FanDevice) {
    let mut state = device.watch_state();
    state
        .wait_for(|state| state.valid)
        .await
        .expect("state channel closed");
}

/// Give background refreshes and debounce timers a chance to run
pub async fn settle() {
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
}
