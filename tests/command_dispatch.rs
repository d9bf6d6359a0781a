mod common;

use std::time::Duration;

use common::{idle_device, test_config};
use fanbridge_lib::device::{PollOutcome, RotationDirection};
use fanbridge_lib::session::TransportError;
use fanbridge_lib::DeviceError;
use serde_json::json;
use tokio::time::{sleep, Instant};

#[tokio::test(start_paused = true)]
async fn set_power_writes_the_power_data_point() {
    let (fan, device) = idle_device(test_config());

    device.set_power(true).await.expect("power on");

    let stats = fan.stats();
    assert_eq!(stats.writes, vec![("1".to_string(), json!(true))]);
    assert_eq!(fan.value("1"), Some(json!(true)));
    assert!(!fan.session_open());
    assert!(!device.session_busy());
}

#[tokio::test(start_paused = true)]
async fn commands_leave_the_cache_to_the_poller() {
    let (fan, device) = idle_device(test_config());

    device
        .set_direction(RotationDirection::Clockwise)
        .await
        .expect("direction");
    assert_eq!(fan.value("4"), Some(json!("reverse")));
    assert!(!device.state().valid);

    device.refresh().await;
    assert_eq!(device.get_direction(), Ok(RotationDirection::Clockwise));
}

#[tokio::test(start_paused = true)]
async fn rejected_write_is_reported() {
    let (fan, device) = idle_device(test_config());
    fan.fail_writes(1);

    let result = device.set_light(true).await;
    assert!(matches!(
        result,
        Err(DeviceError::TransportFailure(TransportError::Rejected(_)))
    ));
    assert_eq!(fan.value("9"), Some(json!(false)));
    assert!(!device.session_busy());

    device.set_light(true).await.expect("second attempt");
    assert_eq!(fan.value("9"), Some(json!(true)));
}

#[tokio::test(start_paused = true)]
async fn command_waits_for_the_poll_in_progress() {
    let (fan, device) = idle_device(test_config());
    fan.set_read_latency(Duration::from_millis(300));

    device.request_refresh();
    sleep(Duration::from_millis(10)).await;
    assert!(device.session_busy());

    let started = Instant::now();
    device.set_power(true).await.expect("power on");
    assert!(started.elapsed() >= Duration::from_millis(290));

    let stats = fan.stats();
    assert_eq!(stats.reads, 1);
    assert_eq!(stats.writes.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn queued_commands_go_out_in_call_order() {
    let (fan, device) = idle_device(test_config());
    fan.set_read_latency(Duration::from_millis(300));
    device.request_refresh();
    sleep(Duration::from_millis(10)).await;

    let mut tasks = Vec::new();
    for command in 0..3 {
        let device = device.clone();
        tasks.push(tokio::spawn(async move {
            match command {
                0 => device.set_power(true).await,
                1 => device.set_direction(RotationDirection::Clockwise).await,
                _ => device.set_light(true).await,
            }
        }));
        sleep(Duration::from_millis(1)).await;
    }
    for task in tasks {
        task.await.expect("task panicked").expect("command");
    }

    let ids: Vec<String> = fan.stats().writes.into_iter().map(|(id, _)| id).collect();
    assert_eq!(ids, vec!["1", "4", "9"]);
}

#[tokio::test(start_paused = true)]
async fn slow_write_times_out() {
    let (fan, device) = idle_device(test_config());
    fan.set_write_latency(Duration::from_secs(5));

    let started = Instant::now();
    let result = device.set_power(true).await;
    assert_eq!(result, Err(DeviceError::Timeout(Duration::from_secs(2))));
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert!(started.elapsed() < Duration::from_millis(2_100));
    assert!(!device.session_busy());
    // Closed before the lock went back, so nobody is locked out of the fan
    assert!(!fan.session_open());

    // The abandoned write is never applied
    sleep(Duration::from_secs(10)).await;
    assert!(fan.stats().writes.is_empty());
    assert_eq!(fan.value("1"), Some(json!(false)));

    fan.set_write_latency(Duration::ZERO);
    assert_eq!(device.refresh().await, Some(PollOutcome::Success));
    device.set_power(true).await.expect("power on");
    assert_eq!(fan.value("1"), Some(json!(true)));
}

#[tokio::test(start_paused = true)]
async fn set_timeout_covers_the_lock_wait() {
    let mut config = test_config();
    config.read_timeout_ms = 5_000;
    let (fan, device) = idle_device(config);
    fan.set_read_latency(Duration::from_secs(4));

    device.request_refresh();
    sleep(Duration::from_millis(10)).await;
    assert!(device.session_busy());

    let started = Instant::now();
    let result = device.set_power(true).await;
    assert_eq!(result, Err(DeviceError::Timeout(Duration::from_secs(2))));
    assert!(started.elapsed() < Duration::from_millis(2_100));

    // The abandoned command gave up its place in line
    sleep(Duration::from_secs(5)).await;
    assert!(fan.stats().writes.is_empty());
    assert!(!device.session_busy());
    assert!(!fan.session_open());
    assert!(device.state().valid);
}

#[tokio::test(start_paused = true)]
async fn light_commands_need_a_light() {
    let mut config = test_config();
    config.has_light = false;
    let (fan, device) = idle_device(config);

    assert_eq!(
        device.set_light(true).await,
        Err(DeviceError::NotSupported("light"))
    );
    assert!(fan.stats().writes.is_empty());
}
