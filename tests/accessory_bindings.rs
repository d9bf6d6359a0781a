mod common;

use std::time::Duration;

use common::{accessory, settle, test_config};
use fanbridge_lib::device::{Active, RotationDirection};
use fanbridge_lib::HapStatusError;
use serde_json::json;
use tokio::time::sleep;

#[tokio::test(start_paused = true)]
async fn unread_device_reports_communication_failure() {
    let (_fan, accessory) = accessory(test_config());

    assert_eq!(accessory.get_active(), Err(HapStatusError::CommunicationFailure));
    assert_eq!(
        accessory.get_rotation_speed(),
        Err(HapStatusError::CommunicationFailure)
    );
    assert_eq!(
        accessory.get_rotation_direction(),
        Err(HapStatusError::CommunicationFailure)
    );
    assert_eq!(accessory.get_light_on(), Err(HapStatusError::CommunicationFailure));
}

#[tokio::test(start_paused = true)]
async fn getters_project_the_cached_state() {
    let (fan, accessory) = accessory(test_config());
    // Any getter kicks off the first read
    let _ = accessory.get_active();
    settle().await;

    assert_eq!(accessory.get_active(), Ok(Active::Inactive));
    assert_eq!(accessory.get_rotation_speed(), Ok(10));
    assert_eq!(
        accessory.get_rotation_direction(),
        Ok(RotationDirection::CounterClockwise)
    );
    assert_eq!(accessory.get_light_on(), Ok(false));
    settle().await;

    fan.set_value("1", json!(true));
    fan.set_value("3", json!(5));
    fan.set_value("4", json!("reverse"));
    fan.set_value("9", json!(true));

    // Still answered from the cache; the refresh lands for the next read
    assert_eq!(accessory.get_active(), Ok(Active::Inactive));
    settle().await;

    assert_eq!(accessory.get_active(), Ok(Active::Active));
    assert_eq!(accessory.get_rotation_speed(), Ok(90));
    assert_eq!(
        accessory.get_rotation_direction(),
        Ok(RotationDirection::Clockwise)
    );
    assert_eq!(accessory.get_light_on(), Ok(true));
}

#[tokio::test(start_paused = true)]
async fn speed_level_does_not_depend_on_power() {
    let (fan, accessory) = accessory(test_config());
    fan.set_value("1", json!(false));
    fan.set_value("3", json!(4));
    accessory.device().refresh().await;

    assert_eq!(accessory.get_active(), Ok(Active::Inactive));
    assert_eq!(accessory.get_rotation_speed(), Ok(70));
}

#[tokio::test(start_paused = true)]
async fn setters_reach_the_device() {
    let (fan, accessory) = accessory(test_config());

    accessory.set_active(Active::Active).await.expect("active");
    accessory
        .set_rotation_direction(RotationDirection::Clockwise)
        .await
        .expect("direction");
    accessory.set_light_on(true).await.expect("light");
    accessory.set_rotation_speed(42).await.expect("speed");
    sleep(Duration::from_secs(1)).await;

    assert_eq!(fan.value("1"), Some(json!(true)));
    assert_eq!(fan.value("4"), Some(json!("reverse")));
    assert_eq!(fan.value("9"), Some(json!(true)));
    assert_eq!(fan.value("3"), Some(json!(3)));
}

#[tokio::test(start_paused = true)]
async fn device_failures_surface_as_communication_failure() {
    let (fan, accessory) = accessory(test_config());

    fan.fail_writes(1);
    assert_eq!(
        accessory.set_active(Active::Active).await,
        Err(HapStatusError::CommunicationFailure)
    );

    fan.set_stalled(true);
    assert_eq!(
        accessory.set_light_on(true).await,
        Err(HapStatusError::CommunicationFailure)
    );
}

#[tokio::test(start_paused = true)]
async fn fan_without_light_rejects_light_characteristic() {
    let mut config = test_config();
    config.has_light = false;
    let (fan, accessory) = accessory(config);
    assert!(!accessory.has_light());

    assert_eq!(accessory.get_light_on(), Err(HapStatusError::NotSupported));
    assert_eq!(
        accessory.set_light_on(true).await,
        Err(HapStatusError::NotSupported)
    );
    assert!(fan.stats().writes.is_empty());
}
