use std::sync::Arc;

use crate::device::{Active, DeviceError, FanDevice, RotationDirection};

/// Status reported back to the control surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HapStatusError {
    #[error("Service communication failure")]
    CommunicationFailure,

    #[error("Characteristic not supported")]
    NotSupported,
}

impl From<DeviceError> for HapStatusError {
    fn from(error: DeviceError) -> Self {
        match error {
            DeviceError::NotSupported(_) => HapStatusError::NotSupported,
            DeviceError::Timeout(_) | DeviceError::TransportFailure(_) | DeviceError::Unresponsive => {
                HapStatusError::CommunicationFailure
            }
        }
    }
}

pub type HapResult<T> = std::result::Result<T, HapStatusError>;

/// Characteristic handlers for the fan and light services.
///
/// Getters answer synchronously from the cache; setters finish once the
/// device has accepted the change (or, for rotation speed, once the input is
/// queued). Every device problem reaches the control surface as
/// "not responding".
#[derive(Clone)]
pub struct FanAccessory {
    device: Arc<FanDevice>,
}

impl FanAccessory {
    pub fn new(device: Arc<FanDevice>) -> Self {
        Self { device }
    }

    pub fn device(&self) -> &Arc<FanDevice> {
        &self.device
    }

    pub fn has_light(&self) -> bool {
        self.device.config().has_light
    }

    pub fn get_active(&self) -> HapResult<Active> {
        self.device.get_power().map_err(|e| self.report("get Active", e))
    }

    pub async fn set_active(&self, value: Active) -> HapResult<()> {
        self.device
            .set_power(value.is_active())
            .await
            .map_err(|e| self.report("set Active", e))
    }

    pub fn get_rotation_speed(&self) -> HapResult<u8> {
        self.device
            .get_speed()
            .map_err(|e| self.report("get RotationSpeed", e))
    }

    pub async fn set_rotation_speed(&self, value: u8) -> HapResult<()> {
        self.device
            .set_speed(value)
            .await
            .map_err(|e| self.report("set RotationSpeed", e))
    }

    pub fn get_rotation_direction(&self) -> HapResult<RotationDirection> {
        self.device
            .get_direction()
            .map_err(|e| self.report("get RotationDirection", e))
    }

    pub async fn set_rotation_direction(&self, value: RotationDirection) -> HapResult<()> {
        self.device
            .set_direction(value)
            .await
            .map_err(|e| self.report("set RotationDirection", e))
    }

    pub fn get_light_on(&self) -> HapResult<bool> {
        self.device.get_light().map_err(|e| self.report("get On", e))
    }

    pub async fn set_light_on(&self, value: bool) -> HapResult<()> {
        self.device
            .set_light(value)
            .await
            .map_err(|e| self.report("set On", e))
    }

    fn report(&self, characteristic: &str, error: DeviceError) -> HapStatusError {
        log::debug!("[{}] {} failed: {}", self.device.config().name, characteristic, error);
        error.into()
    }
}
