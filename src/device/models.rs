use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::DataPoints;
use crate::session::{StatusMap, TransportError};

pub const MIN_SPEED: u8 = 1;
pub const MAX_SPEED: u8 = 6;

/// Upper bound (inclusive) of each raw slider band, with the level it snaps
/// to and the device speed it selects
const SPEED_BANDS: [(u8, u8, u8); 6] = [
    (19, 10, 1),
    (39, 30, 2),
    (59, 50, 3),
    (79, 70, 4),
    (94, 90, 5),
    (100, 100, 6),
];

/// Last known state of the fan
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceState {
    pub power: bool,
    pub speed: u8,
    pub reversed: bool,
    pub light_on: bool,
    /// False until the first successful read and after any failed one
    pub valid: bool,
    /// Bumped on every successful read
    pub version: u64,
    pub last_updated: Option<DateTime<Utc>>,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            power: false,
            speed: MIN_SPEED,
            reversed: false,
            light_on: false,
            valid: false,
            version: 0,
            last_updated: None,
        }
    }
}

impl DeviceState {
    /// Fold a status read into a new valid snapshot.
    ///
    /// Attributes missing from `status` keep their previous value; present
    /// but malformed ones reject the whole read.
    pub fn refreshed(&self, status: &StatusMap, data_points: &DataPoints) -> Result<Self, TransportError> {
        let mut next = self.clone();

        if let Some(value) = status.get(&data_points.power) {
            next.power = decode_bool(value)
                .ok_or_else(|| malformed(&data_points.power, value))?;
        }
        if let Some(value) = status.get(&data_points.speed) {
            next.speed = decode_speed(value)
                .ok_or_else(|| malformed(&data_points.speed, value))?;
        }
        if let Some(value) = status.get(&data_points.direction) {
            next.reversed = decode_reversed(value)
                .ok_or_else(|| malformed(&data_points.direction, value))?;
        }
        if let Some(value) = status.get(&data_points.light) {
            next.light_on = decode_bool(value)
                .ok_or_else(|| malformed(&data_points.light, value))?;
        }

        next.valid = true;
        next.version = self.version + 1;
        next.last_updated = Some(Utc::now());
        Ok(next)
    }

    /// Same values, flagged as stale
    pub fn invalidated(&self) -> Self {
        Self {
            valid: false,
            ..self.clone()
        }
    }

    pub fn active(&self) -> Active {
        if self.power {
            Active::Active
        } else {
            Active::Inactive
        }
    }

    pub fn rotation_speed(&self) -> u8 {
        speed_to_level(self.speed)
    }

    pub fn rotation_direction(&self) -> RotationDirection {
        if self.reversed {
            RotationDirection::Clockwise
        } else {
            RotationDirection::CounterClockwise
        }
    }

    pub fn light_on(&self) -> bool {
        self.light_on
    }
}

fn malformed(id: &str, value: &Value) -> TransportError {
    TransportError::Protocol(format!("unexpected value {} for data point {}", value, id))
}

fn decode_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_u64()? {
            0 => Some(false),
            1 => Some(true),
            _ => None,
        },
        _ => None,
    }
}

fn decode_speed(value: &Value) -> Option<u8> {
    let speed = match value {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    u8::try_from(speed)
        .ok()
        .filter(|s| (MIN_SPEED..=MAX_SPEED).contains(s))
}

fn decode_reversed(value: &Value) -> Option<bool> {
    match value {
        Value::String(s) => match s.to_lowercase().as_str() {
            "forward" => Some(false),
            "reverse" => Some(true),
            _ => None,
        },
        Value::Bool(b) => Some(*b),
        _ => None,
    }
}

/// Control-surface power state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Active {
    Inactive = 0,
    Active = 1,
}

impl Active {
    pub fn is_active(self) -> bool {
        matches!(self, Active::Active)
    }
}

impl From<bool> for Active {
    fn from(on: bool) -> Self {
        if on {
            Active::Active
        } else {
            Active::Inactive
        }
    }
}

/// Control-surface rotation direction. Counter-clockwise pushes air down
/// (summer), clockwise pulls it up (winter).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RotationDirection {
    Clockwise = 0,
    CounterClockwise = 1,
}

impl RotationDirection {
    pub fn is_reversed(self) -> bool {
        matches!(self, RotationDirection::Clockwise)
    }
}

/// A slider value snapped onto one of the six device speeds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeedStep {
    /// The slider position the control surface should display
    pub level: u8,
    /// The device speed to command
    pub speed: u8,
}

/// Snap a raw 0-100 slider value onto a speed step. Zero means "off" and
/// yields no step; values above 100 are treated as 100.
pub fn quantize_speed(raw: u8) -> Option<SpeedStep> {
    if raw == 0 {
        return None;
    }
    let raw = raw.min(100);
    SPEED_BANDS
        .iter()
        .find(|(upper, _, _)| raw <= *upper)
        .map(|&(_, level, speed)| SpeedStep { level, speed })
}

/// Slider position for a device speed
pub fn speed_to_level(speed: u8) -> u8 {
    let speed = speed.clamp(MIN_SPEED, MAX_SPEED);
    SPEED_BANDS[usize::from(speed - 1)].1
}

/// Device attributes the bridge can change
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Attribute {
    Power,
    Speed,
    Direction,
    Light,
}

impl Attribute {
    pub fn data_point<'a>(&self, data_points: &'a DataPoints) -> &'a str {
        match self {
            Attribute::Power => &data_points.power,
            Attribute::Speed => &data_points.speed,
            Attribute::Direction => &data_points.direction,
            Attribute::Light => &data_points.light,
        }
    }
}

/// A single-attribute change to send to the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanCommand {
    Power(bool),
    Speed(u8),
    Direction(RotationDirection),
    Light(bool),
}

impl FanCommand {
    pub fn attribute(&self) -> Attribute {
        match self {
            FanCommand::Power(_) => Attribute::Power,
            FanCommand::Speed(_) => Attribute::Speed,
            FanCommand::Direction(_) => Attribute::Direction,
            FanCommand::Light(_) => Attribute::Light,
        }
    }

    /// Wire value for the command's data point
    pub fn value(&self) -> Value {
        match self {
            FanCommand::Power(on) | FanCommand::Light(on) => Value::Bool(*on),
            FanCommand::Speed(speed) => Value::from((*speed).clamp(MIN_SPEED, MAX_SPEED)),
            FanCommand::Direction(direction) => {
                Value::from(if direction.is_reversed() { "reverse" } else { "forward" })
            }
        }
    }
}

/// Notifications for the control surface
#[derive(Debug, Clone, PartialEq)]
pub enum FanEvent {
    /// The slider should snap to this level
    RotationSpeed(u8),
    /// A poll produced a fresh snapshot
    StateRefreshed(DeviceState),
    /// A poll failed and the cache is now stale
    Unreachable,
}
