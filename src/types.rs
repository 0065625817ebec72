use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MotionSample {
    pub timestamp: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl MotionSample {
    pub fn new(timestamp: f64, x: f64, y: f64, z: f64) -> Self {
        Self { timestamp, x, y, z }
    }

    /// User-acceleration magnitude in g (gravity already removed upstream).
    pub fn magnitude(&self) -> f64 {
        Vector3::new(self.x, self.y, self.z).norm()
    }
}

/// One processed audio buffer. Only the most recent reading is retained;
/// there is no smoothing across buffers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AudioData {
    pub timestamp: f64,
    pub average_db: f64,
    pub peak_db: f64,
    pub voice_detected: bool,
}

/// Raw positioning fix as delivered by the platform driver.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LocationFix {
    pub timestamp: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    pub speed: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LocationSnapshot {
    pub timestamp: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    pub speed: f64,
}

impl LocationSnapshot {
    pub fn from_fix(fix: &LocationFix) -> Self {
        Self {
            timestamp: fix.timestamp,
            latitude: fix.latitude,
            longitude: fix.longitude,
            accuracy: fix.accuracy,
            speed: fix.speed,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MotionPattern {
    Stationary,
    Walking,
    Running,
    Impact,
    Falling,
    Unknown,
}

/// Motion reading as it appears inside a snapshot: the most recent
/// magnitude plus the pattern the fusion engine classified from it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MotionReading {
    pub timestamp: f64,
    pub magnitude: f64,
    pub pattern: MotionPattern,
    pub fall_detected: bool,
}

/// Battery / charging state sampled alongside the sensors. Always
/// available, unlike the producer-backed readings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeviceContext {
    pub timestamp: f64,
    pub battery_level: f64,
    pub charging: bool,
}

impl DeviceContext {
    pub fn sample() -> Self {
        Self {
            timestamp: current_timestamp(),
            battery_level: 1.0,
            charging: false,
        }
    }
}

/// Point-in-time fusion of the latest motion, audio, and device readings.
/// Absent producers yield `None` fields, never an error.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SensorSnapshot {
    pub timestamp: f64,
    pub motion: Option<MotionReading>,
    pub audio: Option<AudioData>,
    pub location: Option<LocationSnapshot>,
    pub device: DeviceContext,
}

/// Ranked sound-class detection from the external classifier.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SoundDetection {
    pub label: String,
    pub confidence: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyMethod {
    Sms,
    Call,
    Push,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrustedContact {
    pub id: String,
    pub name: String,
    pub phone: String,
    pub relationship: String,
    /// 1 = first notified.
    pub priority: u8,
    pub methods: Vec<NotifyMethod>,
    pub enabled: bool,
}

pub fn current_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
