//! Eye-tracker collaborator interface.
//!
//! The driver itself is external; the core only sees this narrow surface of
//! readiness flags, a last-sample accessor, capture commands and a listener
//! hook for notifications.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Device readiness as reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceReadiness {
    NotReady,
    Disconnected,
    Connected,
    Calibrating,
}

impl DeviceReadiness {
    /// Map the driver's numeric readiness level (0..=3).
    pub fn from_level(level: u8) -> Self {
        match level {
            1 => DeviceReadiness::Disconnected,
            2 => DeviceReadiness::Connected,
            3 => DeviceReadiness::Calibrating,
            _ => DeviceReadiness::NotReady,
        }
    }

    pub fn level(self) -> u8 {
        match self {
            DeviceReadiness::NotReady => 0,
            DeviceReadiness::Disconnected => 1,
            DeviceReadiness::Connected => 2,
            DeviceReadiness::Calibrating => 3,
        }
    }
}

/// One sample as held by the driver.
///
/// Trackers may report several points per sample (one per eye or per
/// subject); the core uses the first one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSample {
    pub timestamp: u64,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

impl DeviceSample {
    /// A sample with a single point.
    pub fn single(timestamp: u64, x: f64, y: f64) -> Self {
        Self {
            timestamp,
            x: vec![x],
            y: vec![y],
        }
    }

    /// The primary point of the sample, if any.
    pub fn primary(&self) -> Option<(f64, f64)> {
        match (self.x.first(), self.y.first()) {
            (Some(&x), Some(&y)) => Some((x, y)),
            _ => None,
        }
    }
}

/// Notifications raised by the tracker, on the tracker's own thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    RecordingStarted,
    RecordingStopped,
    Calibrated,
    /// A new sample can be read through [`EyeTracker::last_sample`]
    SampleReady,
}

/// Callback target for tracker notifications.
pub trait DeviceListener: Send {
    fn on_device_event(&mut self, event: DeviceEvent);
}

/// Errors reported by tracker commands.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("No eye tracker is available")]
    NotAvailable,
    #[error("Eye tracker is already recording")]
    AlreadyRecording,
    #[error("Eye tracker is busy calibrating")]
    Calibrating,
    #[error("Eye tracker failure: {0}")]
    Driver(String),
}

/// The eye-tracker driver as seen by the core.
///
/// All methods take `&self`: the tracker is shared between the UI context
/// (commands, state queries) and its own sampling thread.
pub trait EyeTracker: Send + Sync {
    /// Number of attached devices.
    fn device_count(&self) -> usize;

    fn readiness(&self) -> DeviceReadiness;

    fn is_calibrated(&self) -> bool;

    /// Whether the device is currently recording.
    fn is_active(&self) -> bool;

    /// Most recent sample. May block briefly while the driver copies it out.
    fn last_sample(&self) -> Option<DeviceSample>;

    fn start_tracking(&self) -> Result<(), DeviceError>;

    fn stop_tracking(&self);

    fn calibrate(&self) -> Result<(), DeviceError>;

    /// Open the driver's own options UI.
    fn show_options(&self);

    /// Register the listener for tracker notifications, replacing any previous one.
    fn subscribe(&self, listener: Box<dyn DeviceListener>);
}
