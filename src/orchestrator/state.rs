//! Coarse tracking states and the single-key "advance" policy.

use crate::device::{DeviceReadiness, EyeTracker};
use crate::net::ClientRole;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What the tracking pipeline is doing, as shown to observers.
///
/// Always derived from the tracker's current flags, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingState {
    NotAvailable,
    Disconnected,
    Connected,
    Calibrating,
    Calibrated,
    Tracking,
}

impl TrackingState {
    /// Derive the state from device count, activity, calibration and readiness.
    pub fn from_flags(
        device_count: usize,
        active: bool,
        calibrated: bool,
        readiness: DeviceReadiness,
    ) -> Self {
        if device_count == 0 {
            return TrackingState::NotAvailable;
        }
        if active {
            return TrackingState::Tracking;
        }
        match readiness {
            DeviceReadiness::NotReady => TrackingState::NotAvailable,
            DeviceReadiness::Disconnected => TrackingState::Disconnected,
            DeviceReadiness::Calibrating => TrackingState::Calibrating,
            DeviceReadiness::Connected if calibrated => TrackingState::Calibrated,
            DeviceReadiness::Connected => TrackingState::Connected,
        }
    }

    /// Read the flags off a tracker and derive the state.
    pub fn derive(tracker: &dyn EyeTracker) -> Self {
        Self::from_flags(
            tracker.device_count(),
            tracker.is_active(),
            tracker.is_calibrated(),
            tracker.readiness(),
        )
    }

    /// Whether capture can be started in this state.
    pub fn can_capture(self) -> bool {
        matches!(
            self,
            TrackingState::Connected | TrackingState::Calibrated | TrackingState::Tracking
        )
    }
}

impl fmt::Display for TrackingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TrackingState::NotAvailable => "eye tracker not available",
            TrackingState::Disconnected => "eye tracker disconnected",
            TrackingState::Connected => "eye tracker connected",
            TrackingState::Calibrating => "calibrating",
            TrackingState::Calibrated => "calibrated",
            TrackingState::Tracking => "tracking",
        };
        f.write_str(label)
    }
}

/// The action the "advance" command takes next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    ShowOptions,
    Calibrate,
    Connect,
    Disconnect,
}

/// Pick the next step for single-key operation.
///
/// A sink-only participant never needs the tracker, so it just toggles the
/// link. A source walks device setup, then calibration, then the link.
/// Returns `None` while calibration is in progress.
pub fn next_action(
    state: TrackingState,
    requires_source: bool,
    connected: bool,
) -> Option<NextAction> {
    let toggle_link = if connected {
        NextAction::Disconnect
    } else {
        NextAction::Connect
    };

    if !requires_source {
        return Some(toggle_link);
    }

    match state {
        TrackingState::NotAvailable | TrackingState::Disconnected => Some(NextAction::ShowOptions),
        TrackingState::Connected if !connected => Some(NextAction::Calibrate),
        TrackingState::Calibrating => None,
        TrackingState::Connected | TrackingState::Calibrated | TrackingState::Tracking => {
            Some(toggle_link)
        }
    }
}

/// Snapshot shown to observers (menu, tray tooltip).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub tracking: TrackingState,
    pub connected: bool,
    pub role: ClientRole,
    /// Whether local gaze is being captured and published
    pub capturing: bool,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, {} ({})",
            self.tracking,
            if self.connected {
                "connected to relay"
            } else {
                "not connected"
            },
            self.role
        )
    }
}
