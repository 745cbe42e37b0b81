//! Eye-tracker collaborator for gazecast.
//!
//! The physical driver is external. This module defines the surface the core
//! consumes and ships a simulated tracker for development and tests.

pub mod simulated;
pub mod types;

// Re-export commonly used types
pub use simulated::{SimulatedTracker, SimulatorConfig};
pub use types::{
    DeviceError, DeviceEvent, DeviceListener, DeviceReadiness, DeviceSample, EyeTracker,
};
