//! gazecast - real-time gaze sharing between eye-tracking participants.
//!
//! Each participant runs an agent that captures gaze from an eye tracker,
//! conditions it into a stable point-or-fixation stream, and publishes it to
//! a relay. The relay fans samples out to the other participants, whose
//! agents draw them as on-screen pointers.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          gazecast agent                          │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  tracker thread                       UI thread                  │
//! │  ┌─────────────┐   ┌─────────────┐    ┌──────────────┐           │
//! │  │ EyeTracker  │──▶│ GazeParser  │───▶│ Orchestrator │──▶ render │
//! │  │  (device)   │   │ + Fixation  │ q  │  (machine)   │           │
//! │  └─────────────┘   └─────────────┘ u  └──────────────┘           │
//! │                                    e     │      ▲                │
//! │  network runtime                   u     ▼      │                │
//! │  ┌──────────────────────────────┐  e  send()  LinkEvent          │
//! │  │      DistributionClient      │◀─────┘      │                  │
//! │  │   (NDJSON over TCP, tokio)   │─────────────┘                  │
//! │  └──────────────────────────────┘                                │
//! └────────────────│─────────────────────────────────────────────────┘
//!                  ▼
//!            relay (net::relay) ──▶ other participants
//! ```
//!
//! # Example
//!
//! ```no_run
//! use gazecast::{assemble, Config, EyeTracker, SimulatedTracker, SimulatorConfig, UserCommand};
//! use std::sync::Arc;
//!
//! let config = Config::load().unwrap_or_default();
//! let tracker: Arc<dyn EyeTracker> = Arc::new(SimulatedTracker::new(SimulatorConfig::default()));
//! let (mut orchestrator, queue) = assemble(&config, tracker).expect("Failed to build agent");
//!
//! queue.command(UserCommand::Connect);
//! orchestrator.run();
//! ```

pub mod config;
pub mod core;
pub mod device;
pub mod net;
pub mod orchestrator;
pub mod stats;

// Re-export key types at crate root for convenience
pub use config::{Config, ConfigError};
pub use core::{FilterConfig, FilteredPoint, FixationFilter, GazeParser, ParserControl, RawSample};
pub use device::{DeviceError, DeviceEvent, EyeTracker, SimulatedTracker, SimulatorConfig};
pub use net::{
    ClientRole, ConnectionId, DistributionClient, GazeEvent, GazeLink, LinkConfig, LinkError,
    LinkEvent, Location,
};
pub use orchestrator::{
    assemble, next_action, AppEvent, EventQueue, Flow, NextAction, Orchestrator, Status,
    TrackingState, UserCommand,
};
pub use stats::{SessionStats, SharedSessionStats};

#[cfg(feature = "relay")]
pub use net::RelayConfig;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
