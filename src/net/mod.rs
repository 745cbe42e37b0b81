//! Network layer for gazecast.
//!
//! This module contains:
//! - The newline-delimited JSON wire protocol
//! - The distribution client each participant runs
//! - The relay that fans samples out between participants

pub mod client;
pub mod protocol;

#[cfg(feature = "relay")]
pub mod relay;

// Re-export commonly used types
pub use client::{
    DistributionClient, GazeLink, LinkConfig, LinkError, LinkEvent, LinkNotifier,
    DEFAULT_RELAY_PORT,
};
pub use protocol::{
    ClientMessage, ClientRole, ConnectionId, Frame, GazeEvent, LineCodec, Location, RelayMessage,
    MAX_LINE_BYTES,
};

#[cfg(feature = "relay")]
pub use relay::RelayConfig;
