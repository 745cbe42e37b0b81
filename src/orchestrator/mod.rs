//! Orchestration: composes the tracker, the parser and the relay link.
//!
//! This module contains:
//! - Tracking states and the single-key advance policy
//! - The event queue background contexts report into
//! - The state machine that drains it
//! - The renderer and status observer seams

pub mod bridge;
pub mod events;
pub mod frontend;
pub mod machine;
pub mod state;

pub use bridge::{assemble, CaptureBridge};
pub use events::{AppEvent, EventQueue, QueueSink, UserCommand, QUEUE_CAPACITY};
pub use frontend::{LogObserver, LogRenderer, PointerRenderer, StatusObserver};
pub use machine::{Flow, Orchestrator};
pub use state::{next_action, NextAction, Status, TrackingState};
