//! The UI-affinity event queue.
//!
//! Background contexts (tracker thread, network runtime, signal handler) never
//! touch orchestrator state directly. They push [`AppEvent`]s onto one bounded
//! queue, drained in order by whichever thread owns the orchestrator.
//!
//! Gaze traffic is perishable and may only fill half of the queue; the rest is
//! kept for lifecycle events, so a burst of samples can never make a
//! `Connected`, `Closed` or recording notification wait.

use crate::core::{FilteredPoint, GazeSink};
use crate::device::DeviceEvent;
use crate::net::{LinkEvent, LinkNotifier};
use crate::stats::SharedSessionStats;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::Arc;
use tracing::warn;

/// Queue capacity.
pub const QUEUE_CAPACITY: usize = 1024;

/// Queue depth beyond which perishable events are dropped.
const PERISHABLE_LIMIT: usize = QUEUE_CAPACITY / 2;

/// User commands (menu entries, shortcuts).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserCommand {
    /// Take the next step for the current state
    Advance,
    Connect,
    Disconnect,
    Calibrate,
    ShowOptions,
}

/// Everything the orchestrator reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    Link(LinkEvent),
    Device(DeviceEvent),
    GazePoint(FilteredPoint),
    Command(UserCommand),
    ExitRequested,
}

impl AppEvent {
    fn is_perishable(&self) -> bool {
        matches!(
            self,
            AppEvent::GazePoint(_) | AppEvent::Link(LinkEvent::SampleReceived { .. })
        )
    }
}

/// Producer side of the orchestrator queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventQueue {
    tx: Sender<AppEvent>,
}

impl EventQueue {
    /// Create the queue and its single consumer end.
    pub fn new() -> (Self, Receiver<AppEvent>) {
        let (tx, rx) = bounded(QUEUE_CAPACITY);
        (Self { tx }, rx)
    }

    /// Enqueue an event. Returns false if it was dropped.
    pub fn push(&self, event: AppEvent) -> bool {
        if event.is_perishable() {
            if self.tx.len() >= PERISHABLE_LIMIT {
                return false;
            }
            return match self.tx.try_send(event) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => false,
            };
        }

        match self.tx.send(event) {
            Ok(()) => true,
            Err(e) => {
                warn!("Orchestrator queue closed; dropping {:?}", e.into_inner());
                false
            }
        }
    }

    pub fn command(&self, command: UserCommand) -> bool {
        self.push(AppEvent::Command(command))
    }

    pub fn request_exit(&self) -> bool {
        self.push(AppEvent::ExitRequested)
    }

    /// Notifier for a [`DistributionClient`](crate::net::DistributionClient).
    pub fn link_notifier(&self) -> LinkNotifier {
        let queue = self.clone();
        Arc::new(move |event| {
            queue.push(AppEvent::Link(event));
        })
    }

    /// Gaze sink for a parser running on the tracker thread.
    pub fn gaze_sink(&self, stats: Option<SharedSessionStats>) -> QueueSink {
        QueueSink {
            queue: self.clone(),
            stats,
        }
    }
}

/// [`GazeSink`] that enqueues points for the orchestrator.
pub struct QueueSink {
    queue: EventQueue,
    stats: Option<SharedSessionStats>,
}

impl GazeSink for QueueSink {
    fn on_gaze_point(&mut self, point: FilteredPoint) {
        let queued = self.queue.push(AppEvent::GazePoint(point));
        if let Some(ref stats) = self.stats {
            stats.record_point_emitted();
            if !queued {
                stats.record_sample_dropped();
            }
        }
    }
}
