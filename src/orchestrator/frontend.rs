//! UI-side collaborators of the orchestrator.
//!
//! Both traits are only ever called on the orchestrator's own thread.

use crate::net::{ConnectionId, Location};
use crate::orchestrator::state::Status;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Draws remote participants' gaze pointers. Never read back by the core.
pub trait PointerRenderer {
    fn move_pointer(&mut self, sender: &ConnectionId, location: Location);

    fn set_visible(&mut self, visible: bool);

    /// The participant left; its pointer can go.
    fn remove_pointer(&mut self, sender: &ConnectionId);
}

/// Menu, tray tooltip and similar status displays.
pub trait StatusObserver {
    fn refresh(&mut self, status: &Status);

    /// One-shot message for the user.
    fn notice(&mut self, message: &str);

    /// Idle/active indicator.
    fn set_idle(&mut self, idle: bool);
}

/// Renderer for headless runs: logs pointer traffic.
#[derive(Debug, Default)]
pub struct LogRenderer {
    visible: bool,
    known: HashSet<ConnectionId>,
}

impl LogRenderer {
    pub fn new() -> Self {
        Self {
            visible: true,
            known: HashSet::new(),
        }
    }
}

impl PointerRenderer for LogRenderer {
    fn move_pointer(&mut self, sender: &ConnectionId, location: Location) {
        if self.known.insert(sender.clone()) {
            info!(peer = %sender, "Remote gaze pointer appeared");
        }
        if self.visible {
            debug!(peer = %sender, x = location.x, y = location.y, "Remote gaze");
        }
    }

    fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    fn remove_pointer(&mut self, sender: &ConnectionId) {
        if self.known.remove(sender) {
            info!(peer = %sender, "Remote gaze pointer removed");
        }
    }
}

/// Observer for headless runs: logs status changes and notices.
#[derive(Debug, Default)]
pub struct LogObserver {
    last: Option<Status>,
}

impl StatusObserver for LogObserver {
    fn refresh(&mut self, status: &Status) {
        if self.last.as_ref() != Some(status) {
            info!("Status: {status}");
            self.last = Some(*status);
        }
    }

    fn notice(&mut self, message: &str) {
        warn!("{message}");
    }

    fn set_idle(&mut self, idle: bool) {
        debug!(idle, "Capture indicator");
    }
}
