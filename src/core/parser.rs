//! Gaze parser: drives a [`FixationFilter`] from the tracker's sample callback.
//!
//! The parser lives on the device context. The UI context starts and stops it
//! through a [`ParserControl`] handle. Steady-state `feed` only reads atomics;
//! the config slot is locked once, when a new session is first seen.

use crate::core::fixation::{FilterConfig, FilteredPoint, FixationFilter, RawSample};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Receiver of filtered gaze points.
///
/// Invoked synchronously on the thread that called [`GazeParser::feed`].
pub trait GazeSink: Send {
    fn on_gaze_point(&mut self, point: FilteredPoint);
}

impl<F> GazeSink for F
where
    F: FnMut(FilteredPoint) + Send,
{
    fn on_gaze_point(&mut self, point: FilteredPoint) {
        self(point)
    }
}

#[derive(Debug, Default)]
struct ControlState {
    active: AtomicBool,
    /// Bumped on every start; the parser resets its filter when it changes.
    session: AtomicU64,
    /// Constants for the next session, if they change.
    next_config: Mutex<Option<FilterConfig>>,
}

/// Cloneable start/stop handle for a [`GazeParser`].
#[derive(Debug, Clone, Default)]
pub struct ParserControl {
    state: Arc<ControlState>,
}

impl ParserControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a new capture session.
    pub fn start(&self) {
        // The session must be visible before `active`, otherwise a concurrent
        // feed could run one sample through the previous session's filter.
        self.state.session.fetch_add(1, Ordering::SeqCst);
        self.state.active.store(true, Ordering::SeqCst);
    }

    /// Begin a new capture session with new filter constants.
    ///
    /// The parser rebuilds its filter before the first sample of the session.
    pub fn start_with(&self, config: FilterConfig) {
        if let Ok(mut slot) = self.state.next_config.lock() {
            *slot = Some(config);
        }
        self.start();
    }

    /// End the current session. A sample already being fed completes normally.
    pub fn stop(&self) {
        self.state.active.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.state.active.load(Ordering::SeqCst)
    }

    fn session(&self) -> u64 {
        self.state.session.load(Ordering::SeqCst)
    }

    fn take_config(&self) -> Option<FilterConfig> {
        self.state.next_config.lock().ok().and_then(|mut slot| slot.take())
    }
}

/// Turns raw tracker samples into a stream of filtered gaze points.
pub struct GazeParser<S: GazeSink> {
    filter: FixationFilter,
    control: ParserControl,
    seen_session: u64,
    sink: S,
}

impl<S: GazeSink> GazeParser<S> {
    /// Create an inactive parser.
    pub fn new(config: FilterConfig, sink: S) -> Self {
        Self::with_control(config, sink, ParserControl::new())
    }

    /// Constants of the current session's filter.
    pub fn config(&self) -> &FilterConfig {
        self.filter.config()
    }

    /// Create an inactive parser driven by an existing control handle.
    pub fn with_control(config: FilterConfig, sink: S, control: ParserControl) -> Self {
        Self {
            filter: FixationFilter::new(config),
            seen_session: control.session(),
            control,
            sink,
        }
    }

    /// Handle for starting and stopping this parser from another thread.
    pub fn control(&self) -> ParserControl {
        self.control.clone()
    }

    /// Reset the filter and start accepting samples.
    pub fn start(&mut self) {
        self.control.start();
        self.sync_session();
    }

    /// Stop accepting samples.
    pub fn stop(&self) {
        self.control.stop();
    }

    pub fn is_active(&self) -> bool {
        self.control.is_active()
    }

    /// Feed one raw sample.
    ///
    /// No-op while inactive. Returns whether a gaze point was emitted.
    pub fn feed(&mut self, timestamp: u64, x: f64, y: f64) -> bool {
        if !self.control.is_active() {
            return false;
        }
        self.sync_session();

        match self.filter.process(RawSample::new(timestamp, x, y)) {
            Some(point) => {
                self.sink.on_gaze_point(point);
                true
            }
            None => false,
        }
    }

    fn sync_session(&mut self) {
        let session = self.control.session();
        if session != self.seen_session {
            match self.control.take_config() {
                Some(config) => self.filter = FixationFilter::new(config),
                None => self.filter.reset(),
            }
            self.seen_session = session;
        }
    }
}
