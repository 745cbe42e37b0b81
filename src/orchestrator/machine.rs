//! The orchestration state machine.
//!
//! Starts and stops local capture and the relay link in response to link
//! notifications, tracker notifications and user commands. Runs entirely on
//! the thread that drains the event queue.
//!
//! Local capture is active exactly when the role includes Source, the link is
//! connected and no teardown is in progress.

use crate::config::ConfigError;
use crate::core::{FilterConfig, FilteredPoint, ParserControl};
use crate::device::{DeviceError, DeviceEvent, EyeTracker};
use crate::net::{ConnectionId, GazeEvent, GazeLink, LinkEvent, Location};
use crate::orchestrator::events::{AppEvent, UserCommand};
use crate::orchestrator::frontend::{LogObserver, LogRenderer, PointerRenderer, StatusObserver};
use crate::orchestrator::state::{next_action, NextAction, Status, TrackingState};
use crate::stats::SharedSessionStats;
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Whether the event loop should keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Composes the tracker, the parser and the link.
pub struct Orchestrator<L: GazeLink> {
    tracker: Arc<dyn EyeTracker>,
    link: L,
    parser: ParserControl,
    renderer: Box<dyn PointerRenderer>,
    observer: Box<dyn StatusObserver>,
    events: Receiver<AppEvent>,
    stats: Option<SharedSessionStats>,
    /// Filter constants for the next capture session.
    next_filter: Option<FilterConfig>,
    /// Exit was requested while capture was running; waiting for the tracker
    /// to report that recording stopped.
    exit_requested: bool,
    /// `Closed` notifications still owed for sessions we stopped.
    closes_requested: u32,
    /// A handshake completed since the last `Closed`.
    link_up: bool,
}

impl<L: GazeLink> Orchestrator<L> {
    /// Create an orchestrator with logging frontends.
    ///
    /// `parser` controls the parser fed on the tracker's thread; `events` is
    /// the consumer end of the queue every background context reports into.
    pub fn new(
        tracker: Arc<dyn EyeTracker>,
        link: L,
        parser: ParserControl,
        events: Receiver<AppEvent>,
    ) -> Self {
        Self {
            tracker,
            link,
            parser,
            renderer: Box::new(LogRenderer::new()),
            observer: Box::new(LogObserver::default()),
            events,
            stats: None,
            next_filter: None,
            exit_requested: false,
            closes_requested: 0,
            link_up: false,
        }
    }

    pub fn with_renderer(mut self, renderer: Box<dyn PointerRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_observer(mut self, observer: Box<dyn StatusObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_stats(mut self, stats: SharedSessionStats) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    /// Mutable access to the link, for reconfiguring it between sessions.
    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn tracker(&self) -> &Arc<dyn EyeTracker> {
        &self.tracker
    }

    pub fn stats(&self) -> Option<&SharedSessionStats> {
        self.stats.as_ref()
    }

    pub fn tracking_state(&self) -> TrackingState {
        TrackingState::derive(self.tracker.as_ref())
    }

    /// Whether local gaze is currently captured and published.
    pub fn is_capturing(&self) -> bool {
        self.parser.is_active() && self.tracker.is_active()
    }

    /// Replace the fixation filter constants.
    ///
    /// Only allowed while capture is stopped; the next capture session starts
    /// with a filter built from `filter`.
    pub fn set_filter(&mut self, filter: FilterConfig) -> Result<(), ConfigError> {
        if self.is_capturing() || self.parser.is_active() {
            return Err(ConfigError::CaptureActive);
        }
        filter.validate()?;
        self.next_filter = Some(filter);
        Ok(())
    }

    pub fn status(&self) -> Status {
        Status {
            tracking: self.tracking_state(),
            connected: self.link.is_connected(),
            role: self.link.role(),
            capturing: self.is_capturing(),
        }
    }

    /// React to one event.
    pub fn handle(&mut self, event: AppEvent) -> Flow {
        match event {
            AppEvent::Link(LinkEvent::Connected { id }) => self.on_connected(&id),
            AppEvent::Link(LinkEvent::Closed) => self.on_closed(),
            AppEvent::Link(LinkEvent::SampleReceived { from, location }) => {
                self.on_sample_received(&from, location)
            }
            AppEvent::Link(LinkEvent::PeerLeft { id }) => self.renderer.remove_pointer(&id),
            AppEvent::Device(event) => return self.on_device_event(event),
            AppEvent::GazePoint(point) => self.on_gaze_point(point),
            AppEvent::Command(command) => self.on_command(command),
            AppEvent::ExitRequested => return self.on_exit_requested(),
        }
        Flow::Continue
    }

    /// Handle every queued event without blocking.
    pub fn pump(&mut self) -> Flow {
        loop {
            match self.events.try_recv() {
                Ok(event) => {
                    if self.handle(event) == Flow::Exit {
                        return Flow::Exit;
                    }
                }
                Err(TryRecvError::Empty) => return Flow::Continue,
                Err(TryRecvError::Disconnected) => return Flow::Exit,
            }
        }
    }

    /// Wait up to `wait` for one event and handle it.
    ///
    /// Returns `None` if nothing arrived in time.
    pub fn step(&mut self, wait: Duration) -> Option<Flow> {
        match self.events.recv_timeout(wait) {
            Ok(event) => Some(self.handle(event)),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Flow::Exit),
        }
    }

    /// Handle events until exit, then tear the link down.
    pub fn run(&mut self) {
        self.refresh();
        while let Ok(event) = self.events.recv() {
            if self.handle(event) == Flow::Exit {
                break;
            }
        }
        self.shutdown();
    }

    /// Stop capture and the link.
    pub fn shutdown(&mut self) {
        self.stop_capture();
        self.stop_link();
        info!("Orchestrator stopped");
    }

    fn on_connected(&mut self, id: &ConnectionId) {
        self.link_up = true;
        let role = self.link.role();
        info!(%id, %role, "Relay link up");

        if role.includes_sink() {
            self.renderer.set_visible(true);
        }

        if role.includes_source() && !self.exit_requested {
            self.start_capture();
        }
        self.refresh();
    }

    fn on_closed(&mut self) {
        let role = self.link.role();
        if role.includes_source() && (self.tracker.is_active() || self.parser.is_active()) {
            self.stop_capture();
        }
        self.renderer.set_visible(false);

        let requested = self.closes_requested > 0;
        self.closes_requested = self.closes_requested.saturating_sub(1);
        if !requested && !self.exit_requested {
            let message = if self.link_up {
                "Connection to relay lost"
            } else {
                "Could not connect to relay"
            };
            self.observer.notice(message);
        }

        self.link_up = false;
        self.refresh();
    }

    fn on_sample_received(&mut self, from: &ConnectionId, location: Location) {
        self.renderer.move_pointer(from, location);
    }

    fn on_gaze_point(&mut self, point: FilteredPoint) {
        // Points already queued when capture stopped are stale.
        if !self.parser.is_active() {
            return;
        }
        self.link.send(GazeEvent::new(point.x, point.y));
    }

    fn on_device_event(&mut self, event: DeviceEvent) -> Flow {
        match event {
            DeviceEvent::RecordingStarted => {
                self.observer.set_idle(false);
            }
            DeviceEvent::RecordingStopped => {
                // The tracker may stop on its own; keep the parser in step.
                // A late notice from a previous recording must not stop a new one.
                if !self.tracker.is_active() {
                    self.parser.stop();
                }
                self.observer.set_idle(!self.tracker.is_active());
                if self.exit_requested {
                    info!("Recording stopped; exiting");
                    return Flow::Exit;
                }
            }
            DeviceEvent::Calibrated => info!("Eye tracker calibrated"),
            DeviceEvent::SampleReady => {
                debug!("Sample notification reached the orchestrator; ignoring");
                return Flow::Continue;
            }
        }
        self.refresh();
        Flow::Continue
    }

    fn on_command(&mut self, command: UserCommand) {
        match command {
            UserCommand::Advance => {
                let state = self.tracking_state();
                let source = self.link.role().includes_source();
                match next_action(state, source, self.link.is_connected()) {
                    Some(NextAction::ShowOptions) => self.on_command(UserCommand::ShowOptions),
                    Some(NextAction::Calibrate) => self.on_command(UserCommand::Calibrate),
                    Some(NextAction::Connect) => self.on_command(UserCommand::Connect),
                    Some(NextAction::Disconnect) => self.on_command(UserCommand::Disconnect),
                    None => debug!(%state, "Nothing to advance to"),
                }
            }
            UserCommand::Connect => self.link.start(),
            UserCommand::Disconnect => {
                self.stop_capture();
                self.stop_link();
            }
            UserCommand::Calibrate => {
                if let Err(e) = self.tracker.calibrate() {
                    self.observer.notice(&format!("Calibration failed: {e}"));
                }
            }
            UserCommand::ShowOptions => self.tracker.show_options(),
        }
        self.refresh();
    }

    fn on_exit_requested(&mut self) -> Flow {
        if self.tracker.is_active() {
            info!("Exit requested while recording; waiting for the tracker to stop");
            self.exit_requested = true;
            self.stop_capture();
            return Flow::Continue;
        }
        Flow::Exit
    }

    fn start_capture(&mut self) {
        let state = self.tracking_state();
        if !state.can_capture() {
            self.observer.notice(&format!("Not sharing gaze: {state}"));
            return;
        }

        match self.next_filter.take() {
            Some(filter) => self.parser.start_with(filter),
            None => self.parser.start(),
        }
        match self.tracker.start_tracking() {
            Ok(()) => info!("Capture started"),
            Err(DeviceError::AlreadyRecording) => debug!("Tracker was already recording"),
            Err(e) => {
                self.parser.stop();
                warn!("Failed to start capture: {e}");
                self.observer.notice(&format!("Could not start eye tracking: {e}"));
            }
        }
    }

    fn stop_capture(&mut self) {
        if self.tracker.is_active() {
            self.tracker.stop_tracking();
            info!("Capture stopped");
        }
        self.parser.stop();
    }

    fn stop_link(&mut self) {
        if self.link.is_busy() {
            self.closes_requested += 1;
        }
        self.link.stop();
    }

    fn refresh(&mut self) {
        let status = self.status();
        self.observer.refresh(&status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceListener, DeviceReadiness, DeviceSample};
    use crate::net::ClientRole;
    use crate::orchestrator::events::EventQueue;
    use std::cell::{Cell, RefCell};
    use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockTracker {
        ready: AtomicU8,
        active: AtomicBool,
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    impl MockTracker {
        fn ready() -> Arc<Self> {
            let tracker = Self::default();
            tracker.ready.store(2, Ordering::SeqCst);
            Arc::new(tracker)
        }
    }

    impl EyeTracker for MockTracker {
        fn device_count(&self) -> usize {
            1
        }
        fn readiness(&self) -> DeviceReadiness {
            DeviceReadiness::from_level(self.ready.load(Ordering::SeqCst))
        }
        fn is_calibrated(&self) -> bool {
            true
        }
        fn is_active(&self) -> bool {
            self.active.load(Ordering::SeqCst)
        }
        fn last_sample(&self) -> Option<DeviceSample> {
            None
        }
        fn start_tracking(&self) -> Result<(), DeviceError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.active.store(true, Ordering::SeqCst);
            Ok(())
        }
        fn stop_tracking(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.active.store(false, Ordering::SeqCst);
        }
        fn calibrate(&self) -> Result<(), DeviceError> {
            Ok(())
        }
        fn show_options(&self) {}
        fn subscribe(&self, _listener: Box<dyn DeviceListener>) {}
    }

    struct FakeLink {
        role: ClientRole,
        connected: Cell<bool>,
        starts: usize,
        sent: RefCell<Vec<GazeEvent>>,
    }

    impl FakeLink {
        fn new(role: ClientRole) -> Self {
            Self {
                role,
                connected: Cell::new(false),
                starts: 0,
                sent: RefCell::new(Vec::new()),
            }
        }
    }

    impl GazeLink for FakeLink {
        fn role(&self) -> ClientRole {
            self.role
        }
        fn start(&mut self) {
            self.starts += 1;
            self.connected.set(true);
        }
        fn stop(&mut self) {
            self.connected.set(false);
        }
        fn send(&self, event: GazeEvent) {
            if self.connected.get() {
                self.sent.borrow_mut().push(event);
            }
        }
        fn is_connected(&self) -> bool {
            self.connected.get()
        }
        fn is_busy(&self) -> bool {
            self.connected.get()
        }
    }

    #[derive(Clone, Default)]
    struct Recorder {
        moves: Arc<Mutex<Vec<(ConnectionId, Location)>>>,
        removed: Arc<Mutex<Vec<ConnectionId>>>,
        notices: Arc<Mutex<Vec<String>>>,
    }

    impl PointerRenderer for Recorder {
        fn move_pointer(&mut self, sender: &ConnectionId, location: Location) {
            self.moves.lock().unwrap().push((sender.clone(), location));
        }
        fn set_visible(&mut self, _visible: bool) {}
        fn remove_pointer(&mut self, sender: &ConnectionId) {
            self.removed.lock().unwrap().push(sender.clone());
        }
    }

    impl StatusObserver for Recorder {
        fn refresh(&mut self, _status: &Status) {}
        fn notice(&mut self, message: &str) {
            self.notices.lock().unwrap().push(message.to_string());
        }
        fn set_idle(&mut self, _idle: bool) {}
    }

    fn orchestrator(
        role: ClientRole,
        tracker: Arc<MockTracker>,
    ) -> (Orchestrator<FakeLink>, EventQueue, Recorder) {
        let (queue, rx) = EventQueue::new();
        let recorder = Recorder::default();
        let orch = Orchestrator::new(tracker, FakeLink::new(role), ParserControl::new(), rx)
            .with_renderer(Box::new(recorder.clone()))
            .with_observer(Box::new(recorder.clone()));
        (orch, queue, recorder)
    }

    fn connected() -> AppEvent {
        AppEvent::Link(LinkEvent::Connected {
            id: ConnectionId::new("self"),
        })
    }

    fn closed() -> AppEvent {
        AppEvent::Link(LinkEvent::Closed)
    }

    fn point(x: f64, y: f64) -> AppEvent {
        AppEvent::GazePoint(FilteredPoint {
            timestamp: 0,
            x,
            y,
            is_fixating: true,
        })
    }

    #[test]
    fn test_capture_follows_role_and_connection() {
        for role in [ClientRole::SOURCE, ClientRole::SINK, ClientRole::BOTH] {
            let tracker = MockTracker::ready();
            let (mut orch, _queue, _) = orchestrator(role, tracker.clone());
            let expect = role.includes_source();

            assert!(!orch.is_capturing());

            orch.handle(AppEvent::Command(UserCommand::Connect));
            orch.handle(connected());
            assert_eq!(orch.is_capturing(), expect, "{role} after connected");
            assert_eq!(tracker.is_active(), expect);

            // Relay dropped us.
            orch.link_mut().stop();
            orch.handle(closed());
            assert!(!orch.is_capturing(), "{role} after closed");
            assert!(!tracker.is_active());

            orch.handle(AppEvent::Command(UserCommand::Connect));
            orch.handle(connected());
            assert_eq!(orch.is_capturing(), expect, "{role} after reconnect");

            // Capture stops as soon as the disconnect is requested.
            orch.handle(AppEvent::Command(UserCommand::Disconnect));
            assert!(!orch.is_capturing(), "{role} during teardown");
            orch.handle(closed());
            assert!(!orch.is_capturing());
            assert!(!tracker.is_active());
        }
    }

    #[test]
    fn test_sink_renders_remote_gaze_without_capturing() {
        let tracker = MockTracker::ready();
        let (mut orch, _queue, recorder) = orchestrator(ClientRole::SINK, tracker.clone());

        orch.handle(AppEvent::Command(UserCommand::Connect));
        orch.handle(connected());
        orch.handle(AppEvent::Link(LinkEvent::SampleReceived {
            from: ConnectionId::new("B"),
            location: Location::new(120.5, 340.2),
        }));

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 0);
        let moves = recorder.moves.lock().unwrap();
        assert_eq!(
            *moves,
            vec![(ConnectionId::new("B"), Location::new(120.5, 340.2))]
        );
    }

    #[test]
    fn test_exit_waits_for_recording_to_stop() {
        let tracker = MockTracker::ready();
        let (mut orch, _queue, _) = orchestrator(ClientRole::SOURCE, tracker.clone());

        orch.handle(AppEvent::Command(UserCommand::Connect));
        orch.handle(connected());
        assert!(tracker.is_active());

        assert_eq!(orch.handle(AppEvent::ExitRequested), Flow::Continue);
        assert_eq!(tracker.stops.load(Ordering::SeqCst), 1);
        assert!(!orch.is_capturing());

        // Events before the tracker reports back do not restart capture.
        orch.handle(connected());
        assert!(!tracker.is_active());

        assert_eq!(
            orch.handle(AppEvent::Device(DeviceEvent::RecordingStopped)),
            Flow::Exit
        );
    }

    #[test]
    fn test_exit_is_immediate_when_idle() {
        let (mut orch, _queue, _) = orchestrator(ClientRole::SOURCE, MockTracker::ready());
        assert_eq!(orch.handle(AppEvent::ExitRequested), Flow::Exit);
    }

    #[test]
    fn test_gaze_points_are_sent_only_while_capturing() {
        let (mut orch, _queue, _) = orchestrator(ClientRole::SOURCE, MockTracker::ready());

        orch.handle(point(1.0, 2.0));
        orch.handle(AppEvent::Command(UserCommand::Connect));
        orch.handle(connected());
        orch.handle(point(3.0, 4.0));
        orch.handle(AppEvent::Command(UserCommand::Disconnect));
        orch.handle(point(5.0, 6.0));

        let sent = orch.link().sent.borrow();
        assert_eq!(*sent, vec![GazeEvent::new(3.0, 4.0)]);
    }

    #[test]
    fn test_unrequested_close_raises_notice() {
        let (mut orch, _queue, recorder) = orchestrator(ClientRole::BOTH, MockTracker::ready());

        orch.handle(AppEvent::Command(UserCommand::Connect));
        orch.handle(connected());
        orch.handle(closed());

        orch.handle(AppEvent::Command(UserCommand::Connect));
        orch.handle(connected());
        orch.handle(AppEvent::Command(UserCommand::Disconnect));
        orch.handle(closed());

        let notices = recorder.notices.lock().unwrap();
        assert_eq!(*notices, vec!["Connection to relay lost".to_string()]);
    }

    #[test]
    fn test_tracker_not_ready_skips_capture() {
        let tracker = Arc::new(MockTracker::default());
        tracker.ready.store(1, Ordering::SeqCst);
        let (mut orch, _queue, recorder) = orchestrator(ClientRole::SOURCE, tracker.clone());

        orch.handle(AppEvent::Command(UserCommand::Connect));
        orch.handle(connected());

        assert!(!orch.is_capturing());
        assert_eq!(tracker.starts.load(Ordering::SeqCst), 0);
        assert_eq!(recorder.notices.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_advance_toggles_the_link() {
        let (mut orch, _queue, _) = orchestrator(ClientRole::SOURCE, MockTracker::ready());

        orch.handle(AppEvent::Command(UserCommand::Advance));
        assert_eq!(orch.link().starts, 1);
        assert!(orch.link().is_connected());

        orch.handle(AppEvent::Command(UserCommand::Advance));
        assert!(!orch.link().is_connected());
    }

    #[test]
    fn test_peer_left_removes_pointer() {
        let (mut orch, _queue, recorder) = orchestrator(ClientRole::SINK, MockTracker::ready());
        orch.handle(AppEvent::Link(LinkEvent::PeerLeft {
            id: ConnectionId::new("B"),
        }));
        assert_eq!(*recorder.removed.lock().unwrap(), vec![ConnectionId::new("B")]);
    }

    #[test]
    fn test_pump_drains_queue_until_exit() {
        let (mut orch, queue, _) = orchestrator(ClientRole::SINK, MockTracker::ready());

        queue.command(UserCommand::Connect);
        queue.push(connected());
        assert_eq!(orch.pump(), Flow::Continue);
        assert!(orch.link().is_connected());

        queue.request_exit();
        queue.command(UserCommand::Disconnect);
        assert_eq!(orch.pump(), Flow::Exit);
        // Events after the exit stay queued.
        assert_eq!(orch.step(Duration::from_millis(10)), Some(Flow::Continue));
    }

    #[test]
    fn test_late_close_of_stopped_session_is_silent() {
        let (mut orch, _queue, recorder) = orchestrator(ClientRole::BOTH, MockTracker::ready());

        orch.handle(AppEvent::Command(UserCommand::Connect));
        orch.handle(connected());
        orch.handle(AppEvent::Command(UserCommand::Disconnect));
        // Reconnect before the old session reports back.
        orch.handle(AppEvent::Command(UserCommand::Connect));
        orch.handle(closed());
        orch.handle(connected());

        assert!(recorder.notices.lock().unwrap().is_empty());
        assert!(orch.is_capturing());

        // The new session dropping on its own is still reported.
        orch.handle(closed());
        assert_eq!(
            *recorder.notices.lock().unwrap(),
            vec!["Connection to relay lost".to_string()]
        );
    }

    #[test]
    fn test_filter_changes_apply_to_next_session() {
        use crate::core::GazeParser;

        let tracker = MockTracker::ready();
        let (_queue, rx) = EventQueue::new();
        let control = ParserControl::new();
        let mut parser = GazeParser::with_control(
            FilterConfig::default(),
            |_: FilteredPoint| {},
            control.clone(),
        );
        let mut orch = Orchestrator::new(tracker, FakeLink::new(ClientRole::SOURCE), control, rx)
            .with_observer(Box::new(Recorder::default()));

        let invalid = FilterConfig {
            window_size: 0,
            ..FilterConfig::default()
        };
        assert!(matches!(
            orch.set_filter(invalid),
            Err(ConfigError::InvalidFilter(_))
        ));

        orch.handle(AppEvent::Command(UserCommand::Connect));
        orch.handle(connected());
        assert!(orch.is_capturing());

        let wider = FilterConfig {
            window_size: 10,
            ..FilterConfig::default()
        };
        assert!(matches!(
            orch.set_filter(wider.clone()),
            Err(ConfigError::CaptureActive)
        ));

        orch.handle(AppEvent::Command(UserCommand::Disconnect));
        orch.handle(closed());
        assert!(orch.set_filter(wider.clone()).is_ok());
        parser.feed(0, 1.0, 1.0);
        assert_eq!(parser.config(), &FilterConfig::default());

        orch.handle(AppEvent::Command(UserCommand::Connect));
        orch.handle(connected());
        parser.feed(1, 1.0, 1.0);
        assert_eq!(parser.config(), &wider);
    }
}
