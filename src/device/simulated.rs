//! Simulated eye tracker.
//!
//! Produces a synthetic gaze trace (fixations on a fixed set of targets joined
//! by short saccades, with sub-threshold jitter) on a background thread. Used
//! by the binary when no hardware driver is wired in, and by tests.

use crate::device::types::{
    DeviceError, DeviceEvent, DeviceListener, DeviceReadiness, DeviceSample, EyeTracker,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Relative screen positions visited by the synthetic trace.
const TARGETS: [(f64, f64); 5] = [(0.5, 0.5), (0.2, 0.25), (0.8, 0.3), (0.7, 0.75), (0.25, 0.7)];

/// Samples spent moving between two targets.
const SACCADE_SAMPLES: u64 = 3;

/// Jitter amplitude in screen units.
const JITTER: f64 = 4.0;

/// Configuration for the simulated tracker.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Samples per second
    pub rate_hz: u32,
    pub width: f64,
    pub height: f64,
    /// Samples spent on each target, saccade included
    pub fixation_samples: u64,
    /// Whether the device starts out calibrated
    pub calibrated: bool,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            rate_hz: 60,
            width: 1920.0,
            height: 1080.0,
            fixation_samples: 90,
            calibrated: true,
        }
    }
}

impl SimulatorConfig {
    /// Gaze position of the `n`-th sample of the trace.
    pub fn trace_point(&self, n: u64) -> (f64, f64) {
        let per_target = self.fixation_samples.max(SACCADE_SAMPLES + 1);
        let index = (n / per_target) as usize;
        let offset = n % per_target;

        let to = self.target(index);
        let (x, y) = if offset < SACCADE_SAMPLES && index > 0 {
            let from = self.target(index - 1);
            let progress = (offset + 1) as f64 / (SACCADE_SAMPLES + 1) as f64;
            (
                from.0 + (to.0 - from.0) * progress,
                from.1 + (to.1 - from.1) * progress,
            )
        } else {
            to
        };

        let phase = n as f64;
        (
            x + JITTER * (phase * 1.7).sin(),
            y + JITTER * (phase * 2.3).cos(),
        )
    }

    fn target(&self, index: usize) -> (f64, f64) {
        let (rx, ry) = TARGETS[index % TARGETS.len()];
        (rx * self.width, ry * self.height)
    }

    fn period(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.rate_hz.max(1)))
    }
}

struct Shared {
    listener: Mutex<Option<Box<dyn DeviceListener>>>,
    last: Mutex<Option<DeviceSample>>,
    calibrated: AtomicBool,
    active: AtomicBool,
}

impl Shared {
    fn emit(&self, event: DeviceEvent) {
        if let Ok(mut listener) = self.listener.lock() {
            if let Some(listener) = listener.as_mut() {
                listener.on_device_event(event);
            }
        }
    }
}

/// A software eye tracker.
pub struct SimulatedTracker {
    config: SimulatorConfig,
    shared: Arc<Shared>,
    /// Stop flag of the recording thread currently running, if any
    recording: Mutex<Option<Arc<AtomicBool>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl SimulatedTracker {
    pub fn new(config: SimulatorConfig) -> Self {
        let calibrated = config.calibrated;
        Self {
            config,
            shared: Arc::new(Shared {
                listener: Mutex::new(None),
                last: Mutex::new(None),
                calibrated: AtomicBool::new(calibrated),
                active: AtomicBool::new(false),
            }),
            recording: Mutex::new(None),
            handles: Mutex::new(Vec::new()),
        }
    }
}

impl EyeTracker for SimulatedTracker {
    fn device_count(&self) -> usize {
        1
    }

    fn readiness(&self) -> DeviceReadiness {
        DeviceReadiness::Connected
    }

    fn is_calibrated(&self) -> bool {
        self.shared.calibrated.load(Ordering::SeqCst)
    }

    fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    fn last_sample(&self) -> Option<DeviceSample> {
        self.shared.last.lock().ok().and_then(|last| last.clone())
    }

    fn start_tracking(&self) -> Result<(), DeviceError> {
        let mut recording = self
            .recording
            .lock()
            .map_err(|_| DeviceError::Driver("recording state poisoned".to_string()))?;
        if recording.is_some() {
            return Err(DeviceError::AlreadyRecording);
        }

        let running = Arc::new(AtomicBool::new(true));
        *recording = Some(running.clone());
        self.shared.active.store(true, Ordering::SeqCst);

        let shared = self.shared.clone();
        let config = self.config.clone();

        let handle = thread::Builder::new()
            .name("gazecast-sim".to_string())
            .spawn(move || run_trace(shared, config, running))
            .map_err(|e| DeviceError::Driver(e.to_string()))?;

        if let Ok(mut handles) = self.handles.lock() {
            handles.retain(|h| !h.is_finished());
            handles.push(handle);
        }

        info!(rate_hz = self.config.rate_hz, "Simulated tracker recording");
        Ok(())
    }

    fn stop_tracking(&self) {
        // The recording thread reports RecordingStopped on its own once it
        // notices the flag; joining here could wait on a full event queue.
        if let Ok(mut recording) = self.recording.lock() {
            if let Some(running) = recording.take() {
                running.store(false, Ordering::SeqCst);
                self.shared.active.store(false, Ordering::SeqCst);
            }
        }
    }

    fn calibrate(&self) -> Result<(), DeviceError> {
        if self.is_active() {
            return Err(DeviceError::AlreadyRecording);
        }
        self.shared.calibrated.store(true, Ordering::SeqCst);
        self.shared.emit(DeviceEvent::Calibrated);
        Ok(())
    }

    fn show_options(&self) {
        info!(
            width = self.config.width,
            height = self.config.height,
            rate_hz = self.config.rate_hz,
            "Simulated tracker has no options dialog"
        );
    }

    fn subscribe(&self, listener: Box<dyn DeviceListener>) {
        match self.shared.listener.lock() {
            Ok(mut slot) => *slot = Some(listener),
            Err(_) => warn!("Tracker listener slot poisoned; subscription ignored"),
        }
    }
}

impl Drop for SimulatedTracker {
    fn drop(&mut self) {
        self.stop_tracking();
        let handles: Vec<JoinHandle<()>> = match self.handles.lock() {
            Ok(mut handles) => handles.drain(..).collect(),
            Err(_) => return,
        };

        // The last owner can be a listener running on a recording thread.
        // That thread cannot join itself, and an older thread may be waiting
        // on the listener it is inside; leave them all to finish on their own.
        let current = thread::current().id();
        if handles.iter().any(|h| h.thread().id() == current) {
            debug!("Tracker dropped on its recording thread; not joining");
            return;
        }
        for handle in handles {
            let _ = handle.join();
        }
    }
}

fn run_trace(shared: Arc<Shared>, config: SimulatorConfig, running: Arc<AtomicBool>) {
    shared.emit(DeviceEvent::RecordingStarted);

    let period = config.period();
    let period_us = period.as_micros() as u64;
    let mut n = 0u64;

    while running.load(Ordering::SeqCst) {
        let (x, y) = config.trace_point(n);
        if let Ok(mut last) = shared.last.lock() {
            *last = Some(DeviceSample::single(n * period_us, x, y));
        }
        shared.emit(DeviceEvent::SampleReady);

        n += 1;
        thread::sleep(period);
    }

    debug!(samples = n, "Simulated trace finished");
    shared.emit(DeviceEvent::RecordingStopped);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    struct ChannelListener(mpsc::Sender<DeviceEvent>);

    impl DeviceListener for ChannelListener {
        fn on_device_event(&mut self, event: DeviceEvent) {
            let _ = self.0.send(event);
        }
    }

    fn fast_config() -> SimulatorConfig {
        SimulatorConfig {
            rate_hz: 500,
            fixation_samples: 20,
            ..SimulatorConfig::default()
        }
    }

    #[test]
    fn test_trace_fixates_on_targets() {
        let config = fast_config();

        // Well inside the first fixation every point is near the screen centre.
        for n in 0..20 {
            let (x, y) = config.trace_point(n);
            assert!((x - 960.0).abs() <= JITTER);
            assert!((y - 540.0).abs() <= JITTER);
        }

        // After the saccade the trace sits on the second target.
        let (x, y) = config.trace_point(30);
        assert!((x - 0.2 * 1920.0).abs() <= JITTER);
        assert!((y - 0.25 * 1080.0).abs() <= JITTER);
    }

    #[test]
    fn test_recording_lifecycle() {
        let tracker = SimulatedTracker::new(fast_config());
        let (tx, rx) = mpsc::channel();
        tracker.subscribe(Box::new(ChannelListener(tx)));

        assert!(!tracker.is_active());
        tracker.start_tracking().unwrap();
        assert!(tracker.is_active());
        assert!(matches!(
            tracker.start_tracking(),
            Err(DeviceError::AlreadyRecording)
        ));

        let timeout = Duration::from_secs(2);
        assert_eq!(rx.recv_timeout(timeout).unwrap(), DeviceEvent::RecordingStarted);
        assert_eq!(rx.recv_timeout(timeout).unwrap(), DeviceEvent::SampleReady);
        assert!(tracker.last_sample().unwrap().primary().is_some());

        tracker.stop_tracking();
        assert!(!tracker.is_active());

        let stopped = rx
            .iter()
            .take_while(|e| *e != DeviceEvent::RecordingStopped)
            .all(|e| e == DeviceEvent::SampleReady);
        assert!(stopped);
    }

    #[test]
    fn test_calibrate_requires_idle_device() {
        let tracker = SimulatedTracker::new(SimulatorConfig {
            calibrated: false,
            ..fast_config()
        });
        assert!(!tracker.is_calibrated());

        tracker.calibrate().unwrap();
        assert!(tracker.is_calibrated());

        tracker.start_tracking().unwrap();
        assert!(tracker.calibrate().is_err());
        tracker.stop_tracking();
    }

    /// Releases the last strong reference from inside the listener.
    struct OwningListener {
        tracker: Arc<Mutex<Option<Arc<SimulatedTracker>>>>,
        release: Arc<AtomicBool>,
        done: mpsc::Sender<()>,
    }

    impl DeviceListener for OwningListener {
        fn on_device_event(&mut self, event: DeviceEvent) {
            if event != DeviceEvent::SampleReady || !self.release.load(Ordering::SeqCst) {
                return;
            }
            let last = self.tracker.lock().unwrap().take();
            if let Some(tracker) = last {
                drop(tracker);
                let _ = self.done.send(());
            }
        }
    }

    #[test]
    fn test_drop_on_recording_thread_does_not_join_itself() {
        let tracker = Arc::new(SimulatedTracker::new(fast_config()));
        let slot = Arc::new(Mutex::new(Some(tracker.clone())));
        let release = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = mpsc::channel();
        tracker.subscribe(Box::new(OwningListener {
            tracker: slot,
            release: release.clone(),
            done: done_tx,
        }));

        tracker.start_tracking().unwrap();
        drop(tracker);
        release.store(true, Ordering::SeqCst);

        // A self-join would panic the recording thread before it reports.
        done_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("tracker drop did not complete on its own thread");
    }
}
