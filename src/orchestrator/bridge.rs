//! Wiring between the tracker thread, the parser and the orchestrator.

use crate::config::Config;
use crate::core::{GazeParser, ParserControl};
use crate::device::{DeviceEvent, DeviceListener, EyeTracker};
use crate::net::{DistributionClient, LinkError};
use crate::orchestrator::events::{AppEvent, EventQueue, QueueSink};
use crate::orchestrator::machine::Orchestrator;
use crate::stats::{SessionStats, SharedSessionStats};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Tracker listener that owns the parser.
///
/// Samples are parsed right here on the tracker thread; every other
/// notification is forwarded to the orchestrator queue.
pub struct CaptureBridge {
    // Weak: the tracker owns this listener.
    tracker: Weak<dyn EyeTracker>,
    parser: GazeParser<QueueSink>,
    queue: EventQueue,
    stats: Option<SharedSessionStats>,
}

impl CaptureBridge {
    pub fn new(
        tracker: &Arc<dyn EyeTracker>,
        parser: GazeParser<QueueSink>,
        queue: EventQueue,
        stats: Option<SharedSessionStats>,
    ) -> Self {
        Self {
            tracker: Arc::downgrade(tracker),
            parser,
            queue,
            stats,
        }
    }

    fn on_sample(&mut self) {
        if !self.parser.is_active() {
            return;
        }
        let Some(tracker) = self.tracker.upgrade() else {
            return;
        };
        let Some(sample) = tracker.last_sample() else {
            debug!("Sample notification without a sample");
            return;
        };
        let Some((x, y)) = sample.primary() else {
            return;
        };

        if let Some(ref stats) = self.stats {
            stats.record_sample_fed();
        }
        self.parser.feed(sample.timestamp, x, y);
    }
}

impl DeviceListener for CaptureBridge {
    fn on_device_event(&mut self, event: DeviceEvent) {
        match event {
            DeviceEvent::SampleReady => self.on_sample(),
            other => {
                self.queue.push(AppEvent::Device(other));
            }
        }
    }
}

/// Build a ready-to-run orchestrator around `tracker`.
///
/// Creates the event queue, the session stats, the relay client
/// and the parser, and subscribes the parser to the tracker. The returned
/// queue is for injecting commands and exit requests.
pub fn assemble(
    config: &Config,
    tracker: Arc<dyn EyeTracker>,
) -> Result<(Orchestrator<DistributionClient>, EventQueue), LinkError> {
    let (queue, events) = EventQueue::new();
    let stats = SessionStats::shared();

    let link = DistributionClient::with_notifier(config.link.clone(), queue.link_notifier())?
        .with_stats(stats.clone());

    let control = ParserControl::new();
    let parser = GazeParser::with_control(
        config.filter.clone(),
        queue.gaze_sink(Some(stats.clone())),
        control.clone(),
    );
    tracker.subscribe(Box::new(CaptureBridge::new(
        &tracker,
        parser,
        queue.clone(),
        Some(stats.clone()),
    )));

    let orchestrator = Orchestrator::new(tracker, link, control, events).with_stats(stats);
    Ok((orchestrator, queue))
}
