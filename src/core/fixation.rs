//! Two-level low-pass fixation filter.
//!
//! Raw tracker samples are smoothed by two exponentially weighted averages:
//! a fast one (`low_time_constant`) that follows eye movement and a slow one
//! (`high_time_constant`) that settles on the fixated position. The distance
//! between them, averaged over the last `window_size` samples, decides whether
//! the eye is fixating (emit the slow average) or moving (emit the fast one).
//!
//! Time constants and the window are sample counts, not durations. The filter
//! assumes the tracker delivers samples at a roughly constant rate.

use crate::config::ConfigError;
use serde::{Deserialize, Serialize};

/// A raw gaze sample as delivered by the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    /// Device clock timestamp
    pub timestamp: u64,
    pub x: f64,
    pub y: f64,
}

impl RawSample {
    pub fn new(timestamp: u64, x: f64, y: f64) -> Self {
        Self { timestamp, x, y }
    }
}

/// A smoothed gaze point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilteredPoint {
    /// Timestamp of the raw sample that produced this point
    pub timestamp: u64,
    pub x: f64,
    pub y: f64,
    /// Whether the point belongs to a fixation (false during a transition)
    pub is_fixating: bool,
}

/// Filter constants.
///
/// Immutable once bound to a running [`FixationFilter`]; a new session picks
/// up changed values by constructing a new filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Effective window (in samples) of the fast average
    pub low_time_constant: u32,
    /// Effective window (in samples) of the slow average
    pub high_time_constant: u32,
    /// Number of samples the divergence is accumulated over
    pub window_size: u32,
    /// Divergence (in screen units) at or above which the eye is moving
    pub fixation_threshold: u32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            low_time_constant: 3,
            high_time_constant: 12,
            window_size: 6,
            fixation_threshold: 40,
        }
    }
}

impl FilterConfig {
    /// Check the constants: all strictly positive and `low <= high`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("low_time_constant", self.low_time_constant),
            ("high_time_constant", self.high_time_constant),
            ("window_size", self.window_size),
            ("fixation_threshold", self.fixation_threshold),
        ];
        for (name, value) in fields {
            if value == 0 {
                return Err(ConfigError::InvalidFilter(format!(
                    "{name} must be positive"
                )));
            }
        }

        if self.low_time_constant > self.high_time_constant {
            return Err(ConfigError::InvalidFilter(format!(
                "low_time_constant ({}) exceeds high_time_constant ({})",
                self.low_time_constant, self.high_time_constant
            )));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Average {
    x: f64,
    y: f64,
}

impl Average {
    fn seed(&mut self, x: f64, y: f64) {
        self.x = x;
        self.y = y;
    }

    fn update(&mut self, x: f64, y: f64, alpha: f64) {
        self.x += (x - self.x) * alpha;
        self.y += (y - self.y) * alpha;
    }

    fn distance_to(&self, x: f64, y: f64) -> f64 {
        (self.x - x).hypot(self.y - y)
    }
}

/// Fixed-capacity ring of the most recent divergence values.
#[derive(Debug)]
struct DivergenceWindow {
    values: Vec<f64>,
    next: usize,
    filled: usize,
}

impl DivergenceWindow {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            values: vec![0.0; capacity.max(1)],
            next: 0,
            filled: 0,
        }
    }

    fn clear(&mut self) {
        self.values.iter_mut().for_each(|v| *v = 0.0);
        self.next = 0;
        self.filled = 0;
    }

    fn push(&mut self, value: f64) {
        self.values[self.next] = value;
        self.next = (self.next + 1) % self.values.len();
        self.filled = (self.filled + 1).min(self.values.len());
    }

    fn mean(&self) -> f64 {
        if self.filled == 0 {
            return 0.0;
        }
        // Slots past `filled` are still zero, so summing everything is exact.
        self.values.iter().sum::<f64>() / self.filled as f64
    }
}

/// Converts raw samples into fixation-classified points.
#[derive(Debug)]
pub struct FixationFilter {
    config: FilterConfig,
    fast_alpha: f64,
    slow_alpha: f64,
    fast: Average,
    slow: Average,
    divergence: DivergenceWindow,
    /// Samples seen since the last reset
    seen: u64,
    /// A step was seen and no point has reported it yet.
    transition_pending: bool,
}

impl FixationFilter {
    /// Create a filter bound to `config`.
    ///
    /// The config is expected to be valid; see [`FilterConfig::validate`].
    /// Zero constants are clamped to one so a filter can never divide by zero.
    pub fn new(config: FilterConfig) -> Self {
        let low = config.low_time_constant.max(1);
        let high = config.high_time_constant.max(low);
        let window = config.window_size.max(1) as usize;

        Self {
            fast_alpha: 1.0 / f64::from(low),
            slow_alpha: 1.0 / f64::from(high),
            fast: Average::default(),
            slow: Average::default(),
            divergence: DivergenceWindow::with_capacity(window),
            seen: 0,
            transition_pending: false,
            config,
        }
    }

    /// The constants this filter was built with.
    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Clear all accumulated state. Called at the start of every session.
    pub fn reset(&mut self) {
        self.fast = Average::default();
        self.slow = Average::default();
        self.divergence.clear();
        self.seen = 0;
        self.transition_pending = false;
    }

    /// Whether enough samples have been seen to emit points.
    pub fn is_warmed_up(&self) -> bool {
        self.seen > self.divergence.values.len() as u64
    }

    /// Consume one raw sample.
    ///
    /// Returns `None` for the first `window_size` samples after a reset.
    pub fn process(&mut self, sample: RawSample) -> Option<FilteredPoint> {
        let RawSample { timestamp, x, y } = sample;
        let threshold = f64::from(self.config.fixation_threshold);

        self.seen = self.seen.saturating_add(1);

        let jumped = if self.seen == 1 {
            self.fast.seed(x, y);
            self.slow.seed(x, y);
            false
        } else {
            let jump = self.slow.distance_to(x, y);
            self.fast.update(x, y, self.fast_alpha);
            self.slow.update(x, y, self.slow_alpha);
            jump >= threshold
        };

        self.divergence
            .push(self.fast.distance_to(self.slow.x, self.slow.y));

        if jumped {
            // Settle the next fixation on the new target instead of dragging
            // the old position along.
            self.slow = self.fast;
            self.transition_pending = true;
        }

        if !self.is_warmed_up() {
            return None;
        }

        let is_fixating = !self.transition_pending && self.divergence.mean() < threshold;
        self.transition_pending = false;
        let point = if is_fixating { self.slow } else { self.fast };

        Some(FilteredPoint {
            timestamp,
            x: point.x,
            y: point.y,
            is_fixating,
        })
    }
}
