//! Signal conditioning for gazecast.
//!
//! This module contains:
//! - The two-level fixation filter
//! - The gaze parser that drives it from tracker samples

pub mod fixation;
pub mod parser;

// Re-export commonly used types
pub use fixation::{FilterConfig, FilteredPoint, FixationFilter, RawSample};
pub use parser::{GazeParser, GazeSink, ParserControl};
