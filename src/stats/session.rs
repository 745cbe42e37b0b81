//! Pipeline counters for one run, and the on-disk log of past runs.
//!
//! No gaze data is kept: only how many samples went in, how many points came
//! out, and what happened to them on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Runs kept in the session log; older ones are forgotten.
pub const MAX_LOGGED_SESSIONS: usize = 100;

/// Lock-free counters for the current run, shared by every context.
#[derive(Debug)]
pub struct SessionStats {
    started: DateTime<Utc>,
    samples_fed: AtomicU64,
    points_emitted: AtomicU64,
    samples_sent: AtomicU64,
    /// Disconnected, wrong role, or a full queue
    samples_dropped: AtomicU64,
    samples_received: AtomicU64,
    connections: AtomicU64,
}

/// Thread-safe shared session stats.
pub type SharedSessionStats = Arc<SessionStats>;

impl SessionStats {
    pub fn new() -> Self {
        Self {
            started: Utc::now(),
            samples_fed: AtomicU64::new(0),
            points_emitted: AtomicU64::new(0),
            samples_sent: AtomicU64::new(0),
            samples_dropped: AtomicU64::new(0),
            samples_received: AtomicU64::new(0),
            connections: AtomicU64::new(0),
        }
    }

    pub fn shared() -> SharedSessionStats {
        Arc::new(Self::new())
    }

    pub fn record_sample_fed(&self) {
        self.samples_fed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_point_emitted(&self) {
        self.points_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sample_sent(&self) {
        self.samples_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sample_dropped(&self) {
        self.samples_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sample_received(&self) {
        self.samples_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    /// The run so far, as it would be logged.
    pub fn snapshot(&self) -> SessionRecord {
        SessionRecord {
            started: self.started,
            ended: Utc::now(),
            samples_fed: self.samples_fed.load(Ordering::Relaxed),
            points_emitted: self.points_emitted.load(Ordering::Relaxed),
            samples_sent: self.samples_sent.load(Ordering::Relaxed),
            samples_dropped: self.samples_dropped.load(Ordering::Relaxed),
            samples_received: self.samples_received.load(Ordering::Relaxed),
            connections: self.connections.load(Ordering::Relaxed),
        }
    }

    pub fn summary(&self) -> String {
        self.snapshot().to_string()
    }

    /// Append this run to the log at `path`.
    pub fn append_to(&self, path: &Path) -> io::Result<()> {
        let mut log = SessionLog::load(path)?;
        log.push(self.snapshot());
        log.save(path)
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters of one finished (or running) session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub started: DateTime<Utc>,
    pub ended: DateTime<Utc>,
    pub samples_fed: u64,
    pub points_emitted: u64,
    pub samples_sent: u64,
    pub samples_dropped: u64,
    pub samples_received: u64,
    pub connections: u64,
}

impl SessionRecord {
    pub fn duration_secs(&self) -> u64 {
        (self.ended - self.started).num_seconds().max(0) as u64
    }

    /// Share of published points that never reached the wire.
    pub fn drop_rate(&self) -> f64 {
        let published = self.samples_sent + self.samples_dropped;
        if published == 0 {
            0.0
        } else {
            self.samples_dropped as f64 / published as f64
        }
    }
}

impl std::fmt::Display for SessionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{} samples in, {} points out over {} s",
            self.samples_fed,
            self.points_emitted,
            self.duration_secs()
        )?;
        writeln!(
            f,
            "sent {} / dropped {} ({:.1}% drop rate)",
            self.samples_sent,
            self.samples_dropped,
            self.drop_rate() * 100.0
        )?;
        write!(
            f,
            "received {} remote samples across {} relay connection(s)",
            self.samples_received, self.connections
        )
    }
}

/// The most recent runs, oldest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionLog {
    pub sessions: Vec<SessionRecord>,
}

impl SessionLog {
    /// Read the log; a missing file is an empty log.
    pub fn load(path: &Path) -> io::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(io::Error::other)
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(io::Error::other)?;
        std::fs::write(path, json)
    }

    pub fn push(&mut self, record: SessionRecord) {
        self.sessions.push(record);
        let excess = self.sessions.len().saturating_sub(MAX_LOGGED_SESSIONS);
        self.sessions.drain(..excess);
    }

    pub fn last(&self) -> Option<&SessionRecord> {
        self.sessions.last()
    }

    /// Sum of every logged run, spanning the first start to the last end.
    pub fn totals(&self) -> Option<SessionRecord> {
        let first = self.sessions.first()?;
        let mut total = SessionRecord {
            samples_fed: 0,
            points_emitted: 0,
            samples_sent: 0,
            samples_dropped: 0,
            samples_received: 0,
            connections: 0,
            ..first.clone()
        };
        for record in &self.sessions {
            total.ended = total.ended.max(record.ended);
            total.samples_fed += record.samples_fed;
            total.points_emitted += record.points_emitted;
            total.samples_sent += record.samples_sent;
            total.samples_dropped += record.samples_dropped;
            total.samples_received += record.samples_received;
            total.connections += record.connections;
        }
        Some(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counting() {
        let stats = SessionStats::new();

        stats.record_sample_fed();
        stats.record_sample_fed();
        stats.record_point_emitted();
        stats.record_sample_dropped();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.samples_fed, 2);
        assert_eq!(snapshot.points_emitted, 1);
        assert_eq!(snapshot.samples_dropped, 1);
        assert_eq!(snapshot.samples_sent, 0);
    }

    #[test]
    fn test_drop_rate() {
        let stats = SessionStats::new();
        assert_eq!(stats.snapshot().drop_rate(), 0.0);

        for _ in 0..3 {
            stats.record_sample_sent();
        }
        stats.record_sample_dropped();
        assert!((stats.snapshot().drop_rate() - 0.25).abs() < 1e-12);
        assert!(stats.summary().contains("25.0% drop rate"));
    }

    #[test]
    fn test_runs_are_logged_separately() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");

        let first = SessionStats::new();
        first.record_sample_sent();
        first.record_sample_sent();
        first.append_to(&path).unwrap();

        let second = SessionStats::new();
        second.record_sample_sent();
        second.record_connection();
        assert_eq!(second.snapshot().samples_sent, 1);
        second.append_to(&path).unwrap();

        let log = SessionLog::load(&path).unwrap();
        assert_eq!(log.sessions.len(), 2);
        assert_eq!(log.last().unwrap().samples_sent, 1);

        let totals = log.totals().unwrap();
        assert_eq!(totals.samples_sent, 3);
        assert_eq!(totals.connections, 1);
    }

    #[test]
    fn test_log_keeps_most_recent_runs() {
        let mut log = SessionLog::default();
        for i in 0..(MAX_LOGGED_SESSIONS as u64 + 5) {
            let mut record = SessionStats::new().snapshot();
            record.samples_fed = i;
            log.push(record);
        }

        assert_eq!(log.sessions.len(), MAX_LOGGED_SESSIONS);
        assert_eq!(log.sessions[0].samples_fed, 5);
        assert!(SessionLog::default().totals().is_none());
    }
}
