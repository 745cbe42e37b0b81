//! Pipeline statistics for gazecast.

pub mod session;

// Re-export commonly used types
pub use session::{
    SessionLog, SessionRecord, SessionStats, SharedSessionStats, MAX_LOGGED_SESSIONS,
};
