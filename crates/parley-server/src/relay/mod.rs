//! Per-session relay: frame buffer, upstream connector, and the session
//! state machine.

pub mod buffer;
pub mod session;
pub mod upstream;

pub use buffer::FrameBuffer;
pub use session::SessionRelay;

use parley_core::CloseStatus;
use std::time::Duration;
use tracing::info;

/// What a session looked like once it closed. Handed to the [`SessionHook`]
/// after all resources are released.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub session_id: String,
    pub status: CloseStatus,
    /// Frames relayed client → upstream (buffered frames included).
    pub frames_to_upstream: u64,
    /// Frames relayed upstream → client.
    pub frames_to_client: u64,
    pub duration: Duration,
}

/// Downstream call made after a session ends — the seam where report
/// generation or bookkeeping attaches. The relay does not depend on what
/// implementations do with the summary.
pub trait SessionHook: Send + Sync {
    fn on_session_closed(&self, summary: &SessionSummary);
}

/// Default hook: logs the summary.
pub struct LogHook;

impl SessionHook for LogHook {
    fn on_session_closed(&self, summary: &SessionSummary) {
        info!(
            session_id = %summary.session_id,
            status = ?summary.status,
            frames_to_upstream = summary.frames_to_upstream,
            frames_to_client = summary.frames_to_client,
            duration_ms = summary.duration.as_millis() as u64,
            "session closed"
        );
    }
}
