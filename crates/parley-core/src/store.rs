//! Report storage interface, with a transient in-memory implementation.
//!
//! The storage backend is swappable: memory, disk, or database all satisfy
//! this trait without touching the relay. An unknown session ID is a miss
//! (`None`), never a sample-data fallback — callers decide how to surface it.

use crate::error::RelayResult;
use crate::report::Report;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Keyed storage for finished-session reports.
#[allow(async_fn_in_trait)]
pub trait ReportStore {
    /// Store the report for a session, replacing any previous one.
    async fn put(&self, session_id: &str, report: Report) -> RelayResult<()>;

    /// Fetch the report for a session, or `None` if no report exists.
    async fn get(&self, session_id: &str) -> RelayResult<Option<Report>>;
}

/// Reports keyed by session ID, held in process memory.
#[derive(Default)]
pub struct MemoryReportStore {
    reports: Arc<RwLock<HashMap<String, Report>>>,
}

impl MemoryReportStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored reports.
    pub async fn count(&self) -> usize {
        self.reports.read().await.len()
    }
}

impl ReportStore for MemoryReportStore {
    async fn put(&self, session_id: &str, report: Report) -> RelayResult<()> {
        let mut reports = self.reports.write().await;
        reports.insert(session_id.to_string(), report);
        debug!(session_id, "report stored");
        Ok(())
    }

    async fn get(&self, session_id: &str) -> RelayResult<Option<Report>> {
        let reports = self.reports.read().await;
        Ok(reports.get(session_id).cloned())
    }
}
