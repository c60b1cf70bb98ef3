//! parley-core: Shared library for the parley session relay.
//!
//! Provides the relay error type, the opaque frame and close-status model,
//! and the external collaborator interfaces (report generation and report
//! storage) with their serde data types.

pub mod error;
pub mod frame;
pub mod report;
pub mod store;

// Re-export commonly used items at crate root.
pub use error::{RelayError, RelayResult};
pub use frame::{CloseStatus, Frame};
pub use report::{finalize_session, Report, ReportGenerator, Transcript, TranscriptEntry};
pub use store::{MemoryReportStore, ReportStore};
