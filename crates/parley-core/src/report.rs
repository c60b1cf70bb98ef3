//! Report generation interface (external collaborator).
//!
//! After a session ends, the transcript can be handed to a [`ReportGenerator`]
//! to produce a scored [`Report`]. The relay itself never builds transcripts —
//! it forwards opaque frames — so this is a downstream call made by whatever
//! owns the session lifecycle. Field names serialize in camelCase to match
//! the report consumers.

use crate::error::RelayResult;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Who spoke a transcript line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Ai,
    User,
}

/// One line of the interview transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
    pub timestamp_seconds: f64,
}

/// A full session transcript in chronological order.
pub type Transcript = Vec<TranscriptEntry>;

/// Overall verdict on the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Pass,
    Borderline,
    Fail,
}

/// Report header fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportMetadata {
    pub verdict: Verdict,
    /// 0–100.
    pub overall_score: u8,
    pub duration_seconds: u64,
    /// 0–100.
    pub confidence_index: u8,
}

/// Per-category scores, each 0–100.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryScores {
    pub overall: u8,
    pub technical: u8,
    pub communication: u8,
    pub behavioral: u8,
    pub efficiency: u8,
}

/// Recruiter-style narrative summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutiveSummary {
    pub narrative: String,
    pub strengths: Vec<String>,
    pub risks: Vec<String>,
    pub hiring_inclination: String,
}

/// A scored session report. Opaque to the relay; stored and retrieved as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: String,
    pub session_id: String,
    pub generated_at: String,
    pub metadata: ReportMetadata,
    pub scores: CategoryScores,
    pub summary: ExecutiveSummary,
}

/// Turns a transcript into a scored report.
///
/// Implementations typically call out to an external model; the relay treats
/// both the call and the resulting document as opaque.
#[allow(async_fn_in_trait)]
pub trait ReportGenerator {
    /// Generate a report for a finished session.
    async fn generate(&self, session_id: &str, transcript: &[TranscriptEntry])
        -> RelayResult<Report>;
}

/// Generate a report for a finished session and store it under its
/// session ID. The generator call is opaque; its failure is the caller's to
/// surface — nothing is retried here.
pub async fn finalize_session<G, S>(
    generator: &G,
    store: &S,
    session_id: &str,
    transcript: &[TranscriptEntry],
) -> RelayResult<()>
where
    G: ReportGenerator,
    S: crate::store::ReportStore,
{
    let report = generator.generate(session_id, transcript).await?;
    store.put(session_id, report).await?;
    info!(session_id, lines = transcript.len(), "session report stored");
    Ok(())
}
