//! Core data models used throughout codescout.
//!
//! These types represent the jobs, files, chunks, and progress events that
//! flow through the ingestion pipeline and out to the API layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of an [`IngestionJob`].
///
/// Transitions: `Pending → Ingesting → Completed | Failed`. Only the
/// orchestrator mutates status; the submission handler creates jobs
/// directly in `Ingesting` once pre-flight checks pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Ingesting,
    Completed,
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Ingesting => "INGESTING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// One ingestion run for one repository URL on behalf of one user.
#[derive(Debug, Clone)]
pub struct IngestionJob {
    pub id: String,
    pub name: String,
    pub url: String,
    pub user_id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
}

/// A successfully-read source file belonging to a job. Immutable once
/// created; deleted in cascade with the job.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub id: String,
    pub job_id: String,
    pub path: String,
    pub content: String,
}

/// One embeddable line-range slice of a file, with its vector.
///
/// `start_line <= end_line`, both 1-indexed and inclusive. Chunks from one
/// file may nest or overlap (a method inside a class each produce a chunk);
/// only exact duplicate ranges are deduplicated, by the chunker.
#[derive(Debug, Clone)]
pub struct CodeChunk {
    pub id: String,
    pub file_id: String,
    pub start_line: usize,
    pub end_line: usize,
    pub content: String,
    pub vector: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

/// A node in the walked source tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileNode {
    File {
        /// Path relative to the walk root.
        path: String,
        name: String,
    },
    Directory {
        path: String,
        name: String,
        children: Vec<FileNode>,
    },
}

/// Outcome of processing a single file during a batch.
///
/// A `Failed` file never aborts its batch; outcomes are tallied and
/// reported in the final progress message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    Success,
    Skipped,
    Failed,
}

/// Ephemeral status broadcast describing job progress. Never persisted and
/// never replayed to late subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub message: String,
    /// 0–100.
    pub progress: u8,
    pub eta: Option<String>,
    /// Wall-clock time of emission, `HH:MM:SS`.
    pub timestamp: String,
}

impl ProgressEvent {
    pub fn new(message: impl Into<String>, progress: u8, eta: Option<String>) -> Self {
        Self {
            message: message.into(),
            progress,
            eta,
            timestamp: chrono::Local::now().format("%H:%M:%S").to_string(),
        }
    }

    /// True for events that terminate a progress stream: the final
    /// 100% summary or an error-tagged message.
    pub fn is_terminal(&self) -> bool {
        self.progress >= 100 || self.message.contains("Error")
    }
}
