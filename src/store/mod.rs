//! Storage abstraction for codescout.
//!
//! The [`Store`] trait covers every persistence operation the ingestion
//! pipeline and its sibling retrieval feature need, keeping the storage
//! engine pluggable. Rows are append-only during a job: files and chunks
//! are created once and never mutated; only the job's status transitions.
//!
//! Implementations must be `Send + Sync` to be shared across the
//! orchestrator task and the HTTP handlers.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{CodeChunk, FileRecord, IngestionJob, JobStatus};

/// A chunk ranked by vector similarity, for the retrieval consumer.
#[derive(Debug, Clone)]
pub struct SimilarChunk {
    pub chunk_id: String,
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub content: String,
    /// Cosine similarity against the query vector.
    pub score: f64,
}

/// Abstract storage backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`create_job`](Store::create_job) | Insert a new ingestion job |
/// | [`get_job`](Store::get_job) | Fetch a job by id |
/// | [`find_job_by_user_and_url`](Store::find_job_by_user_and_url) | Idempotency lookup |
/// | [`update_job_status`](Store::update_job_status) | Lifecycle transition |
/// | [`create_file_record`](Store::create_file_record) | Persist one source file |
/// | [`create_code_chunk`](Store::create_code_chunk) | Persist one embedded chunk |
/// | [`top_k_similar_chunks`](Store::top_k_similar_chunks) | Nearest-neighbor ranking |
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_job(&self, job: &IngestionJob) -> Result<()>;

    async fn get_job(&self, id: &str) -> Result<Option<IngestionJob>>;

    /// Look up an existing job for the same `(user, url)` pair. Used by
    /// the submission handler to avoid duplicate runs.
    async fn find_job_by_user_and_url(&self, user_id: &str, url: &str)
        -> Result<Option<IngestionJob>>;

    async fn update_job_status(&self, id: &str, status: JobStatus) -> Result<()>;

    async fn create_file_record(&self, file: &FileRecord) -> Result<()>;

    async fn create_code_chunk(&self, chunk: &CodeChunk) -> Result<()>;

    /// Rank a job's chunks by cosine similarity to `query`, best first.
    async fn top_k_similar_chunks(
        &self,
        job_id: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<SimilarChunk>>;
}
