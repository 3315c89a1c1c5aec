//! Ingestion orchestration.
//!
//! Drives the full pipeline for one job: clone the repository into a
//! job-exclusive scratch directory, walk and filter the tree, process
//! files in fixed-size batches (concurrently within a batch, sequentially
//! across batches), and finalize the job status — publishing progress to
//! the [`ProgressBus`] throughout.
//!
//! Failure isolation is layered: a chunk whose embedding fails is dropped
//! silently, a file that errors is tallied as `failed` without aborting
//! its batch, and only clone/walk/finalize errors fail the whole job.
//! The scratch directory is removed on every exit path.

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::chunker::Chunker;
use crate::config::IngestionConfig;
use crate::embedding::Embedder;
use crate::fetch::RepoFetcher;
use crate::models::{CodeChunk, FileNode, FileOutcome, FileRecord, IngestionJob, JobStatus, ProgressEvent};
use crate::probe::SizeProbe;
use crate::progress::ProgressBus;
use crate::store::Store;
use crate::walker;

/// Path substrings that exclude a file from ingestion.
pub const DENIED_PATH_SEGMENTS: &[&str] = &["node_modules", ".git", "dist", "build", "coverage"];

/// Extensions not worth embedding: binaries, images, lockfiles, styles,
/// config data.
pub const DENIED_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "svg", "ico", "lock", "map", "css", "scss", "config", "csv",
    "editorconfig", "gitignore",
];

/// Whether a repository-relative path survives ingestion filtering.
pub fn is_ingestible_path(path: &str) -> bool {
    if DENIED_PATH_SEGMENTS.iter().any(|segment| path.contains(segment)) {
        return false;
    }

    let extension = path.rsplit('.').next().unwrap_or_default().to_lowercase();
    !DENIED_EXTENSIONS.contains(&extension.as_str())
}

/// Result of a submission request.
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    /// A job for this `(user, url)` pair already exists; no new run started.
    Existing(IngestionJob),
    /// A new job was created and its background run launched.
    Started(IngestionJob),
}

impl SubmitOutcome {
    pub fn job(&self) -> &IngestionJob {
        match self {
            SubmitOutcome::Existing(job) | SubmitOutcome::Started(job) => job,
        }
    }
}

/// Pre-flight and submission failures. None of these leave partial job
/// state behind.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("Could not verify repository size. Please check the URL and try again.")]
    SizeProbeFailed(#[source] anyhow::Error),
    #[error("This repository has {count} source files. The limit is {limit} files.")]
    RepoTooLarge { count: usize, limit: usize },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// The ingestion orchestrator. Cheap to clone; all collaborators are
/// injected behind `Arc`s so the HTTP layer, the CLI, and tests share one
/// construction path.
#[derive(Clone)]
pub struct IngestService {
    config: IngestionConfig,
    chunker: Chunker,
    store: Arc<dyn Store>,
    embedder: Arc<dyn Embedder>,
    fetcher: Arc<dyn RepoFetcher>,
    probe: Arc<dyn SizeProbe>,
    bus: Arc<ProgressBus>,
}

impl IngestService {
    pub fn new(
        config: IngestionConfig,
        store: Arc<dyn Store>,
        embedder: Arc<dyn Embedder>,
        fetcher: Arc<dyn RepoFetcher>,
        probe: Arc<dyn SizeProbe>,
        bus: Arc<ProgressBus>,
    ) -> Self {
        let chunker = Chunker::new(config.window_lines, config.fallback_window_lines);
        Self {
            config,
            chunker,
            store,
            embedder,
            fetcher,
            probe,
            bus,
        }
    }

    pub fn bus(&self) -> &Arc<ProgressBus> {
        &self.bus
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Handle a submission: idempotency check, pre-flight size probe, job
    /// creation, and detached launch of the background run. Returns as
    /// soon as the run is spawned — it never blocks on completion.
    pub async fn submit(
        &self,
        user_id: &str,
        url: &str,
        name: &str,
    ) -> Result<SubmitOutcome, SubmitError> {
        if let Some(existing) = self
            .store
            .find_job_by_user_and_url(user_id, url)
            .await
            .context("idempotency lookup failed")?
        {
            return Ok(SubmitOutcome::Existing(existing));
        }

        let count = self
            .probe
            .estimate_file_count(url)
            .await
            .map_err(SubmitError::SizeProbeFailed)?;

        if count > self.config.max_repo_files {
            return Err(SubmitError::RepoTooLarge {
                count,
                limit: self.config.max_repo_files,
            });
        }

        let job = IngestionJob {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            url: url.to_string(),
            user_id: user_id.to_string(),
            status: JobStatus::Ingesting,
            created_at: Utc::now(),
        };
        self.store.create_job(&job).await.context("failed to create job")?;

        // Detached run. run_job never panics out of its own error
        // handling, so the spawned task always reaches a terminal status.
        let service = self.clone();
        let spawned = job.clone();
        tokio::spawn(async move {
            service.run_job(&spawned).await;
        });

        Ok(SubmitOutcome::Started(job))
    }

    /// Run one job to a terminal status. [`submit`](Self::submit) spawns
    /// this; public so tests can drive a job deterministically.
    pub async fn run_job(&self, job: &IngestionJob) {
        let scratch = self.scratch_path(&job.id);

        if let Err(err) = self.execute(job, &scratch).await {
            tracing::warn!(job_id = %job.id, error = %format!("{err:#}"), "ingestion failed");
            if let Err(status_err) = self.store.update_job_status(&job.id, JobStatus::Failed).await {
                tracing::warn!(job_id = %job.id, error = %status_err, "failed to mark job FAILED");
            }
            self.emit(&job.id, format!("Error: ingestion failed: {err:#}"), 100, None);
        }

        // Scratch cleanup runs on both exit paths; its own failure is not
        // worth failing anything over.
        if let Err(err) = tokio::fs::remove_dir_all(&scratch).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!(job_id = %job.id, error = %err, "scratch cleanup failed");
            }
        }
    }

    fn scratch_path(&self, job_id: &str) -> PathBuf {
        self.config.scratch_dir.join(job_id)
    }

    async fn execute(&self, job: &IngestionJob, scratch: &Path) -> Result<()> {
        tracing::info!(job_id = %job.id, url = %job.url, "starting ingestion");

        self.fetcher
            .fetch(&job.url, scratch)
            .await
            .context("Failed to clone repository")?;

        let tree = walker::build_file_tree(scratch)?;
        let files: Vec<String> = walker::flatten_files(&tree)
            .iter()
            .filter_map(|node| match node {
                FileNode::File { path, .. } => Some(path.clone()),
                FileNode::Directory { .. } => None,
            })
            .filter(|path| is_ingestible_path(path))
            .collect();

        let total = files.len();
        tracing::info!(job_id = %job.id, total, "filtered file list");
        self.emit(
            &job.id,
            format!("Found {total} valid source files. Starting ingestion..."),
            15,
            None,
        );

        let started = Instant::now();
        let mut processed = 0usize;
        let mut successes = 0usize;
        let mut skipped = 0usize;
        let mut failed = 0usize;

        for (batch_index, batch) in files.chunks(self.config.batch_size).enumerate() {
            let elapsed = started.elapsed().as_secs_f64();
            let throughput = if processed > 0 && elapsed > 0.0 {
                processed as f64 / elapsed
            } else {
                0.0
            };

            self.emit(
                &job.id,
                format!("Processing batch {} ({} files)...", batch_index + 1, batch.len()),
                progress_for(processed, total),
                Some(eta_text(total - processed, throughput)),
            );

            let outcomes = futures::future::join_all(
                batch.iter().map(|path| self.process_file(&job.id, scratch, path)),
            )
            .await;

            for outcome in outcomes {
                match outcome {
                    FileOutcome::Success => successes += 1,
                    FileOutcome::Skipped => skipped += 1,
                    FileOutcome::Failed => failed += 1,
                }
            }
            processed += batch.len();
        }

        self.store
            .update_job_status(&job.id, JobStatus::Completed)
            .await
            .context("failed to mark job COMPLETED")?;

        let message = summary_message(successes, skipped, failed, total);
        tracing::info!(job_id = %job.id, successes, skipped, failed, "ingestion complete");
        self.emit(&job.id, message, 100, Some("Done".to_string()));

        Ok(())
    }

    /// Process one file, converting any error into a `Failed` outcome so
    /// a single bad file never aborts its batch.
    async fn process_file(&self, job_id: &str, root: &Path, rel_path: &str) -> FileOutcome {
        match self.try_process_file(job_id, root, rel_path).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(
                    job_id = %job_id,
                    path = %rel_path,
                    error = %format!("{err:#}"),
                    "file processing failed"
                );
                FileOutcome::Failed
            }
        }
    }

    async fn try_process_file(
        &self,
        job_id: &str,
        root: &Path,
        rel_path: &str,
    ) -> Result<FileOutcome> {
        let content = tokio::fs::read_to_string(root.join(rel_path))
            .await
            .with_context(|| format!("failed to read {rel_path}"))?;

        if content.is_empty() || content.chars().count() > self.config.max_file_chars {
            return Ok(FileOutcome::Skipped);
        }

        let file = FileRecord {
            id: Uuid::new_v4().to_string(),
            job_id: job_id.to_string(),
            path: rel_path.to_string(),
            content: content.clone(),
        };
        self.store.create_file_record(&file).await?;

        let file_name = rel_path.rsplit('/').next().unwrap_or(rel_path);
        let chunks = self.chunker.chunk(&content, file_name);

        for chunk in chunks {
            let vector = match self.embedder.embed(&chunk.content).await {
                Ok(vector) => vector,
                Err(err) => {
                    // Dropped chunks don't fail the file; the record stands.
                    tracing::debug!(path = %rel_path, error = %err, "dropping chunk");
                    continue;
                }
            };

            self.store
                .create_code_chunk(&CodeChunk {
                    id: Uuid::new_v4().to_string(),
                    file_id: file.id.clone(),
                    start_line: chunk.start_line,
                    end_line: chunk.end_line,
                    content: chunk.content,
                    vector,
                    created_at: Utc::now(),
                })
                .await?;

            // Rate-limit pacing between provider calls.
            tokio::time::sleep(Duration::from_millis(self.config.chunk_pacing_ms)).await;
        }

        Ok(FileOutcome::Success)
    }

    fn emit(&self, job_id: &str, message: impl Into<String>, progress: u8, eta: Option<String>) {
        self.bus.publish(job_id, &ProgressEvent::new(message, progress, eta));
    }
}

/// Progress is pinned at 15 after filtering; the remaining 80 points
/// track processed files.
fn progress_for(processed: usize, total: usize) -> u8 {
    if total == 0 {
        return 15;
    }
    (15 + processed * 80 / total) as u8
}

fn eta_text(remaining: usize, files_per_second: f64) -> String {
    if files_per_second <= 0.0 {
        return "Calculating...".to_string();
    }

    let seconds = (remaining as f64 / files_per_second).ceil() as u64;
    if seconds >= 60 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{seconds}s")
    }
}

fn summary_message(successes: usize, skipped: usize, failed: usize, total: usize) -> String {
    let processable = total.saturating_sub(skipped);
    let success_rate = if processable > 0 {
        ((successes as f64 / processable as f64) * 100.0).round() as u32
    } else {
        100
    };

    let mut message = format!("Ingestion complete! {successes} files processed");
    if skipped > 0 {
        message.push_str(&format!(", {skipped} skipped (too large)"));
    }
    if failed > 0 {
        message.push_str(&format!(", {failed} failed"));
    }
    if success_rate < 80 {
        message.push_str(&format!(
            ". Warning: Low success rate ({success_rate}%). Consider re-ingesting."
        ));
    }
    message
}
