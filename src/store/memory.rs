//! In-memory [`Store`] implementation for tests and one-shot CLI runs.
//!
//! `HashMap`s behind `std::sync::RwLock`; similarity ranking is
//! brute-force cosine over all of a job's chunk vectors.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{CodeChunk, FileRecord, IngestionJob, JobStatus};

use super::{SimilarChunk, Store};

#[derive(Default)]
pub struct MemoryStore {
    jobs: RwLock<HashMap<String, IngestionJob>>,
    files: RwLock<HashMap<String, FileRecord>>,
    chunks: RwLock<Vec<CodeChunk>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of file records stored for a job.
    pub fn file_count(&self, job_id: &str) -> usize {
        self.files
            .read()
            .unwrap()
            .values()
            .filter(|f| f.job_id == job_id)
            .count()
    }

    /// Number of chunks stored for a job.
    pub fn chunk_count(&self, job_id: &str) -> usize {
        let files = self.files.read().unwrap();
        self.chunks
            .read()
            .unwrap()
            .iter()
            .filter(|c| files.get(&c.file_id).map(|f| f.job_id == job_id).unwrap_or(false))
            .count()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_job(&self, job: &IngestionJob) -> Result<()> {
        self.jobs.write().unwrap().insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<Option<IngestionJob>> {
        Ok(self.jobs.read().unwrap().get(id).cloned())
    }

    async fn find_job_by_user_and_url(
        &self,
        user_id: &str,
        url: &str,
    ) -> Result<Option<IngestionJob>> {
        Ok(self
            .jobs
            .read()
            .unwrap()
            .values()
            .find(|j| j.user_id == user_id && j.url == url)
            .cloned())
    }

    async fn update_job_status(&self, id: &str, status: JobStatus) -> Result<()> {
        if let Some(job) = self.jobs.write().unwrap().get_mut(id) {
            job.status = status;
        }
        Ok(())
    }

    async fn create_file_record(&self, file: &FileRecord) -> Result<()> {
        self.files.write().unwrap().insert(file.id.clone(), file.clone());
        Ok(())
    }

    async fn create_code_chunk(&self, chunk: &CodeChunk) -> Result<()> {
        self.chunks.write().unwrap().push(chunk.clone());
        Ok(())
    }

    async fn top_k_similar_chunks(
        &self,
        job_id: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<SimilarChunk>> {
        let files = self.files.read().unwrap();
        let chunks = self.chunks.read().unwrap();

        let mut ranked: Vec<SimilarChunk> = chunks
            .iter()
            .filter_map(|chunk| {
                let file = files.get(&chunk.file_id)?;
                if file.job_id != job_id {
                    return None;
                }
                Some(SimilarChunk {
                    chunk_id: chunk.id.clone(),
                    file_path: file.path.clone(),
                    start_line: chunk.start_line,
                    end_line: chunk.end_line,
                    content: chunk.content.clone(),
                    score: cosine_similarity(query, &chunk.vector) as f64,
                })
            })
            .collect();

        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(k);
        Ok(ranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn job(id: &str, user: &str, url: &str) -> IngestionJob {
        IngestionJob {
            id: id.to_string(),
            name: "repo".to_string(),
            url: url.to_string(),
            user_id: user.to_string(),
            status: JobStatus::Ingesting,
            created_at: Utc::now(),
        }
    }

    fn chunk(id: &str, file_id: &str, vector: Vec<f32>) -> CodeChunk {
        CodeChunk {
            id: id.to_string(),
            file_id: file_id.to_string(),
            start_line: 1,
            end_line: 2,
            content: "fn x() {}".to_string(),
            vector,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn job_lifecycle() {
        let store = MemoryStore::new();
        store.create_job(&job("j1", "u1", "https://x/r")).await.unwrap();

        let found = store.find_job_by_user_and_url("u1", "https://x/r").await.unwrap();
        assert_eq!(found.unwrap().id, "j1");
        assert!(store
            .find_job_by_user_and_url("u2", "https://x/r")
            .await
            .unwrap()
            .is_none());

        store.update_job_status("j1", JobStatus::Completed).await.unwrap();
        assert_eq!(store.get_job("j1").await.unwrap().unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn top_k_ranks_by_similarity_within_job() {
        let store = MemoryStore::new();
        store.create_job(&job("j1", "u1", "https://x/r")).await.unwrap();
        store
            .create_file_record(&FileRecord {
                id: "f1".to_string(),
                job_id: "j1".to_string(),
                path: "src/a.ts".to_string(),
                content: String::new(),
            })
            .await
            .unwrap();
        store
            .create_file_record(&FileRecord {
                id: "f2".to_string(),
                job_id: "other".to_string(),
                path: "src/b.ts".to_string(),
                content: String::new(),
            })
            .await
            .unwrap();

        store.create_code_chunk(&chunk("c1", "f1", vec![1.0, 0.0])).await.unwrap();
        store.create_code_chunk(&chunk("c2", "f1", vec![0.0, 1.0])).await.unwrap();
        // Belongs to a different job; must never be returned.
        store.create_code_chunk(&chunk("c3", "f2", vec![1.0, 0.0])).await.unwrap();

        let top = store.top_k_similar_chunks("j1", &[1.0, 0.0], 5).await.unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].chunk_id, "c1");
        assert!(top[0].score > top[1].score);
    }
}
