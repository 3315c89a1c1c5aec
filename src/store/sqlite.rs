//! SQLite [`Store`] implementation.
//!
//! Vectors are stored as little-endian f32 BLOBs. Similarity ranking
//! fetches a job's vectors and computes cosine similarity in Rust, which
//! is fine at the repository sizes the pre-flight ceiling admits.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::{CodeChunk, FileRecord, IngestionJob, JobStatus};

use super::{SimilarChunk, Store};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `path` and run
    /// migrations. Idempotent.
    pub async fn connect(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                url TEXT NOT NULL,
                user_id TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE(user_id, url)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS files (
                id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL,
                path TEXT NOT NULL,
                content TEXT NOT NULL,
                FOREIGN KEY (job_id) REFERENCES jobs(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                file_id TEXT NOT NULL,
                start_line INTEGER NOT NULL,
                end_line INTEGER NOT NULL,
                content TEXT NOT NULL,
                vector BLOB NOT NULL,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (file_id) REFERENCES files(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn parse_status(raw: &str) -> JobStatus {
    match raw {
        "PENDING" => JobStatus::Pending,
        "INGESTING" => JobStatus::Ingesting,
        "COMPLETED" => JobStatus::Completed,
        _ => JobStatus::Failed,
    }
}

fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> IngestionJob {
    let status: String = row.get("status");
    let created_at: i64 = row.get("created_at");
    IngestionJob {
        id: row.get("id"),
        name: row.get("name"),
        url: row.get("url"),
        user_id: row.get("user_id"),
        status: parse_status(&status),
        created_at: chrono::DateTime::from_timestamp(created_at, 0).unwrap_or_default(),
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_job(&self, job: &IngestionJob) -> Result<()> {
        sqlx::query(
            "INSERT INTO jobs (id, name, url, user_id, status, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&job.id)
        .bind(&job.name)
        .bind(&job.url)
        .bind(&job.user_id)
        .bind(job.status.to_string())
        .bind(job.created_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<Option<IngestionJob>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_job))
    }

    async fn find_job_by_user_and_url(
        &self,
        user_id: &str,
        url: &str,
    ) -> Result<Option<IngestionJob>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE user_id = ? AND url = ?")
            .bind(user_id)
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_job))
    }

    async fn update_job_status(&self, id: &str, status: JobStatus) -> Result<()> {
        sqlx::query("UPDATE jobs SET status = ? WHERE id = ?")
            .bind(status.to_string())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_file_record(&self, file: &FileRecord) -> Result<()> {
        sqlx::query("INSERT INTO files (id, job_id, path, content) VALUES (?, ?, ?, ?)")
            .bind(&file.id)
            .bind(&file.job_id)
            .bind(&file.path)
            .bind(&file.content)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_code_chunk(&self, chunk: &CodeChunk) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chunks (id, file_id, start_line, end_line, content, vector, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.file_id)
        .bind(chunk.start_line as i64)
        .bind(chunk.end_line as i64)
        .bind(&chunk.content)
        .bind(vec_to_blob(&chunk.vector))
        .bind(chunk.created_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn top_k_similar_chunks(
        &self,
        job_id: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<SimilarChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.start_line, c.end_line, c.content, c.vector, f.path
            FROM chunks c
            JOIN files f ON f.id = c.file_id
            WHERE f.job_id = ?
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        let mut ranked: Vec<SimilarChunk> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("vector");
                let vector = blob_to_vec(&blob);
                let start_line: i64 = row.get("start_line");
                let end_line: i64 = row.get("end_line");
                SimilarChunk {
                    chunk_id: row.get("id"),
                    file_path: row.get("path"),
                    start_line: start_line as usize,
                    end_line: end_line as usize,
                    content: row.get("content"),
                    score: cosine_similarity(query, &vector) as f64,
                }
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

    async fn open_store() -> (tempfile::TempDir, SqliteStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store = SqliteStore::connect(&tmp.path().join("codescout.sqlite"))
            .await
            .unwrap();
        (tmp, store)
    }

    fn job(id: &str) -> IngestionJob {
        IngestionJob {
            id: id.to_string(),
            name: "repo".to_string(),
            url: format!("https://github.com/acme/{id}"),
            user_id: "u1".to_string(),
            status: JobStatus::Ingesting,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn connect_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("codescout.sqlite");
        drop(SqliteStore::connect(&path).await.unwrap());
        drop(SqliteStore::connect(&path).await.unwrap());
    }

    #[tokio::test]
    async fn job_roundtrip_and_status_update() {
        let (_tmp, store) = open_store().await;
        store.create_job(&job("j1")).await.unwrap();

        let loaded = store.get_job("j1").await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Ingesting);
        assert_eq!(loaded.user_id, "u1");

        store.update_job_status("j1", JobStatus::Failed).await.unwrap();
        let loaded = store.get_job("j1").await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn vectors_survive_blob_roundtrip() {
        let (_tmp, store) = open_store().await;
        store.create_job(&job("j1")).await.unwrap();
        store
            .create_file_record(&FileRecord {
                id: "f1".to_string(),
                job_id: "j1".to_string(),
                path: "src/a.ts".to_string(),
                content: "function a() {}".to_string(),
            })
            .await
            .unwrap();
        store
            .create_code_chunk(&CodeChunk {
                id: "c1".to_string(),
                file_id: "f1".to_string(),
                start_line: 1,
                end_line: 1,
                content: "function a() {}".to_string(),
                vector: vec![0.25, -1.5, 3.0],
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let top = store.top_k_similar_chunks("j1", &[0.25, -1.5, 3.0], 1).await.unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].file_path, "src/a.ts");
        assert!((top[0].score - 1.0).abs() < 1e-6);
    }
}
