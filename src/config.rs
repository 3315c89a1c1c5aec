use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub db: DbConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Knobs for the ingestion pipeline. The defaults are the rate-limit
/// accommodations the pipeline was tuned with; they are configuration,
/// not guarantees.
#[derive(Debug, Deserialize, Clone)]
pub struct IngestionConfig {
    /// Files processed concurrently per batch. Also the peak number of
    /// in-flight embedding calls.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Sleep after each chunk is persisted, to stay under provider rate limits.
    #[serde(default = "default_chunk_pacing_ms")]
    pub chunk_pacing_ms: u64,
    /// Files longer than this many characters are skipped, not embedded.
    #[serde(default = "default_max_file_chars")]
    pub max_file_chars: usize,
    /// Pre-flight ceiling on the probed repository file count.
    #[serde(default = "default_max_repo_files")]
    pub max_repo_files: usize,
    /// Window size (lines) for files without structural parsing support.
    #[serde(default = "default_window_lines")]
    pub window_lines: usize,
    /// Window size (lines) when a parseable file yields no declarations.
    #[serde(default = "default_fallback_window_lines")]
    pub fallback_window_lines: usize,
    /// Directory that holds per-job scratch clones.
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            chunk_pacing_ms: default_chunk_pacing_ms(),
            max_file_chars: default_max_file_chars(),
            max_repo_files: default_max_repo_files(),
            window_lines: default_window_lines(),
            fallback_window_lines: default_fallback_window_lines(),
            scratch_dir: default_scratch_dir(),
        }
    }
}

fn default_batch_size() -> usize {
    5
}
fn default_chunk_pacing_ms() -> u64 {
    100
}
fn default_max_file_chars() -> usize {
    30_000
}
fn default_max_repo_files() -> usize {
    300
}
fn default_window_lines() -> usize {
    50
}
fn default_fallback_window_lines() -> usize {
    100
}
fn default_scratch_dir() -> PathBuf {
    PathBuf::from("./scratch")
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// Hugging Face model id, e.g. `sentence-transformers/all-MiniLM-L6-v2`.
    #[serde(default = "default_model")]
    pub model: String,
    /// Vector dimensionality the model produces. Constant across a job.
    #[serde(default = "default_dims")]
    pub dims: usize,
    /// Total attempts while the model reports it is warming up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Fixed delay between warm-up retries.
    #[serde(default = "default_warmup_delay_secs")]
    pub warmup_delay_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            dims: default_dims(),
            max_attempts: default_max_attempts(),
            warmup_delay_secs: default_warmup_delay_secs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_model() -> String {
    "sentence-transformers/all-MiniLM-L6-v2".to_string()
}
fn default_dims() -> usize {
    384
}
fn default_max_attempts() -> u32 {
    3
}
fn default_warmup_delay_secs() -> u64 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.ingestion.batch_size == 0 {
        anyhow::bail!("ingestion.batch_size must be > 0");
    }
    if config.ingestion.window_lines == 0 || config.ingestion.fallback_window_lines == 0 {
        anyhow::bail!("ingestion window sizes must be > 0");
    }
    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.embedding.max_attempts == 0 {
        anyhow::bail!("embedding.max_attempts must be > 0");
    }

    Ok(config)
}
