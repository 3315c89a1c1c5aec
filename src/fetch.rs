//! Repository fetching.
//!
//! The orchestrator clones through the [`RepoFetcher`] trait so tests can
//! substitute a local fixture copier. The production implementation
//! shells out to `git clone` with a shallow depth — the scratch clone is
//! deleted after ingestion, so history is never needed.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;

/// Materializes a remote repository into a scratch directory.
#[async_trait]
pub trait RepoFetcher: Send + Sync {
    /// Clone `url` into `dest`. `dest` must not already contain a clone.
    async fn fetch(&self, url: &str, dest: &Path) -> Result<()>;
}

/// Fetcher that shells out to the `git` binary.
pub struct GitCloneFetcher;

#[async_trait]
impl RepoFetcher for GitCloneFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create scratch directory: {}", parent.display()))?;
        }

        let output = Command::new("git")
            .args(["clone", "--depth", "1"])
            .arg(url)
            .arg(dest)
            .output()
            .await
            .with_context(|| "Failed to execute 'git clone'. Is git installed?")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("git clone failed: {}", stderr.trim());
        }

        Ok(())
    }
}
