//! Pre-flight repository size probe.
//!
//! Before a job row exists, the submission handler asks a [`SizeProbe`]
//! how many ingestible files the remote repository holds and rejects
//! anything over the configured ceiling. The GitHub implementation lists
//! the recursive HEAD tree without cloning; a truncated listing counts as
//! 9999 files, which any sane ceiling rejects.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::ingest::is_ingestible_path;

/// Estimates how many source files a repository URL contains.
///
/// An `Err` is the failure sentinel: the caller rejects the submission
/// without creating any job state.
#[async_trait]
pub trait SizeProbe: Send + Sync {
    async fn estimate_file_count(&self, url: &str) -> Result<usize>;
}

/// Size probe backed by the GitHub trees API.
pub struct GithubSizeProbe {
    client: reqwest::Client,
}

impl GithubSizeProbe {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent("codescout")
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SizeProbe for GithubSizeProbe {
    async fn estimate_file_count(&self, url: &str) -> Result<usize> {
        let (owner, repo) = parse_owner_repo(url)?;

        let api_url = format!(
            "https://api.github.com/repos/{}/{}/git/trees/HEAD?recursive=1",
            owner, repo
        );

        let response = self
            .client
            .get(&api_url)
            .send()
            .await
            .with_context(|| "GitHub tree request failed")?;

        let status = response.status();
        if !status.is_success() {
            bail!("GitHub API returned {}", status);
        }

        let json: serde_json::Value = response.json().await?;
        Ok(count_ingestible_blobs(&json))
    }
}

/// Extract `(owner, repo)` from a GitHub URL, https or ssh form.
fn parse_owner_repo(url: &str) -> Result<(String, String)> {
    let rest = url
        .strip_prefix("https://github.com/")
        .or_else(|| url.strip_prefix("http://github.com/"))
        .or_else(|| url.strip_prefix("git@github.com:"))
        .ok_or_else(|| anyhow::anyhow!("Not a GitHub URL: {}", url))?;

    let mut parts = rest.split('/');
    let owner = parts.next().unwrap_or_default();
    let repo = parts
        .next()
        .unwrap_or_default()
        .trim_end_matches('/')
        .trim_end_matches(".git");

    if owner.is_empty() || repo.is_empty() {
        bail!("Not a GitHub repository URL: {}", url);
    }

    Ok((owner.to_string(), repo.to_string()))
}

/// Count blobs in a tree listing that would survive ingestion filtering.
/// Truncated listings are too big to bother counting exactly.
fn count_ingestible_blobs(json: &serde_json::Value) -> usize {
    if json.get("truncated").and_then(|t| t.as_bool()) == Some(true) {
        return 9999;
    }

    let Some(tree) = json.get("tree").and_then(|t| t.as_array()) else {
        return 0;
    };

    tree.iter()
        .filter(|node| node.get("type").and_then(|t| t.as_str()) == Some("blob"))
        .filter(|node| {
            node.get("path")
                .and_then(|p| p.as_str())
                .map(is_ingestible_path)
                .unwrap_or(false)
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_https_url() {
        let (owner, repo) = parse_owner_repo("https://github.com/acme/widgets").unwrap();
        assert_eq!((owner.as_str(), repo.as_str()), ("acme", "widgets"));
    }

    #[test]
    fn parses_dot_git_suffix_and_ssh() {
        let (_, repo) = parse_owner_repo("https://github.com/acme/widgets.git").unwrap();
        assert_eq!(repo, "widgets");
        let (owner, _) = parse_owner_repo("git@github.com:acme/widgets.git").unwrap();
        assert_eq!(owner, "acme");
    }

    #[test]
    fn rejects_non_github_url() {
        assert!(parse_owner_repo("https://example.com/acme/widgets").is_err());
    }

    #[test]
    fn truncated_tree_counts_as_huge() {
        let json = serde_json::json!({ "truncated": true, "tree": [] });
        assert_eq!(count_ingestible_blobs(&json), 9999);
    }

    #[test]
    fn counts_only_ingestible_blobs() {
        let json = serde_json::json!({
            "truncated": false,
            "tree": [
                { "type": "blob", "path": "src/main.ts" },
                { "type": "blob", "path": "logo.png" },
                { "type": "blob", "path": "node_modules/x/index.js" },
                { "type": "tree", "path": "src" },
                { "type": "blob", "path": "README.md" },
            ]
        });
        assert_eq!(count_ingestible_blobs(&json), 2);
    }
}
