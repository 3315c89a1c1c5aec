//! Source tree walker.
//!
//! Recursively lists a cloned repository into a typed [`FileNode`] tree,
//! skipping a fixed deny-set of folder names (VCS metadata, dependency
//! caches, build output, coverage) and file names (lockfiles, OS metadata,
//! secrets). I/O errors propagate to the caller; nothing is suppressed.

use anyhow::{Context, Result};
use std::path::Path;

use crate::models::FileNode;

/// Folder names never descended into, at any depth.
const IGNORED_FOLDERS: &[&str] = &[".git", "node_modules", "dist", "build", "coverage", ".next"];

/// File names never listed.
const IGNORED_FILES: &[&str] = &["package-lock.json", "yarn.lock", ".DS_Store", ".env"];

/// Walk `root` into a tree of file and directory nodes.
///
/// Paths in the returned nodes are relative to `root`. Entries are sorted
/// by name for deterministic ordering. Symbolic links are handled however
/// the underlying filesystem read handles them.
pub fn build_file_tree(root: &Path) -> Result<Vec<FileNode>> {
    walk(root, Path::new(""))
}

fn walk(dir: &Path, relative: &Path) -> Result<Vec<FileNode>> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to list directory: {}", dir.display()))?
        .collect::<std::io::Result<_>>()
        .with_context(|| format!("Failed to read entry in: {}", dir.display()))?;
    entries.sort_by_key(|e| e.file_name());

    let mut nodes = Vec::new();

    for entry in entries {
        let name = entry.file_name().to_string_lossy().to_string();
        if IGNORED_FOLDERS.contains(&name.as_str()) || IGNORED_FILES.contains(&name.as_str()) {
            continue;
        }

        let rel_path = relative.join(&name);
        let rel_str = rel_path.to_string_lossy().to_string();

        let file_type = entry
            .file_type()
            .with_context(|| format!("Failed to stat: {}", entry.path().display()))?;

        if file_type.is_dir() {
            let children = walk(&entry.path(), &rel_path)?;
            nodes.push(FileNode::Directory {
                path: rel_str,
                name,
                children,
            });
        } else {
            nodes.push(FileNode::File {
                path: rel_str,
                name,
            });
        }
    }

    Ok(nodes)
}

/// Flatten a walked tree into the file nodes only, depth-first.
pub fn flatten_files(nodes: &[FileNode]) -> Vec<&FileNode> {
    let mut files = Vec::new();
    for node in nodes {
        match node {
            FileNode::File { .. } => files.push(node),
            FileNode::Directory { children, .. } => {
                files.extend(flatten_files(children));
            }
        }
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, "x").unwrap();
    }

    fn flat_paths(root: &Path) -> Vec<String> {
        let tree = build_file_tree(root).unwrap();
        flatten_files(&tree)
            .iter()
            .map(|n| match n {
                FileNode::File { path, .. } => path.clone(),
                FileNode::Directory { path, .. } => path.clone(),
            })
            .collect()
    }

    #[test]
    fn skips_denied_folders_at_any_depth() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        touch(&root.join("src/main.ts"));
        touch(&root.join("src/node_modules/lib/index.js"));
        touch(&root.join(".git/HEAD"));
        touch(&root.join("deep/coverage/report.html"));
        touch(&root.join("deep/keep.rs"));

        let paths = flat_paths(root);
        assert!(paths.iter().any(|p| p.ends_with("main.ts")));
        assert!(paths.iter().any(|p| p.ends_with("keep.rs")));
        assert!(!paths.iter().any(|p| p.contains("node_modules")));
        assert!(!paths.iter().any(|p| p.contains(".git")));
        assert!(!paths.iter().any(|p| p.contains("coverage")));
    }

    #[test]
    fn skips_denied_files() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        touch(&root.join("package-lock.json"));
        touch(&root.join("nested/.env"));
        touch(&root.join("nested/app.ts"));

        let paths = flat_paths(root);
        assert_eq!(paths, vec!["nested/app.ts".to_string()]);
    }

    #[test]
    fn preserves_relative_segments() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        touch(&root.join("a/b/c.txt"));

        let tree = build_file_tree(root).unwrap();
        match &tree[0] {
            FileNode::Directory { path, children, .. } => {
                assert_eq!(path, "a");
                match &children[0] {
                    FileNode::Directory { path, children, .. } => {
                        assert_eq!(path, "a/b");
                        assert_eq!(
                            children[0],
                            FileNode::File {
                                path: "a/b/c.txt".to_string(),
                                name: "c.txt".to_string()
                            }
                        );
                    }
                    other => panic!("expected directory, got {:?}", other),
                }
            }
            other => panic!("expected directory, got {:?}", other),
        }
    }

    #[test]
    fn missing_root_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("nope");
        assert!(build_file_tree(&missing).is_err());
    }
}
