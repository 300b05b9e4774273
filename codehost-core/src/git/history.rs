//! Commit history walking

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use git2::{Commit, Oid, Repository, Sort, Tree};
use serde::Serialize;

use crate::Result;

/// A commit as reported to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitInfo {
    pub id: String,
    pub short_id: String,
    /// Empty for a root commit, two or more for a merge
    pub parents: Vec<String>,
    pub author_name: String,
    pub author_email: String,
    pub time: DateTime<Utc>,
    /// First line of the message
    pub summary: String,
    pub message: String,
}

impl CommitInfo {
    pub fn from_commit(commit: &Commit<'_>) -> Self {
        let id = commit.id().to_string();
        let author = commit.author();

        Self {
            short_id: id.chars().take(7).collect(),
            id,
            parents: commit.parent_ids().map(|p| p.to_string()).collect(),
            author_name: author.name().unwrap_or_default().to_string(),
            author_email: author.email().unwrap_or_default().to_string(),
            time: DateTime::<Utc>::from_timestamp(commit.time().seconds(), 0).unwrap_or_default(),
            summary: commit.summary().unwrap_or_default().to_string(),
            message: commit.message().unwrap_or_default().to_string(),
        }
    }
}

/// One page of the log reachable from `start`, most recent first
///
/// Pages partition the log: page `n` holds commits `n*size .. n*size+size`.
/// A page past the end of the log is empty.
pub(crate) fn page(repo: &Repository, start: Oid, page: usize, size: usize) -> Result<Vec<CommitInfo>> {
    if size == 0 {
        return Ok(Vec::new());
    }

    let mut walk = repo.revwalk()?;
    walk.set_sorting(Sort::TIME)?;
    walk.push(start)?;

    let mut commits = Vec::with_capacity(size);
    for oid in walk.skip(page.saturating_mul(size)).take(size) {
        let commit = repo.find_commit(oid?)?;
        commits.push(CommitInfo::from_commit(&commit));
    }
    Ok(commits)
}

/// Commits reachable from `include` but not from `exclude`, most recent first
pub(crate) fn range(repo: &Repository, include: Oid, exclude: Oid) -> Result<Vec<CommitInfo>> {
    let mut walk = repo.revwalk()?;
    walk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;
    walk.push(include)?;
    walk.hide(exclude)?;

    let mut commits = Vec::new();
    for oid in walk {
        let commit = repo.find_commit(oid?)?;
        commits.push(CommitInfo::from_commit(&commit));
    }
    Ok(commits)
}

fn entry_id(tree: &Tree<'_>, path: &str) -> Option<Oid> {
    tree.get_path(Path::new(path)).ok().map(|entry| entry.id())
}

/// For each path, the most recent commit reachable from `start` that changed it
///
/// A commit changes a path when the path's entry differs from every parent;
/// for a root commit, when the path exists at all. All paths are resolved in a
/// single walk.
pub(crate) fn last_touching(
    repo: &Repository,
    start: Oid,
    paths: &[String],
) -> Result<HashMap<String, CommitInfo>> {
    let mut found = HashMap::with_capacity(paths.len());
    if paths.is_empty() {
        return Ok(found);
    }

    let mut walk = repo.revwalk()?;
    walk.set_sorting(Sort::TIME)?;
    walk.push(start)?;

    for oid in walk {
        let commit = repo.find_commit(oid?)?;
        let tree = commit.tree()?;
        let parent_trees = commit
            .parents()
            .map(|p| p.tree())
            .collect::<std::result::Result<Vec<_>, _>>()?;

        for path in paths {
            if found.contains_key(path) {
                continue;
            }

            let current = entry_id(&tree, path);
            let touched = if parent_trees.is_empty() {
                current.is_some()
            } else {
                parent_trees.iter().all(|p| entry_id(p, path) != current)
            };

            if touched {
                found.insert(path.clone(), CommitInfo::from_commit(&commit));
            }
        }

        if found.len() == paths.len() {
            break;
        }
    }

    Ok(found)
}
