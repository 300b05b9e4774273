//! Helpers for building repositories in tests
//!
//! Shared by the unit tests and `tests/scenarios.rs`, so paths go through the
//! crate name.

use codehost_core::directory::ProjectRef;
use codehost_core::{RepoLayout, RepositoryStore};
use git2::{Commit, Index, IndexEntry, IndexTime, Oid, Repository, Signature, Time};
use tempfile::TempDir;

/// A temporary repo root and merge root
pub(crate) struct Fixture {
    #[allow(dead_code)]
    pub dir: TempDir,
    pub layout: RepoLayout,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let layout = RepoLayout::new(dir.path().join("git"), dir.path().join("git-merging"));
        Self { dir, layout }
    }

    pub fn store(&self, owner: &str, name: &str) -> RepositoryStore {
        RepositoryStore::new(self.layout.clone(), ProjectRef::new(owner, name))
    }
}

fn entry(path: &str, id: Oid, size: usize) -> IndexEntry {
    IndexEntry {
        ctime: IndexTime::new(0, 0),
        mtime: IndexTime::new(0, 0),
        dev: 0,
        ino: 0,
        mode: 0o100644,
        uid: 0,
        gid: 0,
        file_size: size as u32,
        id,
        flags: path.len() as u16,
        flags_extended: 0,
        path: path.as_bytes().to_vec(),
    }
}

/// Commit `files` on top of `branch` (created if missing) without a worktree
///
/// The index is in-memory, so blobs are written to the object store first
/// and added by id.
pub(crate) fn commit_files(
    repo: &Repository,
    branch: &str,
    files: &[(&str, &str)],
    message: &str,
    time: i64,
) -> Oid {
    let refname = format!("refs/heads/{}", branch);
    let parent: Option<Commit<'_>> = repo
        .find_reference(&refname)
        .ok()
        .and_then(|r| r.peel_to_commit().ok());

    let mut index = Index::new().unwrap();
    if let Some(parent) = &parent {
        index.read_tree(&parent.tree().unwrap()).unwrap();
    }
    for (path, content) in files {
        let blob = repo.blob(content.as_bytes()).unwrap();
        index.add(&entry(path, blob, content.len())).unwrap();
    }
    let tree_id = index.write_tree_to(repo).unwrap();
    let tree = repo.find_tree(tree_id).unwrap();

    let sig = Signature::new("Alice", "alice@example.com", &Time::new(time, 0)).unwrap();
    let parents: Vec<&Commit<'_>> = parent.iter().collect();
    repo.commit(Some(&refname), &sig, &sig, message, &tree, &parents)
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_files_stacks_on_branch() {
        let fx = Fixture::new();
        let store = fx.store("alice", "widgets");
        store.create().unwrap();
        let repo = store.open().unwrap();

        let first = commit_files(&repo, "main", &[("a.txt", "one\n")], "first", 1_000);
        let second = commit_files(&repo, "main", &[("dir/b.txt", "two\n")], "second", 2_000);

        let commit = repo.find_commit(second).unwrap();
        assert_eq!(commit.parent_id(0).unwrap(), first);
        let tree = commit.tree().unwrap();
        let a = tree.get_path(std::path::Path::new("a.txt")).unwrap();
        assert_eq!(repo.find_blob(a.id()).unwrap().content(), b"one\n");
        let b = tree.get_path(std::path::Path::new("dir/b.txt")).unwrap();
        assert_eq!(repo.find_blob(b.id()).unwrap().content(), b"two\n");
    }
}
