//! Tree browsing: folder listings and file views annotated with the
//! commit that last touched each entry

use std::collections::BTreeMap;
use std::path::Path;

use git2::{Commit, ObjectType, Repository, Tree};
use serde::Serialize;

use super::history::{self, CommitInfo};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Folder,
}

/// One child of a folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryMetadata {
    pub kind: EntryKind,
    pub last_commit: Option<CommitInfo>,
}

/// What lives at a path on a branch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PathMetadata {
    Folder {
        path: String,
        /// Children keyed by entry name
        entries: BTreeMap<String, EntryMetadata>,
    },
    File {
        path: String,
        last_commit: Option<CommitInfo>,
        size: u64,
        binary: bool,
        /// Omitted for binary files and files over the viewable size limit
        content: Option<String>,
    },
}

/// Tree path with empty and `.` segments dropped; `None` if it climbs out
/// with `..`
pub(crate) fn normalize_path(path: &str) -> Option<String> {
    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => return None,
            s => segments.push(s),
        }
    }
    Some(segments.join("/"))
}

pub(crate) fn describe(
    repo: &Repository,
    commit: &Commit<'_>,
    path: &str,
    max_viewable: u64,
) -> Result<Option<PathMetadata>> {
    let Some(path) = normalize_path(path) else {
        return Ok(None);
    };
    let path = path.as_str();
    let root = commit.tree()?;

    if path.is_empty() {
        return folder(repo, commit, &root, path).map(Some);
    }

    let entry = match root.get_path(Path::new(path)) {
        Ok(entry) => entry,
        Err(e) if e.code() == git2::ErrorCode::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    match entry.kind() {
        Some(ObjectType::Tree) => {
            let tree = repo.find_tree(entry.id())?;
            folder(repo, commit, &tree, path).map(Some)
        }
        Some(ObjectType::Blob) => {
            let blob = repo.find_blob(entry.id())?;
            let touched = history::last_touching(repo, commit.id(), &[path.to_string()])?;
            let size = blob.size() as u64;
            let binary = blob.is_binary();

            let content = if binary || size > max_viewable {
                None
            } else {
                Some(String::from_utf8_lossy(blob.content()).into_owned())
            };

            Ok(Some(PathMetadata::File {
                path: path.to_string(),
                last_commit: touched.get(path).cloned(),
                size,
                binary,
                content,
            }))
        }
        // Submodule links and other entries have nothing to show
        _ => Ok(None),
    }
}

fn folder(
    repo: &Repository,
    commit: &Commit<'_>,
    tree: &Tree<'_>,
    path: &str,
) -> Result<PathMetadata> {
    let children: Vec<(String, EntryKind)> = tree
        .iter()
        .filter_map(|entry| {
            let name = entry.name()?.to_string();
            let kind = match entry.kind() {
                Some(ObjectType::Tree) => EntryKind::Folder,
                _ => EntryKind::File,
            };
            Some((name, kind))
        })
        .collect();

    let full_paths: Vec<String> = children
        .iter()
        .map(|(name, _)| join(path, name))
        .collect();
    let mut touched = history::last_touching(repo, commit.id(), &full_paths)?;

    let entries = children
        .into_iter()
        .zip(full_paths)
        .map(|((name, kind), full)| {
            let last_commit = touched.remove(&full);
            (name, EntryMetadata { kind, last_commit })
        })
        .collect();

    Ok(PathMetadata::Folder {
        path: path.to_string(),
        entries,
    })
}

fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}
