//! Access to one bare repository on disk

use std::fs;
use std::path::{Path, PathBuf};

use git2::{Commit, ErrorCode, ObjectType, Repository};

use super::browse::{self, PathMetadata};
use super::history::{self, CommitInfo};
use super::layout::RepoLayout;
use super::patch;
use crate::config::Config;
use crate::directory::ProjectRef;
use crate::{Error, Result};

/// Default limit above which file content is not returned by `metadata_at`
const DEFAULT_MAX_VIEWABLE_FILE_SIZE: u64 = 1024 * 1024;

/// Lookup failures that mean "nothing there" rather than "something broke"
fn is_absent(err: &git2::Error) -> bool {
    matches!(
        err.code(),
        ErrorCode::NotFound
            | ErrorCode::UnbornBranch
            | ErrorCode::InvalidSpec
            | ErrorCode::Ambiguous
            | ErrorCode::Peel
    )
}

/// Resolve a revision (or HEAD when `None`) to a commit
fn resolve_commit<'r>(repo: &'r Repository, revision: Option<&str>) -> Result<Option<Commit<'r>>> {
    let object = match revision {
        None => repo.head().and_then(|head| head.peel(ObjectType::Commit)),
        Some(rev) => repo
            .revparse_single(rev)
            .and_then(|obj| obj.peel(ObjectType::Commit)),
    };

    match object {
        Ok(object) => Ok(object.into_commit().ok()),
        Err(e) if is_absent(&e) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// A bare repository addressed by (owner, name)
///
/// The store does not lock the repository; concurrent writers rely on the
/// ref-update semantics of the object store.
#[derive(Debug, Clone)]
pub struct RepositoryStore {
    layout: RepoLayout,
    project: ProjectRef,
    path: PathBuf,
    max_viewable_file_size: u64,
}

impl RepositoryStore {
    pub fn new(layout: RepoLayout, project: ProjectRef) -> Self {
        let path = layout.repository_path(&project);
        Self {
            layout,
            project,
            path,
            max_viewable_file_size: DEFAULT_MAX_VIEWABLE_FILE_SIZE,
        }
    }

    pub fn from_config(config: &Config, project: ProjectRef) -> Self {
        Self::new(RepoLayout::from_config(&config.storage), project)
            .with_max_viewable_file_size(config.storage.max_viewable_file_size)
    }

    pub fn with_max_viewable_file_size(mut self, bytes: u64) -> Self {
        self.max_viewable_file_size = bytes;
        self
    }

    pub fn project(&self) -> &ProjectRef {
        &self.project
    }

    /// Path of the bare repository directory
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn layout(&self) -> &RepoLayout {
        &self.layout
    }

    pub fn exists(&self) -> bool {
        self.path.join("HEAD").is_file()
    }

    /// `file://` URL of this repository
    pub fn url(&self) -> Result<String> {
        self.layout.repository_url(&self.project)
    }

    /// Open the underlying git2 repository
    pub fn open(&self) -> Result<Repository> {
        Repository::open_bare(&self.path).map_err(|e| {
            if e.code() == ErrorCode::NotFound {
                Error::Other(format!("Repository not found: {}", self.project))
            } else {
                Error::Git(e)
            }
        })
    }

    /// Initialize a new bare repository
    ///
    /// Fails if anything already exists at the repository path.
    pub fn create(&self) -> Result<()> {
        if self.path.exists() {
            return Err(Error::AlreadyExists(self.path.display().to_string()));
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        Repository::init_bare(&self.path)?;
        tracing::info!(project = %self.project, path = %self.path.display(), "created repository");
        Ok(())
    }

    /// Remove the repository directory tree
    pub fn delete(&self) -> Result<()> {
        match fs::remove_dir_all(&self.path) {
            Ok(()) => {
                tracing::info!(project = %self.project, "deleted repository");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Describe `path` on `branch` (HEAD when `None`)
    ///
    /// Returns `None` when the branch cannot be resolved, e.g. in an empty
    /// repository, or when nothing exists at `path`. An empty path denotes
    /// the root folder.
    pub fn metadata_at(&self, branch: Option<&str>, path: &str) -> Result<Option<PathMetadata>> {
        let repo = self.open()?;
        let Some(commit) = resolve_commit(&repo, branch)? else {
            tracing::debug!(project = %self.project, ?branch, "no commit to browse");
            return Ok(None);
        };

        browse::describe(&repo, &commit, path, self.max_viewable_file_size)
    }

    /// Raw bytes of a file at HEAD; `None` for folders and missing paths
    pub fn raw_file_at(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let repo = self.open()?;
        let Some(commit) = resolve_commit(&repo, None)? else {
            return Ok(None);
        };

        let Some(path) = browse::normalize_path(path) else {
            return Ok(None);
        };
        let tree = commit.tree()?;
        let entry = match tree.get_path(Path::new(&path)) {
            Ok(entry) => entry,
            Err(e) if is_absent(&e) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if entry.kind() != Some(ObjectType::Blob) {
            return Ok(None);
        }

        let bytes = repo.find_blob(entry.id())?.content().to_vec();
        Ok(Some(bytes))
    }

    /// Whether `path` names a file at `revision` (HEAD when `None`)
    pub fn is_file(&self, path: &str, revision: Option<&str>) -> Result<bool> {
        let repo = self.open()?;
        let Some(commit) = resolve_commit(&repo, revision)? else {
            return Ok(false);
        };

        let Some(path) = browse::normalize_path(path) else {
            return Ok(false);
        };
        let tree = commit.tree()?;
        let is_blob = tree
            .get_path(Path::new(&path))
            .map(|entry| entry.kind() == Some(ObjectType::Blob))
            .unwrap_or(false);
        Ok(is_blob)
    }

    /// A page of history ending at `until` (HEAD when `None`), most recent first
    ///
    /// Pages are zero-based and partition the log: page `n` holds commits
    /// `n*page_size .. n*page_size + page_size`. Each call walks again from
    /// the start.
    pub fn history(
        &self,
        page_number: usize,
        page_size: usize,
        until: Option<&str>,
    ) -> Result<Vec<CommitInfo>> {
        let repo = self.open()?;
        let Some(start) = resolve_commit(&repo, until)? else {
            return Ok(Vec::new());
        };

        history::page(&repo, start.id(), page_number, page_size)
    }

    /// A single commit
    pub fn commit(&self, revision: &str) -> Result<Option<CommitInfo>> {
        let repo = self.open()?;
        let info = resolve_commit(&repo, Some(revision))?.map(|c| CommitInfo::from_commit(&c));
        Ok(info)
    }

    /// Names of all refs
    pub fn branches(&self) -> Result<Vec<String>> {
        let repo = self.open()?;
        let mut names = Vec::new();
        for reference in repo.references()? {
            if let Some(name) = reference?.name() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Unified diff introduced by `revision`; `None` if it does not resolve
    pub fn patch(&self, revision: &str) -> Result<Option<String>> {
        let repo = self.open()?;
        let rendered = match resolve_commit(&repo, Some(revision))? {
            Some(commit) => Some(patch::render(&repo, &commit)?),
            None => None,
        };
        Ok(rendered)
    }

    /// Move the repository to the path of (owner, `new_name`)
    ///
    /// Returns false when the repository is missing, the target is taken, or
    /// the move fails.
    pub fn rename(&mut self, new_name: &str) -> Result<bool> {
        let renamed = ProjectRef::new(&self.project.owner, new_name);
        let target = self.layout.repository_path(&renamed);

        if !self.path.exists() || target.exists() {
            return Ok(false);
        }

        if let Err(e) = fs::rename(&self.path, &target) {
            tracing::warn!(from = %self.project, to = %renamed, error = %e, "rename failed");
            return Ok(false);
        }

        tracing::info!(from = %self.project, to = %renamed, "renamed repository");
        self.project = renamed;
        self.path = target;
        Ok(true)
    }

    /// Create a bare copy of this repository, with every branch and tag,
    /// at the path of `fork`
    pub fn fork(&self, fork: ProjectRef) -> Result<RepositoryStore> {
        let source = self.open()?;
        let forked = RepositoryStore {
            layout: self.layout.clone(),
            path: self.layout.repository_path(&fork),
            project: fork,
            max_viewable_file_size: self.max_viewable_file_size,
        };
        forked.create()?;

        if let Err(e) = self.populate_fork(&source, &forked) {
            tracing::warn!(from = %self.project, to = %forked.project, error = %e, "fork failed");
            if let Err(cleanup) = forked.delete() {
                tracing::warn!(path = %forked.path.display(), error = %cleanup, "could not remove partial fork");
            }
            return Err(e);
        }

        tracing::info!(from = %self.project, to = %forked.project, "forked repository");
        Ok(forked)
    }

    /// Fetch every branch and tag of this repository into `forked` and copy
    /// the source HEAD
    fn populate_fork(&self, source: &Repository, forked: &RepositoryStore) -> Result<()> {
        let repo = forked.open()?;
        let url = self.url()?;
        repo.remote_anonymous(&url)?.fetch(
            &["+refs/heads/*:refs/heads/*", "+refs/tags/*:refs/tags/*"],
            None,
            None,
        )?;

        if let Some(target) = source
            .find_reference("HEAD")
            .ok()
            .and_then(|head| head.symbolic_target().map(str::to_string))
        {
            repo.set_head(&target)?;
        }
        Ok(())
    }
}
