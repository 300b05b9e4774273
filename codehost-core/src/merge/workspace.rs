//! Disposable working clones for testing and performing merges

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use git2::{BranchType, Repository};

use crate::directory::ProjectRef;
use crate::git::RepoLayout;
use crate::{Error, Result};

/// A branch of a project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchRef {
    pub project: ProjectRef,
    /// Short branch name, without `refs/heads/`
    pub branch: String,
}

impl BranchRef {
    pub fn new(project: ProjectRef, branch: &str) -> Self {
        let branch = branch.strip_prefix("refs/heads/").unwrap_or(branch);
        Self {
            project,
            branch: branch.to_string(),
        }
    }

    pub fn refname(&self) -> String {
        format!("refs/heads/{}", self.branch)
    }
}

impl fmt::Display for BranchRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.project, self.branch)
    }
}

impl FromStr for BranchRef {
    type Err = Error;

    /// Parse `owner/name:branch`
    fn from_str(s: &str) -> Result<Self> {
        let (project, branch) = s.rsplit_once(':').ok_or_else(|| {
            Error::Config(format!(
                "Invalid branch {:?}. Expected format: owner/name:branch",
                s
            ))
        })?;
        if branch.is_empty() {
            return Err(Error::Config(format!("Missing branch name in {:?}", s)));
        }
        Ok(Self::new(project.parse()?, branch))
    }
}

/// A working clone of the target repository holding both sides of a merge
///
/// The target branch is fetched into `<target>-to` and the source branch
/// into `<source>-from`. The repository handle is released when the
/// workspace is dropped; the directory stays until the next use of the path.
pub struct MergeWorkspace {
    repo: Repository,
    path: PathBuf,
    target: BranchRef,
    source: BranchRef,
    target_branch: String,
    source_branch: String,
    target_url: String,
}

impl MergeWorkspace {
    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn target(&self) -> &BranchRef {
        &self.target
    }

    pub fn source(&self) -> &BranchRef {
        &self.source
    }

    /// Local branch holding the fetched target, `<target>-to`
    pub fn target_branch(&self) -> &str {
        &self.target_branch
    }

    /// Local branch holding the fetched source, `<source>-from`
    pub fn source_branch(&self) -> &str {
        &self.source_branch
    }

    /// URL of the real target repository, for pushing results back
    pub fn target_url(&self) -> &str {
        &self.target_url
    }
}

impl Drop for MergeWorkspace {
    fn drop(&mut self) {
        tracing::debug!(path = %self.path.display(), "released merge workspace");
    }
}

/// Builds merge workspaces under the merge root
///
/// The workspace directory is keyed by the target project alone, so callers
/// must not run two workspace operations against the same target project at
/// the same time.
#[derive(Debug, Clone)]
pub struct MergeWorkspaceManager {
    layout: RepoLayout,
}

impl MergeWorkspaceManager {
    pub fn new(layout: RepoLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &RepoLayout {
        &self.layout
    }

    /// Build a fresh workspace for `target` and `source`, run `op` against
    /// it, then release it whether or not `op` succeeded
    pub fn with_workspace<T, F>(&self, target: &BranchRef, source: &BranchRef, op: F) -> Result<T>
    where
        F: FnOnce(&MergeWorkspace) -> Result<T>,
    {
        let workspace = self.prepare(target, source)?;
        op(&workspace)
    }

    fn prepare(&self, target: &BranchRef, source: &BranchRef) -> Result<MergeWorkspace> {
        let path = self.layout.workspace_path(&target.project);

        if path.exists() {
            tracing::debug!(path = %path.display(), "removing stale merge workspace");
            fs::remove_dir_all(&path)
                .map_err(|e| Error::workspace("Failed to remove stale workspace", e))?;
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| Error::workspace("Failed to create merge root", e))?;
        }

        let target_url = self.layout.repository_url(&target.project)?;
        let source_url = self.layout.repository_url(&source.project)?;

        let repo = git2::build::RepoBuilder::new()
            .clone(&target_url, &path)
            .map_err(|e| Error::workspace(&format!("Failed to clone {}", target.project), e))?;

        let target_branch = format!("{}-to", target.branch);
        let source_branch = format!("{}-from", source.branch);

        for name in [&target_branch, &source_branch] {
            if let Ok(mut stale) = repo.find_branch(name, BranchType::Local) {
                stale
                    .delete()
                    .map_err(|e| Error::workspace(&format!("Failed to delete branch {}", name), e))?;
            }
        }

        fetch_into(&repo, &target_url, target, &target_branch)?;
        fetch_into(&repo, &source_url, source, &source_branch)?;

        tracing::info!(
            path = %path.display(),
            target = %target,
            source = %source,
            "prepared merge workspace"
        );

        Ok(MergeWorkspace {
            repo,
            path,
            target: target.clone(),
            source: source.clone(),
            target_branch,
            source_branch,
            target_url,
        })
    }
}

/// Fetch `branch` from `url` into the local branch `local`
fn fetch_into(repo: &Repository, url: &str, branch: &BranchRef, local: &str) -> Result<()> {
    let refspec = format!("+{}:refs/heads/{}", branch.refname(), local);

    repo.remote_anonymous(url)
        .and_then(|mut remote| remote.fetch(&[refspec.as_str()], None, None))
        .map_err(|e| Error::workspace(&format!("Failed to fetch {}", branch), e))?;

    // A refspec whose source is missing fetches nothing without failing
    if repo.find_branch(local, BranchType::Local).is_err() {
        return Err(Error::Workspace(format!("Branch {} not found", branch)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::fixture::{commit_files, Fixture};

    #[test]
    fn test_parse_branch_ref() {
        let branch: BranchRef = "alice/widgets:feature/login".parse().unwrap();
        assert_eq!(branch.project, ProjectRef::new("alice", "widgets"));
        assert_eq!(branch.branch, "feature/login");
        assert_eq!(branch.to_string(), "alice/widgets:feature/login");

        assert!("alice/widgets".parse::<BranchRef>().is_err());
        assert!("alice/widgets:".parse::<BranchRef>().is_err());
    }

    #[test]
    fn test_branch_ref_strips_refs_heads() {
        let branch = BranchRef::new(ProjectRef::new("a", "b"), "refs/heads/main");
        assert_eq!(branch.branch, "main");
        assert_eq!(branch.refname(), "refs/heads/main");
    }

    #[test]
    fn test_workspace_has_both_transient_branches() {
        let fx = Fixture::new();
        let store = fx.store("alice", "widgets");
        store.create().unwrap();
        let repo = store.open().unwrap();
        let main = commit_files(&repo, "main", &[("a", "1")], "first", 1_000);
        let feature = commit_files(&repo, "feature", &[("b", "2")], "second", 2_000);
        repo.set_head("refs/heads/main").unwrap();

        let manager = MergeWorkspaceManager::new(fx.layout.clone());
        let project = ProjectRef::new("alice", "widgets");
        let target = BranchRef::new(project.clone(), "main");
        let source = BranchRef::new(project.clone(), "feature");

        let path = manager
            .with_workspace(&target, &source, |ws| {
                assert_eq!(ws.target_branch(), "main-to");
                assert_eq!(ws.source_branch(), "feature-from");
                let to = ws.repo().find_branch("main-to", BranchType::Local)?;
                let from = ws.repo().find_branch("feature-from", BranchType::Local)?;
                assert_eq!(to.get().target(), Some(main));
                assert_eq!(from.get().target(), Some(feature));
                Ok(ws.path().to_path_buf())
            })
            .unwrap();

        assert_eq!(path, fx.layout.workspace_path(&project));
    }

    #[test]
    fn test_workspace_is_rebuilt_on_each_use() {
        let fx = Fixture::new();
        let store = fx.store("alice", "widgets");
        store.create().unwrap();
        let repo = store.open().unwrap();
        commit_files(&repo, "main", &[("a", "1")], "first", 1_000);
        repo.set_head("refs/heads/main").unwrap();

        let manager = MergeWorkspaceManager::new(fx.layout.clone());
        let target = BranchRef::new(ProjectRef::new("alice", "widgets"), "main");

        manager
            .with_workspace(&target, &target, |ws| {
                fs::write(ws.path().join("leftover"), "x")?;
                Ok(())
            })
            .unwrap();

        let leftover = manager
            .with_workspace(&target, &target, |ws| Ok(ws.path().join("leftover").exists()))
            .unwrap();
        assert!(!leftover);
    }

    #[test]
    fn test_missing_branch_is_workspace_error() {
        let fx = Fixture::new();
        let store = fx.store("alice", "widgets");
        store.create().unwrap();
        let repo = store.open().unwrap();
        commit_files(&repo, "main", &[("a", "1")], "first", 1_000);
        repo.set_head("refs/heads/main").unwrap();

        let manager = MergeWorkspaceManager::new(fx.layout.clone());
        let project = ProjectRef::new("alice", "widgets");
        let result = manager.with_workspace(
            &BranchRef::new(project.clone(), "main"),
            &BranchRef::new(project, "nope"),
            |_| Ok(()),
        );

        assert!(matches!(result, Err(Error::Workspace(_))));
    }

    #[test]
    fn test_missing_repository_is_workspace_error() {
        let fx = Fixture::new();
        let manager = MergeWorkspaceManager::new(fx.layout.clone());
        let branch = BranchRef::new(ProjectRef::new("ghost", "repo"), "main");

        let result = manager.with_workspace(&branch, &branch, |_| Ok(()));
        assert!(matches!(result, Err(Error::Workspace(_))));
    }

    #[test]
    fn test_operation_error_propagates() {
        let fx = Fixture::new();
        let store = fx.store("alice", "widgets");
        store.create().unwrap();
        let repo = store.open().unwrap();
        commit_files(&repo, "main", &[("a", "1")], "first", 1_000);
        repo.set_head("refs/heads/main").unwrap();

        let manager = MergeWorkspaceManager::new(fx.layout.clone());
        let target = BranchRef::new(ProjectRef::new("alice", "widgets"), "main");

        let result: Result<()> =
            manager.with_workspace(&target, &target, |_| Err(Error::Other("boom".into())));
        assert!(matches!(result, Err(Error::Other(ref m)) if m == "boom"));
    }
}
