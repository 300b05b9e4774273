//! On-disk layout of bare repositories and merge workspaces

use std::path::{Path, PathBuf};

use url::Url;

use crate::config::StorageConfig;
use crate::directory::ProjectRef;
use crate::{Error, Result};

/// Maps projects to their directories
///
/// Paths depend only on the (owner, name) pair and the two configured roots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoLayout {
    repo_root: PathBuf,
    merge_root: PathBuf,
}

impl RepoLayout {
    pub fn new(repo_root: impl Into<PathBuf>, merge_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            merge_root: merge_root.into(),
        }
    }

    pub fn from_config(storage: &StorageConfig) -> Self {
        Self::new(&storage.repo_root, &storage.merge_root)
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn merge_root(&self) -> &Path {
        &self.merge_root
    }

    /// `<repo_root>/<owner>/<project>.git`
    pub fn repository_path(&self, project: &ProjectRef) -> PathBuf {
        project_dir(&self.repo_root, project)
    }

    /// `<merge_root>/<owner>/<project>.git`, keyed by the target project
    pub fn workspace_path(&self, project: &ProjectRef) -> PathBuf {
        project_dir(&self.merge_root, project)
    }

    /// `file://` URL of a bare repository, for clone/fetch/push
    pub fn repository_url(&self, project: &ProjectRef) -> Result<String> {
        file_url(&self.repository_path(project))
    }
}

fn project_dir(root: &Path, project: &ProjectRef) -> PathBuf {
    root.join(&project.owner).join(format!("{}.git", project.name))
}

/// Absolute `file://` URL for a local path
pub(crate) fn file_url(path: &Path) -> Result<String> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    Url::from_file_path(&absolute)
        .map(String::from)
        .map_err(|_| Error::Config(format!("Cannot build a URL for {}", absolute.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_path() {
        let layout = RepoLayout::new("/srv/repo/git", "/srv/repo/git-merging");
        let project = ProjectRef::new("alice", "widgets");

        assert_eq!(
            layout.repository_path(&project),
            PathBuf::from("/srv/repo/git/alice/widgets.git")
        );
        assert_eq!(
            layout.workspace_path(&project),
            PathBuf::from("/srv/repo/git-merging/alice/widgets.git")
        );
    }

    #[test]
    fn test_paths_are_pure() {
        let a = RepoLayout::new("/r", "/m");
        let b = RepoLayout::new("/r", "/m");
        for (owner, name) in [("alice", "x"), ("bob", "y.z"), ("c-d", "e_f")] {
            let project = ProjectRef::new(owner, name);
            assert_eq!(a.repository_path(&project), b.repository_path(&project));
            assert_eq!(a.repository_path(&project), a.repository_path(&project));
        }
    }

    #[test]
    fn test_repository_url() {
        let layout = RepoLayout::new("/srv/git", "/srv/merge");
        let url = layout.repository_url(&ProjectRef::new("alice", "widgets")).unwrap();
        assert_eq!(url, "file:///srv/git/alice/widgets.git");
    }
}
