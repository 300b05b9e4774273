//! Unified diffs of single commits

use git2::{Commit, DiffFormat, Repository};

use crate::Result;

/// Diff of a commit against its first parent, or against the empty tree
/// for a root commit
pub(crate) fn render(repo: &Repository, commit: &Commit<'_>) -> Result<String> {
    let new_tree = commit.tree()?;
    let old_tree = if commit.parent_count() > 0 {
        Some(commit.parent(0)?.tree()?)
    } else {
        None
    };

    let diff = repo.diff_tree_to_tree(old_tree.as_ref(), Some(&new_tree), None)?;

    let mut out = Vec::new();
    diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
        if let origin @ ('+' | '-' | ' ') = line.origin() {
            out.push(origin as u8);
        }
        out.extend_from_slice(line.content());
        true
    })?;

    Ok(String::from_utf8_lossy(&out).into_owned())
}
