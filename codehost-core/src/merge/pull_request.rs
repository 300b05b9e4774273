//! Pull request merge checks and merges

use git2::build::CheckoutBuilder;
use git2::{BranchType, Commit, Oid, PushOptions, RemoteCallbacks, Signature};
use serde::Serialize;

use super::workspace::{BranchRef, MergeWorkspace, MergeWorkspaceManager};
use crate::config::MergeConfig;
use crate::git::{history, CommitInfo};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PullRequestState {
    Open,
    Closed,
}

/// A proposal to merge `source` into `target`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub source: BranchRef,
    pub target: BranchRef,
    state: PullRequestState,
}

impl PullRequest {
    pub fn new(source: BranchRef, target: BranchRef) -> Self {
        Self {
            source,
            target,
            state: PullRequestState::Open,
        }
    }

    pub fn state(&self) -> PullRequestState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == PullRequestState::Open
    }
}

/// Result of a merge safety check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeVerdict {
    Safe,
    Conflict,
}

impl MergeVerdict {
    pub fn is_safe(self) -> bool {
        self == MergeVerdict::Safe
    }
}

/// Result of a merge
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MergeOutcome {
    /// A merge commit was pushed onto the target branch
    Merged { commit: String },
    /// The target already contains the source; nothing was pushed
    UpToDate,
    /// The branches conflict; nothing was pushed
    Conflict,
}

/// What a no-fast-forward merge attempt in a workspace produced
enum Attempt {
    UpToDate,
    Conflict,
    Merged(Oid),
}

/// One of the operations run inside a merge workspace
trait WorkspaceOperation {
    type Output;

    fn run(&self, workspace: &MergeWorkspace) -> Result<Self::Output>;
}

struct SafetyCheck<'a> {
    committer: &'a MergeConfig,
}

struct MergeAndPush<'a> {
    committer: &'a MergeConfig,
}

struct PullingCommits;

impl WorkspaceOperation for SafetyCheck<'_> {
    type Output = MergeVerdict;

    fn run(&self, workspace: &MergeWorkspace) -> Result<MergeVerdict> {
        Ok(match attempt_merge(workspace, self.committer)? {
            Attempt::Conflict => MergeVerdict::Conflict,
            Attempt::UpToDate | Attempt::Merged(_) => MergeVerdict::Safe,
        })
    }
}

impl WorkspaceOperation for MergeAndPush<'_> {
    type Output = MergeOutcome;

    fn run(&self, workspace: &MergeWorkspace) -> Result<MergeOutcome> {
        match attempt_merge(workspace, self.committer)? {
            Attempt::Conflict => Ok(MergeOutcome::Conflict),
            Attempt::UpToDate => Ok(MergeOutcome::UpToDate),
            Attempt::Merged(oid) => {
                push_target(workspace)?;
                Ok(MergeOutcome::Merged {
                    commit: oid.to_string(),
                })
            }
        }
    }
}

impl WorkspaceOperation for PullingCommits {
    type Output = Vec<CommitInfo>;

    fn run(&self, workspace: &MergeWorkspace) -> Result<Vec<CommitInfo>> {
        let target = branch_tip(workspace, workspace.target_branch())?;
        let source = branch_tip(workspace, workspace.source_branch())?;
        history::range(workspace.repo(), source.id(), target.id())
    }
}

fn branch_tip<'r>(workspace: &'r MergeWorkspace, name: &str) -> Result<Commit<'r>> {
    let branch = workspace.repo().find_branch(name, BranchType::Local)?;
    Ok(branch.get().peel_to_commit()?)
}

/// Check out `<target>-to` and merge `<source>-from` into it, always
/// recording a merge commit
fn attempt_merge(workspace: &MergeWorkspace, committer: &MergeConfig) -> Result<Attempt> {
    let repo = workspace.repo();
    let ours = branch_tip(workspace, workspace.target_branch())?;
    let theirs = branch_tip(workspace, workspace.source_branch())?;

    repo.set_head(&format!("refs/heads/{}", workspace.target_branch()))?;
    repo.checkout_head(Some(CheckoutBuilder::new().force()))?;

    if ours.id() == theirs.id() || repo.graph_descendant_of(ours.id(), theirs.id())? {
        return Ok(Attempt::UpToDate);
    }

    let mut index = repo.merge_commits(&ours, &theirs, None)?;
    if index.has_conflicts() {
        tracing::info!(
            target = %workspace.target(),
            source = %workspace.source(),
            "merge has conflicts"
        );
        return Ok(Attempt::Conflict);
    }

    let tree = repo.find_tree(index.write_tree_to(repo)?)?;
    let signature = Signature::now(&committer.committer_name, &committer.committer_email)?;
    let message = format!(
        "Merge branch '{}' of {}\n\nfrom pull request into {}",
        workspace.source().branch,
        workspace.source().project,
        workspace.target()
    );

    let oid = repo.commit(
        Some("HEAD"),
        &signature,
        &signature,
        &message,
        &tree,
        &[&ours, &theirs],
    )?;
    repo.checkout_head(Some(CheckoutBuilder::new().force()))?;

    tracing::debug!(commit = %oid, "recorded merge commit");
    Ok(Attempt::Merged(oid))
}

/// Update the real target branch from `<target>-to` in a single ref update
fn push_target(workspace: &MergeWorkspace) -> Result<()> {
    let refspec = format!(
        "refs/heads/{}:{}",
        workspace.target_branch(),
        workspace.target().refname()
    );

    let mut rejection: Option<String> = None;
    {
        let mut callbacks = RemoteCallbacks::new();
        callbacks.push_update_reference(|refname, status| {
            if let Some(status) = status {
                rejection = Some(format!("{} rejected: {}", refname, status));
            }
            Ok(())
        });

        let mut options = PushOptions::new();
        options.remote_callbacks(callbacks);

        let mut remote = workspace.repo().remote_anonymous(workspace.target_url())?;
        remote.push(&[refspec.as_str()], Some(&mut options))?;
    }

    if let Some(reason) = rejection {
        return Err(Error::Other(format!("Push failed: {}", reason)));
    }

    tracing::info!(target = %workspace.target(), "pushed merge result");
    Ok(())
}

/// Runs pull request operations in merge workspaces
///
/// Merges are not serialized internally: callers must allow at most one
/// outstanding operation per target project.
#[derive(Debug, Clone)]
pub struct PullRequestMerger {
    workspaces: MergeWorkspaceManager,
    committer: MergeConfig,
}

impl PullRequestMerger {
    pub fn new(workspaces: MergeWorkspaceManager, committer: MergeConfig) -> Self {
        Self {
            workspaces,
            committer,
        }
    }

    fn execute<O: WorkspaceOperation>(&self, pr: &PullRequest, op: O) -> Result<O::Output> {
        self.workspaces
            .with_workspace(&pr.target, &pr.source, |workspace| op.run(workspace))
    }

    /// Whether the source merges into the target without conflicts
    ///
    /// Only the workspace is touched, so repeated calls give the same verdict
    /// while neither branch changes.
    pub fn is_safe_to_merge(&self, pr: &PullRequest) -> Result<MergeVerdict> {
        self.execute(
            pr,
            SafetyCheck {
                committer: &self.committer,
            },
        )
    }

    /// Merge the source into the target and push the result
    ///
    /// The pull request is closed only when a merge commit was pushed.
    /// Conflicts and already-merged sources leave it open.
    pub fn merge(&self, pr: &mut PullRequest) -> Result<MergeOutcome> {
        if !pr.is_open() {
            return Err(Error::Other(format!(
                "Pull request {} -> {} is already closed",
                pr.source, pr.target
            )));
        }

        let outcome = self.execute(
            pr,
            MergeAndPush {
                committer: &self.committer,
            },
        )?;

        if let MergeOutcome::Merged { commit } = &outcome {
            tracing::info!(source = %pr.source, target = %pr.target, %commit, "merged pull request");
            pr.state = PullRequestState::Closed;
        }
        Ok(outcome)
    }

    /// Commits reachable from the source but not from the target, most recent first
    pub fn pulling_commits(&self, pr: &PullRequest) -> Result<Vec<CommitInfo>> {
        self.execute(pr, PullingCommits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::ProjectRef;
    use crate::git::fixture::{commit_files, Fixture};
    use crate::git::RepositoryStore;

    struct Scenario {
        fx: Fixture,
        store: RepositoryStore,
        b: Oid,
        c: Oid,
    }

    /// main: A -> B -> C
    fn scenario() -> Scenario {
        let fx = Fixture::new();
        let store = fx.store("alice", "widgets");
        store.create().unwrap();
        let repo = store.open().unwrap();
        commit_files(&repo, "main", &[("README", "hello\n")], "A", 1_000);
        let b = commit_files(&repo, "main", &[("shared.txt", "base\n")], "B", 2_000);
        let c = commit_files(&repo, "main", &[("main.txt", "main\n")], "C", 3_000);
        repo.set_head("refs/heads/main").unwrap();
        Scenario { fx, store, b, c }
    }

    fn branch_from(store: &RepositoryStore, name: &str, at: Oid) {
        let repo = store.open().unwrap();
        let commit = repo.find_commit(at).unwrap();
        repo.branch(name, &commit, false).unwrap();
    }

    fn merger(fx: &Fixture) -> PullRequestMerger {
        PullRequestMerger::new(
            MergeWorkspaceManager::new(fx.layout.clone()),
            MergeConfig::default(),
        )
    }

    fn pr(source: &str, target: &str) -> PullRequest {
        let project = ProjectRef::new("alice", "widgets");
        PullRequest::new(
            BranchRef::new(project.clone(), source),
            BranchRef::new(project, target),
        )
    }

    #[test]
    fn test_disjoint_changes_merge_with_two_parents() {
        let sc = scenario();
        branch_from(&sc.store, "feature", sc.b);
        let repo = sc.store.open().unwrap();
        let f = commit_files(&repo, "feature", &[("feature.txt", "f\n")], "F", 4_000);

        let merger = merger(&sc.fx);
        let mut pr = pr("feature", "main");

        let pulling = merger.pulling_commits(&pr).unwrap();
        assert_eq!(pulling.len(), 1);
        assert_eq!(pulling[0].id, f.to_string());

        assert_eq!(merger.is_safe_to_merge(&pr).unwrap(), MergeVerdict::Safe);
        let outcome = merger.merge(&mut pr).unwrap();
        assert!(matches!(outcome, MergeOutcome::Merged { .. }));
        assert_eq!(pr.state(), PullRequestState::Closed);

        let tip = repo
            .find_reference("refs/heads/main")
            .unwrap()
            .peel_to_commit()
            .unwrap();
        let parents: Vec<Oid> = tip.parent_ids().collect();
        assert_eq!(parents, vec![sc.c, f]);
        assert!(repo.graph_descendant_of(tip.id(), sc.c).unwrap());
        assert!(sc.store.is_file("feature.txt", Some("main")).unwrap());
        assert!(sc.store.is_file("main.txt", Some("main")).unwrap());
    }

    #[test]
    fn test_conflict_is_reported_and_pr_stays_open() {
        let sc = scenario();
        branch_from(&sc.store, "feature", sc.b);
        let repo = sc.store.open().unwrap();
        commit_files(&repo, "main", &[("shared.txt", "ours\n")], "D", 4_000);
        commit_files(&repo, "feature", &[("shared.txt", "theirs\n")], "F", 5_000);
        let before = repo.refname_to_id("refs/heads/main").unwrap();

        let merger = merger(&sc.fx);
        let mut pr = pr("feature", "main");

        assert_eq!(merger.is_safe_to_merge(&pr).unwrap(), MergeVerdict::Conflict);
        assert_eq!(merger.is_safe_to_merge(&pr).unwrap(), MergeVerdict::Conflict);
        assert_eq!(merger.merge(&mut pr).unwrap(), MergeOutcome::Conflict);
        assert!(pr.is_open());
        assert_eq!(repo.refname_to_id("refs/heads/main").unwrap(), before);
    }

    #[test]
    fn test_safety_check_is_idempotent() {
        let sc = scenario();
        branch_from(&sc.store, "feature", sc.b);
        let repo = sc.store.open().unwrap();
        commit_files(&repo, "feature", &[("feature.txt", "f\n")], "F", 4_000);
        let before = repo.refname_to_id("refs/heads/main").unwrap();

        let merger = merger(&sc.fx);
        let pr = pr("feature", "main");

        let first = merger.is_safe_to_merge(&pr).unwrap();
        let second = merger.is_safe_to_merge(&pr).unwrap();
        assert_eq!(first, second);
        assert_eq!(repo.refname_to_id("refs/heads/main").unwrap(), before);
    }

    #[test]
    fn test_identical_branches() {
        let sc = scenario();
        branch_from(&sc.store, "copy", sc.c);

        let merger = merger(&sc.fx);
        let mut pr = pr("copy", "main");

        assert!(merger.pulling_commits(&pr).unwrap().is_empty());
        assert!(merger.is_safe_to_merge(&pr).unwrap().is_safe());
        assert_eq!(merger.merge(&mut pr).unwrap(), MergeOutcome::UpToDate);
        assert!(pr.is_open());
    }

    #[test]
    fn test_merge_closed_pr_fails() {
        let sc = scenario();
        branch_from(&sc.store, "feature", sc.b);
        let repo = sc.store.open().unwrap();
        commit_files(&repo, "feature", &[("feature.txt", "f\n")], "F", 4_000);

        let merger = merger(&sc.fx);
        let mut pr = pr("feature", "main");
        merger.merge(&mut pr).unwrap();

        assert!(merger.merge(&mut pr).is_err());
    }

    #[test]
    fn test_merge_from_fork() {
        let sc = scenario();
        let fork = sc.store.fork(ProjectRef::new("bob", "widgets")).unwrap();
        let fork_repo = fork.open().unwrap();
        let f = commit_files(&fork_repo, "main", &[("bob.txt", "bob\n")], "F", 4_000);

        let merger = merger(&sc.fx);
        let mut pr = PullRequest::new(
            BranchRef::new(ProjectRef::new("bob", "widgets"), "main"),
            BranchRef::new(ProjectRef::new("alice", "widgets"), "main"),
        );

        let pulling = merger.pulling_commits(&pr).unwrap();
        assert_eq!(pulling.iter().map(|c| c.id.clone()).collect::<Vec<_>>(), vec![f.to_string()]);

        // The fork is strictly ahead, but a merge commit is still recorded
        let outcome = merger.merge(&mut pr).unwrap();
        assert!(matches!(outcome, MergeOutcome::Merged { .. }));
        let tip = sc.store.commit("main").unwrap().unwrap();
        assert_eq!(tip.parents, vec![sc.c.to_string(), f.to_string()]);
    }
}
