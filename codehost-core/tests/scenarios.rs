//! End-to-end scenarios over the public API

use codehost_core::config::MergeConfig;
use codehost_core::directory::ProjectRef;
use codehost_core::merge::{MergeWorkspaceManager, PullRequestState};
use codehost_core::{
    BranchRef, MergeOutcome, MergeVerdict, PullRequest, PullRequestMerger, RepoLayout,
    RepositoryStore,
};
use git2::Oid;

#[path = "../src/git/fixture.rs"]
mod fixture;

use fixture::{commit_files, Fixture};

fn commit(repo: &git2::Repository, branch: &str, path: &str, content: &str, message: &str, time: i64) -> Oid {
    commit_files(repo, branch, &[(path, content)], message, time)
}

struct Setup {
    _fx: Fixture,
    layout: RepoLayout,
    store: RepositoryStore,
    a: Oid,
    b: Oid,
    c: Oid,
}

/// `alice/widgets` with history A -> B -> C on `main`
fn setup() -> Setup {
    let fx = Fixture::new();
    let layout = fx.layout.clone();
    let store = fx.store("alice", "widgets");
    store.create().unwrap();

    let repo = store.open().unwrap();
    let a = commit(&repo, "main", "README", "hello\n", "A", 1_000);
    let b = commit(&repo, "main", "lib.rs", "// lib\n", "B", 2_000);
    let c = commit(&repo, "main", "main.rs", "fn main() {}\n", "C", 3_000);
    repo.set_head("refs/heads/main").unwrap();

    Setup {
        _fx: fx,
        layout,
        store,
        a,
        b,
        c,
    }
}

#[test]
fn test_history_pages_partition_the_log() {
    let s = setup();

    let ids = |page, size| -> Vec<String> {
        s.store
            .history(page, size, None)
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect()
    };

    assert_eq!(ids(0, 2), vec![s.c.to_string(), s.b.to_string()]);
    assert_eq!(ids(1, 2), vec![s.a.to_string()]);
    assert!(ids(2, 2).is_empty());
    assert_eq!(ids(0, 10).len(), 3);

    let until_b = s.store.history(0, 10, Some(&s.b.to_string())).unwrap();
    assert_eq!(until_b.len(), 2);
    assert_eq!(until_b[0].summary, "B");
}

#[test]
fn test_feature_merge_scenario() {
    let s = setup();
    let repo = s.store.open().unwrap();
    repo.branch("feature", &repo.find_commit(s.b).unwrap(), false)
        .unwrap();
    let f = commit(&repo, "feature", "feature.rs", "// feature\n", "F", 4_000);

    let merger = PullRequestMerger::new(
        MergeWorkspaceManager::new(s.layout.clone()),
        MergeConfig::default(),
    );
    let project = ProjectRef::new("alice", "widgets");
    let mut pr = PullRequest::new(
        BranchRef::new(project.clone(), "feature"),
        BranchRef::new(project, "main"),
    );

    let pulling = merger.pulling_commits(&pr).unwrap();
    assert_eq!(pulling.len(), 1);
    assert_eq!(pulling[0].id, f.to_string());

    assert_eq!(merger.is_safe_to_merge(&pr).unwrap(), MergeVerdict::Safe);
    assert_eq!(merger.is_safe_to_merge(&pr).unwrap(), MergeVerdict::Safe);

    let MergeOutcome::Merged { commit: merged } = merger.merge(&mut pr).unwrap() else {
        panic!("expected a merge commit");
    };
    assert_eq!(pr.state(), PullRequestState::Closed);

    let tip = s.store.commit("main").unwrap().unwrap();
    assert_eq!(tip.id, merged);
    assert_eq!(tip.parents, vec![s.c.to_string(), f.to_string()]);
}

#[test]
fn test_repository_path_depends_only_on_owner_and_name() {
    let s = setup();
    let again = RepositoryStore::new(s.layout.clone(), ProjectRef::new("alice", "widgets"));
    assert_eq!(again.path(), s.store.path());
    assert_eq!(
        s.store.path(),
        s.layout.repo_root().join("alice").join("widgets.git")
    );
}

#[test]
fn test_merge_into_branch_other_than_unborn_head() {
    let fx = Fixture::new();
    let store = fx.store("alice", "gadgets");
    store.create().unwrap();
    let repo = store.open().unwrap();
    repo.set_head("refs/heads/master").unwrap();

    let base = commit(&repo, "main", "README", "hello\n", "base", 1_000);
    repo.branch("topic", &repo.find_commit(base).unwrap(), false)
        .unwrap();
    let topic = commit(&repo, "topic", "topic.rs", "// topic\n", "topic", 2_000);

    let merger = PullRequestMerger::new(
        MergeWorkspaceManager::new(fx.layout.clone()),
        MergeConfig::default(),
    );
    let project = ProjectRef::new("alice", "gadgets");
    let mut pr = PullRequest::new(
        BranchRef::new(project.clone(), "topic"),
        BranchRef::new(project, "main"),
    );

    assert_eq!(merger.is_safe_to_merge(&pr).unwrap(), MergeVerdict::Safe);
    let MergeOutcome::Merged { commit: merged } = merger.merge(&mut pr).unwrap() else {
        panic!("expected a merge commit");
    };

    let tip = store.commit("main").unwrap().unwrap();
    assert_eq!(tip.id, merged);
    assert_eq!(tip.parents, vec![base.to_string(), topic.to_string()]);
    assert!(store.commit("master").unwrap().is_none());
}
