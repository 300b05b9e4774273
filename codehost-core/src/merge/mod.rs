//! Pull request merging through disposable workspaces

mod pull_request;
mod workspace;

pub use pull_request::{
    MergeOutcome, MergeVerdict, PullRequest, PullRequestMerger, PullRequestState,
};
pub use workspace::{BranchRef, MergeWorkspace, MergeWorkspaceManager};
