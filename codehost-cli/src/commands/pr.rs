//! Pull request commands
//!
//! Merge workspaces are keyed by the target project, so only one of these
//! commands may run against a given target at a time.

use clap::{Args, Subcommand};
use codehost_core::merge::MergeWorkspaceManager;
use codehost_core::{
    BranchRef, Config, MergeOutcome, MergeVerdict, PullRequest, PullRequestMerger, RepoLayout,
};

/// Pull request commands
#[derive(Args, Debug)]
pub struct PrArgs {
    #[command(subcommand)]
    pub command: PrCommand,
}

/// Both sides of a pull request
#[derive(Args, Debug, Clone)]
pub struct PrBranches {
    /// Branch to merge into, as owner/name:branch
    #[arg(long)]
    pub target: BranchRef,

    /// Branch to merge from, as owner/name:branch
    #[arg(long)]
    pub source: BranchRef,
}

#[derive(Subcommand, Debug)]
pub enum PrCommand {
    /// Check whether the source merges cleanly into the target
    Check {
        #[command(flatten)]
        branches: PrBranches,
    },

    /// List commits the merge would bring into the target
    Commits {
        #[command(flatten)]
        branches: PrBranches,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Merge the source into the target and push the result
    Merge {
        #[command(flatten)]
        branches: PrBranches,
    },
}

impl PrArgs {
    /// Execute the pr command
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let merger = PullRequestMerger::new(
            MergeWorkspaceManager::new(RepoLayout::from_config(&config.storage)),
            config.merge.clone(),
        );

        match &self.command {
            PrCommand::Check { branches } => {
                let pr = pull_request(branches);
                match merger.is_safe_to_merge(&pr)? {
                    MergeVerdict::Safe => println!("{} can be merged into {}", pr.source, pr.target),
                    MergeVerdict::Conflict => {
                        println!("{} conflicts with {}", pr.source, pr.target)
                    }
                }
            }
            PrCommand::Commits { branches, json } => {
                let commits = merger.pulling_commits(&pull_request(branches))?;
                if *json {
                    println!("{}", serde_json::to_string_pretty(&commits)?);
                } else if commits.is_empty() {
                    println!("No new commits");
                } else {
                    for commit in &commits {
                        println!("{} {} ({})", commit.short_id, commit.summary, commit.author_name);
                    }
                }
            }
            PrCommand::Merge { branches } => {
                let mut pr = pull_request(branches);
                match merger.merge(&mut pr)? {
                    MergeOutcome::Merged { commit } => {
                        println!("Merged {} into {} as {}", pr.source, pr.target, commit)
                    }
                    MergeOutcome::UpToDate => {
                        println!("{} already contains {}", pr.target, pr.source)
                    }
                    MergeOutcome::Conflict => {
                        println!("{} conflicts with {}; nothing was merged", pr.source, pr.target)
                    }
                }
                tracing::debug!(state = ?pr.state(), "pull request state");
            }
        }

        Ok(())
    }
}

fn pull_request(branches: &PrBranches) -> PullRequest {
    PullRequest::new(branches.source.clone(), branches.target.clone())
}
