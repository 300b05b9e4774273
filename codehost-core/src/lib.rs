//! Codehost Core - version control core of the codehost project-hosting platform
//!
//! This crate manages bare repositories on disk, checks and performs pull
//! request merges in disposable workspaces, and defines the interfaces to
//! the platform's project, permission and key data.

#[cfg(test)]
extern crate self as codehost_core;

pub mod config;
pub mod directory;
pub mod error;
pub mod git;
pub mod keys;
pub mod merge;

pub use config::Config;
pub use error::{Error, Result};
pub use git::{CommitInfo, PathMetadata, RepoLayout, RepositoryStore};
pub use keys::RegisteredKey;
pub use merge::{BranchRef, MergeOutcome, MergeVerdict, PullRequest, PullRequestMerger};
