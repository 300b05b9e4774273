//! Bare repository storage and browsing

mod browse;
#[cfg(test)]
pub(crate) mod fixture;
pub(crate) mod history;
mod layout;
mod patch;
mod store;

pub use browse::{EntryKind, EntryMetadata, PathMetadata};
pub use history::CommitInfo;
pub use layout::RepoLayout;
pub use store::RepositoryStore;
