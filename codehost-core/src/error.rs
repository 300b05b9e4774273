//! Error types for codehost

use thiserror::Error;

/// Result type alias for codehost operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for codehost operations
///
/// Missing branches, paths and empty repositories are not errors; lookups
/// report them as `None`. Merge conflicts are not errors either.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure reading or writing git objects and refs
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    /// Failure while building or using a merge workspace
    #[error("Merge workspace error: {0}")]
    Workspace(String),

    /// A repository already occupies the target path
    #[error("Repository already exists: {0}")]
    AlreadyExists(String),

    /// Malformed public key material
    #[error("Invalid public key: {0}")]
    Key(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// TOML deserialization error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Wrap any displayable failure as a workspace failure
    pub fn workspace(context: &str, err: impl std::fmt::Display) -> Self {
        Error::Workspace(format!("{}: {}", context, err))
    }
}
