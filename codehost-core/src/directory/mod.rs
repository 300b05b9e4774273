//! Platform data consulted by the repository core
//!
//! Projects, users, permissions and registered keys live in an external data
//! store. The core only talks to it through the traits in this module.

mod memory;

use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::keys::RegisteredKey;
use crate::{Error, Result};

pub use memory::{DirectoryData, Grant, MemoryDirectory};

/// A platform user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub login: String,
    #[serde(default)]
    pub name: String,
}

/// An (owner, name) pair addressing a project and its repository
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProjectRef {
    pub owner: String,
    pub name: String,
}

impl ProjectRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ProjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl FromStr for ProjectRef {
    type Err = Error;

    /// Parse `owner/name`, tolerating a trailing `.git`
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().trim_matches('/');
        let s = s.strip_suffix(".git").unwrap_or(s);
        match s.split_once('/') {
            Some((owner, name))
                if !owner.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Self::new(owner, name))
            }
            _ => Err(Error::Config(format!(
                "Invalid project {:?}. Expected format: owner/name",
                s
            ))),
        }
    }
}

/// Version control system backing a project
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryKind {
    #[default]
    Git,
    Subversion,
}

/// A hosted project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub owner: String,
    pub name: String,
    #[serde(default)]
    pub kind: RepositoryKind,
    /// Anyone may read a public project
    #[serde(default)]
    pub public: bool,
}

impl Project {
    pub fn project_ref(&self) -> ProjectRef {
        ProjectRef::new(&self.owner, &self.name)
    }
}

/// Operations checked by access control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Read,
    Update,
    Delete,
}

/// Kinds of resources access control knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Project,
    Code,
}

/// The thing an operation is being performed on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub kind: ResourceType,
    pub project: ProjectRef,
}

impl Resource {
    /// The code (repository) of a project
    pub fn code(project: ProjectRef) -> Self {
        Self {
            kind: ResourceType::Code,
            project,
        }
    }
}

/// Project lookup by (owner, name)
#[async_trait]
pub trait ProjectDirectory: Send + Sync {
    async fn find_project(&self, owner: &str, name: &str) -> Result<Option<Project>>;
}

/// The external authorization policy
#[async_trait]
pub trait AccessControl: Send + Sync {
    async fn is_allowed(&self, user: &User, resource: &Resource, operation: Operation)
        -> Result<bool>;
}

/// A registered key together with the user it belongs to
#[derive(Debug, Clone)]
pub struct KeyOwner {
    pub key: RegisteredKey,
    pub user: User,
}

/// Registered public keys, looked up by their canonical encoded form
#[async_trait]
pub trait KeyRegistry: Send + Sync {
    /// Exact-match lookup of a canonical key
    async fn find_by_key(&self, canonical: &str) -> Result<Option<KeyOwner>>;

    /// Record a successful authentication with the key
    async fn touch(&self, canonical: &str, at: SystemTime) -> Result<()>;

    /// Bind a new key to its user
    async fn register(&self, key: RegisteredKey) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_project_ref() {
        let project: ProjectRef = "alice/widgets".parse().unwrap();
        assert_eq!(project, ProjectRef::new("alice", "widgets"));
        assert_eq!(project.to_string(), "alice/widgets");
    }

    #[test]
    fn test_parse_project_ref_with_git_suffix() {
        let project: ProjectRef = "/alice/widgets.git".parse().unwrap();
        assert_eq!(project, ProjectRef::new("alice", "widgets"));
    }

    #[test]
    fn test_parse_project_ref_invalid() {
        assert!("widgets".parse::<ProjectRef>().is_err());
        assert!("alice/".parse::<ProjectRef>().is_err());
        assert!("a/b/c".parse::<ProjectRef>().is_err());
        assert!("".parse::<ProjectRef>().is_err());
    }
}
