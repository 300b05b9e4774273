//! In-memory directory, optionally persisted to a TOML file
//!
//! Stands in for the platform's database when running the CLI or the
//! transport server outside the web application, and in tests.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::{
    AccessControl, KeyOwner, KeyRegistry, Operation, Project, ProjectDirectory, Resource, User,
};
use crate::keys::RegisteredKey;
use crate::{Error, Result};

/// Operations a user may perform on a project they do not own
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    /// User login
    pub user: String,
    /// Project as `owner/name`
    pub project: String,
    pub operations: Vec<Operation>,
}

/// Serialized contents of the directory file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryData {
    pub users: Vec<User>,
    pub projects: Vec<Project>,
    pub grants: Vec<Grant>,
    pub keys: Vec<RegisteredKey>,
}

/// Directory backed by memory, written through to `path` when set
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    data: RwLock<DirectoryData>,
    path: Option<PathBuf>,
}

impl MemoryDirectory {
    /// Create an empty, unpersisted directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a directory from existing data
    pub fn with_data(data: DirectoryData) -> Self {
        Self {
            data: RwLock::new(data),
            path: None,
        }
    }

    /// Load a directory file; a missing file yields an empty directory
    /// that will be created on the first write
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str(&contents).map_err(|e| {
                Error::Config(format!("Failed to parse directory {}: {}", path.display(), e))
            })?
        } else {
            DirectoryData::default()
        };

        Ok(Self {
            data: RwLock::new(data),
            path: Some(path.to_path_buf()),
        })
    }

    /// Write the current contents back to the directory file, if any
    pub async fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let contents = {
            let data = self.data.read().await;
            toml::to_string_pretty(&*data)
                .map_err(|e| Error::Other(format!("Failed to serialize directory: {}", e)))?
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, contents).await?;
        Ok(())
    }

    /// Snapshot of the current contents
    pub async fn snapshot(&self) -> DirectoryData {
        self.data.read().await.clone()
    }

    pub async fn add_user(&self, user: User) -> Result<()> {
        {
            let mut data = self.data.write().await;
            data.users.retain(|u| u.login != user.login);
            data.users.push(user);
        }
        self.save().await
    }

    pub async fn add_project(&self, project: Project) -> Result<()> {
        {
            let mut data = self.data.write().await;
            data.projects
                .retain(|p| !(p.owner == project.owner && p.name == project.name));
            data.projects.push(project);
        }
        self.save().await
    }

    pub async fn grant(&self, grant: Grant) -> Result<()> {
        self.data.write().await.grants.push(grant);
        self.save().await
    }
}

#[async_trait]
impl ProjectDirectory for MemoryDirectory {
    async fn find_project(&self, owner: &str, name: &str) -> Result<Option<Project>> {
        let data = self.data.read().await;
        Ok(data
            .projects
            .iter()
            .find(|p| p.owner == owner && p.name == name)
            .cloned())
    }
}

#[async_trait]
impl AccessControl for MemoryDirectory {
    async fn is_allowed(
        &self,
        user: &User,
        resource: &Resource,
        operation: Operation,
    ) -> Result<bool> {
        let data = self.data.read().await;
        let target = &resource.project;

        let Some(project) = data
            .projects
            .iter()
            .find(|p| p.owner == target.owner && p.name == target.name)
        else {
            return Ok(false);
        };

        if project.owner == user.login {
            return Ok(true);
        }

        if operation == Operation::Read && project.public {
            return Ok(true);
        }

        let slug = target.to_string();
        Ok(data
            .grants
            .iter()
            .any(|g| g.user == user.login && g.project == slug && g.operations.contains(&operation)))
    }
}

#[async_trait]
impl KeyRegistry for MemoryDirectory {
    async fn find_by_key(&self, canonical: &str) -> Result<Option<KeyOwner>> {
        let data = self.data.read().await;
        let Some(key) = data.keys.iter().find(|k| k.public_key == canonical) else {
            return Ok(None);
        };

        // A key whose user has been removed no longer authenticates anyone
        Ok(data
            .users
            .iter()
            .find(|u| u.login == key.user)
            .map(|user| KeyOwner {
                key: key.clone(),
                user: user.clone(),
            }))
    }

    async fn touch(&self, canonical: &str, at: SystemTime) -> Result<()> {
        {
            let mut data = self.data.write().await;
            if let Some(key) = data.keys.iter_mut().find(|k| k.public_key == canonical) {
                key.touch(at);
            }
        }
        self.save().await
    }

    async fn register(&self, key: RegisteredKey) -> Result<()> {
        {
            let mut data = self.data.write().await;
            if !data.users.iter().any(|u| u.login == key.user) {
                return Err(Error::Config(format!("Unknown user: {}", key.user)));
            }
            if data.keys.iter().any(|k| k.public_key == key.public_key) {
                return Err(Error::Key("key is already registered".to_string()));
            }
            data.keys.push(key);
        }
        self.save().await
    }
}
