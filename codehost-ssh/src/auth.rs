//! Public-key authentication and per-command authorization

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use codehost_core::directory::{
    AccessControl, KeyRegistry, MemoryDirectory, ProjectDirectory, RepositoryKind, Resource,
    User,
};
use codehost_core::keys;
use tracing::instrument;

use crate::command::GitCommand;

/// The platform collaborators a transport session consults
#[derive(Clone)]
pub struct Services {
    pub projects: Arc<dyn ProjectDirectory>,
    pub access: Arc<dyn AccessControl>,
    pub keys: Arc<dyn KeyRegistry>,
}

impl Services {
    /// Use one directory for projects, permissions and keys
    pub fn from_directory(directory: Arc<MemoryDirectory>) -> Self {
        Self {
            projects: directory.clone(),
            access: directory.clone(),
            keys: directory,
        }
    }
}

/// Resolve the user behind a presented key
///
/// Only `service_account` may log in. The key is looked up by its canonical
/// form; on a match its last-used time is recorded and its user returned.
#[instrument(skip(services, blob))]
pub async fn authenticate(
    services: &Services,
    service_account: &str,
    account: &str,
    blob: &[u8],
) -> Option<User> {
    if account != service_account {
        tracing::warn!("login to unexpected account");
        return None;
    }

    let canonical = match keys::canonical_key(blob) {
        Ok(canonical) => canonical,
        Err(e) => {
            tracing::warn!(error = %e, "unreadable key");
            return None;
        }
    };

    let owner = match services.keys.find_by_key(&canonical).await {
        Ok(Some(owner)) => owner,
        Ok(None) => {
            tracing::info!(fingerprint = %keys::fingerprint(blob), "key is not registered");
            return None;
        }
        Err(e) => {
            tracing::error!(error = %e, "key lookup failed");
            return None;
        }
    };

    if let Err(e) = services.keys.touch(&canonical, SystemTime::now()).await {
        tracing::warn!(error = %e, "failed to record key use");
    }

    tracing::info!(user = %owner.user.login, "authenticated");
    Some(owner.user)
}

/// Why a command was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    NoSuchProject(String),
    NotGit(String),
    NoPermission { user: String, project: String },
    LookupFailed(String),
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Denial::NoSuchProject(project) => write!(f, "{} does not exist", project),
            Denial::NotGit(project) => write!(f, "{} is not a git repository", project),
            Denial::NoPermission { user, project } => {
                write!(f, "{} has no permission to {}", user, project)
            }
            Denial::LookupFailed(reason) => write!(f, "permission check failed: {}", reason),
        }
    }
}

/// Check that `user` may run `command`
#[instrument(skip(services, user, command), fields(user = %user.login, project = %command.project))]
pub async fn authorize(services: &Services, user: &User, command: &GitCommand) -> Result<(), Denial> {
    let target = &command.project;

    let project = services
        .projects
        .find_project(&target.owner, &target.name)
        .await
        .map_err(|e| Denial::LookupFailed(e.to_string()))?
        .ok_or_else(|| Denial::NoSuchProject(target.to_string()))?;

    if project.kind != RepositoryKind::Git {
        return Err(Denial::NotGit(target.to_string()));
    }

    let allowed = services
        .access
        .is_allowed(
            user,
            &Resource::code(target.clone()),
            command.service.required_operation(),
        )
        .await
        .map_err(|e| Denial::LookupFailed(e.to_string()))?;

    if !allowed {
        tracing::warn!(service = ?command.service, "permission denied");
        return Err(Denial::NoPermission {
            user: user.login.clone(),
            project: target.to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::parse_git_command;
    use codehost_core::directory::Project;
    use codehost_core::RegisteredKey;
    use russh_keys::key::KeyPair;
    use russh_keys::PublicKeyBase64;

    fn user(login: &str) -> User {
        User {
            login: login.to_string(),
            name: String::new(),
        }
    }

    fn key_blob() -> Vec<u8> {
        KeyPair::generate_ed25519()
            .clone_public_key()
            .unwrap()
            .public_key_bytes()
    }

    fn openssh_line(blob: &[u8]) -> String {
        keys::canonical_key(blob).unwrap()
    }

    async fn directory() -> Arc<MemoryDirectory> {
        let dir = Arc::new(MemoryDirectory::new());
        dir.add_user(user("alice")).await.unwrap();
        dir.add_user(user("bob")).await.unwrap();
        dir.add_project(Project {
            owner: "alice".to_string(),
            name: "widgets".to_string(),
            kind: RepositoryKind::Git,
            public: false,
        })
        .await
        .unwrap();
        dir.add_project(Project {
            owner: "alice".to_string(),
            name: "legacy".to_string(),
            kind: RepositoryKind::Subversion,
            public: true,
        })
        .await
        .unwrap();
        dir
    }

    #[tokio::test]
    async fn test_registered_key_authenticates_and_is_touched() {
        let dir = directory().await;
        let blob = key_blob();
        let key = RegisteredKey::parse(&openssh_line(&blob), None, "alice").unwrap();
        dir.register(key).await.unwrap();
        let services = Services::from_directory(dir.clone());

        let user = authenticate(&services, "codehost", "codehost", &blob).await.unwrap();
        assert_eq!(user.login, "alice");

        let canonical = keys::canonical_key(&blob).unwrap();
        let owner = dir.find_by_key(&canonical).await.unwrap().unwrap();
        let first = owner.key.last_used.unwrap();

        authenticate(&services, "codehost", "codehost", &blob).await.unwrap();
        let owner = dir.find_by_key(&canonical).await.unwrap().unwrap();
        assert!(owner.key.last_used.unwrap() >= first);
    }

    #[tokio::test]
    async fn test_unregistered_key_is_rejected() {
        let dir = directory().await;
        let services = Services::from_directory(dir.clone());

        assert!(authenticate(&services, "codehost", "codehost", &key_blob()).await.is_none());
        assert!(dir.snapshot().await.keys.is_empty());
    }

    #[tokio::test]
    async fn test_wrong_account_is_rejected() {
        let dir = directory().await;
        let blob = key_blob();
        dir.register(RegisteredKey::parse(&openssh_line(&blob), None, "alice").unwrap())
            .await
            .unwrap();
        let services = Services::from_directory(dir.clone());

        assert!(authenticate(&services, "codehost", "alice", &blob).await.is_none());
        let canonical = keys::canonical_key(&blob).unwrap();
        assert!(dir.find_by_key(&canonical).await.unwrap().unwrap().key.last_used.is_none());
    }

    #[tokio::test]
    async fn test_authorize() {
        let services = Services::from_directory(directory().await);
        let fetch = parse_git_command("git-upload-pack 'alice/widgets.git'").unwrap();
        let push = parse_git_command("git-receive-pack 'alice/widgets.git'").unwrap();

        assert!(authorize(&services, &user("alice"), &fetch).await.is_ok());
        assert!(authorize(&services, &user("alice"), &push).await.is_ok());
        assert_eq!(
            authorize(&services, &user("bob"), &fetch).await,
            Err(Denial::NoPermission {
                user: "bob".to_string(),
                project: "alice/widgets".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_authorize_missing_and_non_git_projects() {
        let services = Services::from_directory(directory().await);
        let missing = parse_git_command("git-upload-pack 'alice/nothing.git'").unwrap();
        let legacy = parse_git_command("git-upload-pack 'alice/legacy.git'").unwrap();

        let denial = authorize(&services, &user("alice"), &missing).await.unwrap_err();
        assert_eq!(denial.to_string(), "alice/nothing does not exist");

        let denial = authorize(&services, &user("alice"), &legacy).await.unwrap_err();
        assert_eq!(denial.to_string(), "alice/legacy is not a git repository");
    }
}
