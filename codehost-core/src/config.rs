//! Configuration management for codehost
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (CODEHOST_*)
//! 3. Config file (~/.config/codehost/config.toml)
//! 4. Default values

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Base directory for data that codehost owns on disk
fn data_root() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("codehost"))
        .unwrap_or_else(|| PathBuf::from(".codehost"))
}

/// On-disk storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of the bare repositories (`<repo_root>/<owner>/<project>.git`)
    pub repo_root: PathBuf,

    /// Root of the merge workspaces (`<merge_root>/<owner>/<project>.git`)
    pub merge_root: PathBuf,

    /// Files larger than this are listed without their content
    pub max_viewable_file_size: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let root = data_root().join("repo");
        Self {
            repo_root: root.join("git"),
            merge_root: root.join("git-merging"),
            max_viewable_file_size: 1024 * 1024,
        }
    }
}

/// Identity recorded on merge commits
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MergeConfig {
    pub committer_name: String,
    pub committer_email: String,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            committer_name: "codehost".to_string(),
            committer_email: "codehost@localhost".to_string(),
        }
    }
}

/// SSH transport configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SshConfig {
    /// Whether `codehost serve` starts the SSH listener
    pub enabled: bool,

    /// Address to bind
    pub listen_address: String,

    /// Port to bind; anything above 65535 leaves the transport disabled
    pub port: u32,

    /// The only account name clients may log in as
    pub service_account: String,

    /// PEM-encoded host key, generated on first start when missing
    pub host_key_path: PathBuf,

    /// Idle sessions are dropped after this long
    #[serde(with = "humantime_serde")]
    pub inactivity_timeout: Duration,

    /// Name shown in the shell rejection message
    pub site_name: String,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_address: "0.0.0.0".to_string(),
            port: 22,
            service_account: "codehost".to_string(),
            host_key_path: data_root().join("ssh_host_ed25519_key"),
            inactivity_timeout: Duration::from_secs(600),
            site_name: "codehost".to_string(),
        }
    }
}

/// Location of the project/user/key directory file
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DirectoryConfig {
    pub path: PathBuf,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        let path = dirs::config_dir()
            .map(|p| p.join("codehost").join("directory.toml"))
            .unwrap_or_else(|| data_root().join("directory.toml"));
        Self { path }
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub merge: MergeConfig,
    pub ssh: SshConfig,
    pub directory: DirectoryConfig,
}

impl Config {
    /// Load configuration from the default config file location
    ///
    /// Returns default config if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = Self::default_config_path() {
            if path.exists() {
                return Self::load_from_file(&path);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(Error::Io)?;
        toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config {}: {}", path.display(), e)))
    }

    /// Get the default config file path
    ///
    /// Returns `~/.config/codehost/config.toml` on Unix
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("codehost").join("config.toml"))
    }

    /// Apply environment variable overrides
    ///
    /// Supported variables:
    /// - CODEHOST_REPO_ROOT
    /// - CODEHOST_MERGE_ROOT
    /// - CODEHOST_SSH_PORT
    /// - CODEHOST_SSH_SERVICE_ACCOUNT
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(root) = std::env::var("CODEHOST_REPO_ROOT") {
            self.storage.repo_root = PathBuf::from(root);
        }

        if let Ok(root) = std::env::var("CODEHOST_MERGE_ROOT") {
            self.storage.merge_root = PathBuf::from(root);
        }

        if let Ok(port) = std::env::var("CODEHOST_SSH_PORT") {
            self.ssh.port = port
                .parse()
                .map_err(|e| Error::Config(format!("Invalid CODEHOST_SSH_PORT {:?}: {}", port, e)))?;
        }

        if let Ok(account) = std::env::var("CODEHOST_SSH_SERVICE_ACCOUNT") {
            self.ssh.service_account = account;
        }

        Ok(self)
    }

    /// Apply CLI flag overrides
    pub fn with_cli_overrides(
        mut self,
        repo_root: Option<PathBuf>,
        merge_root: Option<PathBuf>,
        ssh_port: Option<u32>,
    ) -> Self {
        if let Some(root) = repo_root {
            self.storage.repo_root = root;
        }

        if let Some(root) = merge_root {
            self.storage.merge_root = root;
        }

        if let Some(port) = ssh_port {
            self.ssh.port = port;
        }

        self
    }

    /// Load configuration with all overrides applied
    ///
    /// Priority: CLI > env > config file > defaults
    pub fn load_with_overrides(
        config_path: Option<&Path>,
        repo_root: Option<PathBuf>,
        merge_root: Option<PathBuf>,
        ssh_port: Option<u32>,
    ) -> Result<Self> {
        let base = match config_path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::load()?,
        };

        Ok(base
            .with_env_overrides()?
            .with_cli_overrides(repo_root, merge_root, ssh_port))
    }
}
