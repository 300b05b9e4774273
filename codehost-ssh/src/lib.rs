//! Codehost SSH - git over SSH for codehost repositories
//!
//! Connections authenticate with a registered public key against a single
//! service account. Each exec request names a git service and a repository;
//! it is authorized for the key's user and then served by git against the
//! bare repository.

pub mod auth;
pub mod command;
pub mod host_key;
pub mod server;
pub mod session;

pub use auth::{Denial, Services};
pub use command::{parse_git_command, GitCommand, GitService};
pub use server::{TransportHealth, TransportServer};
pub use session::{ExitStatus, SshSession};
