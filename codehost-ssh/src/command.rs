//! Exec command grammar: `<service> '<owner>/<project>.git'`

use codehost_core::directory::{Operation, ProjectRef};

/// The two git wire-protocol services
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitService {
    /// Fetch and clone
    UploadPack,
    /// Push
    ReceivePack,
}

impl GitService {
    /// Subcommand of the `git` binary that speaks this service
    pub fn program(self) -> &'static str {
        match self {
            GitService::UploadPack => "upload-pack",
            GitService::ReceivePack => "receive-pack",
        }
    }

    /// Operation the session's user must be allowed to perform
    pub fn required_operation(self) -> Operation {
        match self {
            GitService::UploadPack => Operation::Read,
            GitService::ReceivePack => Operation::Update,
        }
    }
}

/// A parsed exec request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitCommand {
    pub service: GitService,
    pub project: ProjectRef,
}

/// Parse an exec request such as `git-upload-pack 'alice/widgets.git'`
///
/// Both `git-<service>` and bare `<service>` are accepted. The argument may be
/// single- or double-quoted, with or without a leading `/` and a `.git`
/// suffix. Anything else yields `None`.
pub fn parse_git_command(line: &str) -> Option<GitCommand> {
    let (token, argument) = line.trim().split_once(char::is_whitespace)?;

    let service = match token.strip_prefix("git-").unwrap_or(token) {
        "upload-pack" => GitService::UploadPack,
        "receive-pack" => GitService::ReceivePack,
        _ => return None,
    };

    let argument = argument.trim();
    let unquoted = argument
        .strip_prefix('\'')
        .and_then(|a| a.strip_suffix('\''))
        .or_else(|| argument.strip_prefix('"').and_then(|a| a.strip_suffix('"')))
        .unwrap_or(argument);

    if unquoted.chars().any(char::is_whitespace) {
        return None;
    }

    let project = unquoted.parse().ok()?;
    Some(GitCommand { service, project })
}
