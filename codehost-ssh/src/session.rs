//! Per-connection SSH handler
//!
//! Each connection gets its own [`SshSession`]. Once a registered key has
//! authenticated the connection, exec requests naming a git service are
//! authorized and served by a `git upload-pack` or `git receive-pack` child
//! running against the bare repository.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use codehost_core::directory::User;
use codehost_core::RepoLayout;
use russh::server::{Auth, Handle, Handler, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec};
use russh_keys::key::PublicKey;
use russh_keys::PublicKeyBase64;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::auth::{authenticate, authorize, Services};
use crate::command::{parse_git_command, GitService};

/// Process-level outcome reported as the channel's exit status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Clean,
    IoFailure,
    CommandFailure,
}

impl ExitStatus {
    pub fn code(self) -> u32 {
        match self {
            ExitStatus::Clean => 0,
            ExitStatus::IoFailure => 1,
            ExitStatus::CommandFailure => 2,
        }
    }
}

/// Client bytes buffered for one git process before its input is closed
const MAX_PENDING_INPUT: usize = 64 * 1024 * 1024;

/// Queue from the channel handler to a git process's stdin
///
/// Pushing never waits. Bytes not yet taken by the writer count against a
/// cap.
#[derive(Clone)]
pub(crate) struct InputPipe {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    pending: Arc<AtomicUsize>,
    limit: usize,
}

pub(crate) struct InputReader {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    pending: Arc<AtomicUsize>,
}

pub(crate) fn input_pipe(limit: usize) -> (InputPipe, InputReader) {
    let (tx, rx) = mpsc::unbounded_channel();
    let pending = Arc::new(AtomicUsize::new(0));
    (
        InputPipe {
            tx,
            pending: Arc::clone(&pending),
            limit,
        },
        InputReader { rx, pending },
    )
}

impl InputPipe {
    /// Queue `data`; false when the reader is gone or the cap is exceeded
    pub(crate) fn push(&self, data: &[u8]) -> bool {
        let queued = self.pending.fetch_add(data.len(), Ordering::AcqRel) + data.len();
        if queued > self.limit {
            self.pending.fetch_sub(data.len(), Ordering::AcqRel);
            return false;
        }
        self.tx.send(data.to_vec()).is_ok()
    }
}

impl InputReader {
    /// Next chunk; the caller has taken it off the queue
    pub(crate) async fn recv(&mut self) -> Option<Vec<u8>> {
        let chunk = self.rx.recv().await?;
        self.pending.fetch_sub(chunk.len(), Ordering::AcqRel);
        Some(chunk)
    }
}

/// Shared by every session of one server
pub(crate) struct SessionContext {
    pub services: Services,
    pub layout: RepoLayout,
    pub service_account: String,
    pub site_name: String,
}

pub struct SshSession {
    context: Arc<SessionContext>,
    peer_addr: Option<SocketAddr>,
    user: Option<User>,
    git_protocol: Option<String>,
    /// Client bytes for running commands, by channel
    inputs: HashMap<ChannelId, InputPipe>,
    /// Held by a command for as long as its git process runs
    exec_lock: Arc<Mutex<()>>,
}

impl SshSession {
    pub(crate) fn new(context: Arc<SessionContext>, peer_addr: Option<SocketAddr>) -> Self {
        Self {
            context,
            peer_addr,
            user: None,
            git_protocol: None,
            inputs: HashMap::new(),
            exec_lock: Arc::new(Mutex::new(())),
        }
    }
}

pub(crate) fn shell_rejection(login: &str, site: &str) -> String {
    format!(
        "Hi {}! You've successfully authenticated, but {} does not provide shell access.",
        login, site
    )
}

/// exit-status, EOF, then close
fn finish_channel(session: &mut Session, channel: ChannelId, status: ExitStatus) {
    session.exit_status_request(channel, status.code());
    session.eof(channel);
    session.close(channel);
}

/// Write a diagnostic line to the error channel and end the command
fn reject(session: &mut Session, channel: ChannelId, message: &str, status: ExitStatus) {
    session.extended_data(channel, 1, CryptoVec::from_slice(format!("{}\n", message).as_bytes()));
    finish_channel(session, channel, status);
}

async fn finish_remote(handle: &Handle, channel: ChannelId, status: ExitStatus) {
    let _ = handle.exit_status_request(channel, status.code()).await;
    let _ = handle.eof(channel).await;
    let _ = handle.close(channel).await;
}

/// Run one git service, piping the channel through the child process
async fn run_service(
    handle: &Handle,
    channel: ChannelId,
    service: GitService,
    repository: PathBuf,
    git_protocol: Option<String>,
    mut input: InputReader,
) -> ExitStatus {
    let mut cmd = Command::new("git");
    cmd.arg(service.program()).arg(&repository);
    if let Some(proto) = &git_protocol {
        cmd.env("GIT_PROTOCOL", proto);
    }
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!(error = %e, "failed to spawn git {}", service.program());
            let msg = format!("failed to start git {}: {}\n", service.program(), e);
            let _ = handle
                .extended_data(channel, 1, CryptoVec::from_slice(msg.as_bytes()))
                .await;
            return ExitStatus::IoFailure;
        }
    };

    let (Some(mut stdin), Some(mut stdout), Some(mut stderr)) =
        (child.stdin.take(), child.stdout.take(), child.stderr.take())
    else {
        return ExitStatus::IoFailure;
    };

    // Dropping stdin once the client sends EOF lets the child finish
    let feeder = tokio::spawn(async move {
        while let Some(chunk) = input.recv().await {
            if stdin.write_all(&chunk).await.is_err() {
                break;
            }
        }
    });

    let err_handle = handle.clone();
    let stderr_pump = tokio::spawn(async move {
        let mut buf = vec![0u8; 8192];
        loop {
            match stderr.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if err_handle
                        .extended_data(channel, 1, CryptoVec::from_slice(&buf[..n]))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            }
        }
    });

    let mut io_failed = false;
    let mut buf = vec![0u8; 65536];
    loop {
        match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if handle
                    .data(channel, CryptoVec::from_slice(&buf[..n]))
                    .await
                    .is_err()
                {
                    io_failed = true;
                    break;
                }
            }
            Err(e) => {
                debug!(error = %e, "error reading git stdout");
                io_failed = true;
                break;
            }
        }
    }

    if io_failed {
        let _ = child.kill().await;
    }
    let _ = stderr_pump.await;
    feeder.abort();

    match child.wait().await {
        Ok(status) if io_failed => {
            debug!(?status, "git exited after channel failure");
            ExitStatus::IoFailure
        }
        Ok(status) if status.success() => ExitStatus::Clean,
        Ok(status) => {
            debug!(?status, "git exited with failure");
            ExitStatus::CommandFailure
        }
        Err(e) => {
            warn!(error = %e, "failed to wait for git");
            ExitStatus::IoFailure
        }
    }
}

#[async_trait::async_trait]
impl Handler for SshSession {
    type Error = anyhow::Error;

    async fn auth_publickey(&mut self, user: &str, key: &PublicKey) -> Result<Auth, Self::Error> {
        let blob = key.public_key_bytes();
        match authenticate(&self.context.services, &self.context.service_account, user, &blob).await
        {
            Some(owner) => {
                info!(peer = ?self.peer_addr, user = %owner.login, "SSH session authenticated");
                self.user = Some(owner);
                Ok(Auth::Accept)
            }
            None => Ok(Auth::Reject {
                proceed_with_methods: None,
            }),
        }
    }

    async fn channel_open_session(
        &mut self,
        _channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }

    async fn env_request(
        &mut self,
        _channel: ChannelId,
        variable_name: &str,
        variable_value: &str,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if variable_name == "GIT_PROTOCOL" {
            debug!(value = %variable_value, "client requested GIT_PROTOCOL");
            self.git_protocol = Some(variable_value.to_string());
        }
        Ok(())
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(input) = self.inputs.get(&channel) {
            if !input.push(data) {
                warn!(peer = ?self.peer_addr, "git process is not reading input, closing it");
                self.inputs.remove(&channel);
            }
        }
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.inputs.remove(&channel);
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.inputs.remove(&channel);
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let login = self.user.as_ref().map(|u| u.login.as_str()).unwrap_or("there");
        info!(peer = ?self.peer_addr, user = %login, "rejected shell request");
        let message = shell_rejection(login, &self.context.site_name);
        reject(session, channel, &message, ExitStatus::CommandFailure);
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let line = String::from_utf8_lossy(data).into_owned();
        info!(peer = ?self.peer_addr, command = %line, "SSH exec request");

        let Some(user) = self.user.clone() else {
            reject(session, channel, "not authenticated", ExitStatus::CommandFailure);
            return Ok(());
        };

        let Some(command) = parse_git_command(&line) else {
            warn!(command = %line, "unknown command");
            let message = format!("unknown command: {}", line.trim());
            reject(session, channel, &message, ExitStatus::CommandFailure);
            return Ok(());
        };

        if let Err(denial) = authorize(&self.context.services, &user, &command).await {
            reject(session, channel, &denial.to_string(), ExitStatus::CommandFailure);
            return Ok(());
        }

        let repository = self.context.layout.repository_path(&command.project);
        if !repository.join("HEAD").is_file() {
            warn!(project = %command.project, "repository missing on disk");
            let message = format!("{} has no repository", command.project);
            reject(session, channel, &message, ExitStatus::CommandFailure);
            return Ok(());
        }

        let (input, rx) = input_pipe(MAX_PENDING_INPUT);
        self.inputs.insert(channel, input);

        let handle = session.handle();
        let lock = Arc::clone(&self.exec_lock);
        let git_protocol = self.git_protocol.clone();
        let service = command.service;

        tokio::spawn(async move {
            let _running = lock.lock_owned().await;
            info!(user = %user.login, project = %command.project, ?service, "serving git command");
            let status = run_service(&handle, channel, service, repository, git_protocol, rx).await;
            finish_remote(&handle, channel, status).await;
        });

        Ok(())
    }
}
