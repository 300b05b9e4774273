//! SSH listener lifecycle

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use codehost_core::config::SshConfig;
use codehost_core::RepoLayout;
use russh::server;
use russh::MethodSet;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::auth::Services;
use crate::host_key;
use crate::session::{SessionContext, SshSession};

/// Listener state as reported to the hosting process
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TransportHealth {
    Running { port: u16 },
    /// The listener could not start; the process keeps running without it
    Disabled { reason: String },
    Stopped,
}

/// The SSH transport: one listener, one task per connection
pub struct TransportServer {
    config: SshConfig,
    context: Arc<SessionContext>,
    health: TransportHealth,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl TransportServer {
    pub fn new(config: SshConfig, layout: RepoLayout, services: Services) -> Self {
        let context = Arc::new(SessionContext {
            services,
            layout,
            service_account: config.service_account.clone(),
            site_name: config.site_name.clone(),
        });
        Self {
            config,
            context,
            health: TransportHealth::Stopped,
            shutdown: None,
            task: None,
        }
    }

    pub fn health(&self) -> TransportHealth {
        self.health.clone()
    }

    /// Bind the listener and start accepting connections
    ///
    /// Failures do not propagate: they leave the transport `Disabled` with
    /// the reason.
    pub async fn start(&mut self) -> TransportHealth {
        if self.task.is_some() {
            return self.health();
        }

        if !self.config.enabled {
            self.health = TransportHealth::Disabled {
                reason: "SSH transport is disabled in configuration".to_string(),
            };
            return self.health();
        }

        match self.bind().await {
            Ok((listener, config, port)) => {
                let (tx, rx) = oneshot::channel();
                let context = Arc::clone(&self.context);
                self.task = Some(tokio::spawn(accept_loop(listener, config, context, rx)));
                self.shutdown = Some(tx);
                self.health = TransportHealth::Running { port };
                info!(address = %self.config.listen_address, port, "SSH transport listening");
            }
            Err(e) => {
                error!(error = %format!("{:#}", e), "SSH transport disabled");
                self.health = TransportHealth::Disabled {
                    reason: format!("{:#}", e),
                };
            }
        }
        self.health()
    }

    /// Stop accepting connections; sessions already running finish on their own
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "SSH listener task failed");
            }
        }
        self.health = TransportHealth::Stopped;
    }

    async fn bind(&self) -> Result<(TcpListener, Arc<server::Config>, u16)> {
        let port = u16::try_from(self.config.port)
            .map_err(|_| anyhow!("port {} is out of range (0-65535)", self.config.port))?;

        let host_key = host_key::load_or_generate(&self.config.host_key_path)?;

        let config = Arc::new(server::Config {
            keys: vec![host_key],
            methods: MethodSet::PUBLICKEY,
            inactivity_timeout: Some(self.config.inactivity_timeout),
            auth_rejection_time: Duration::from_secs(1),
            auth_rejection_time_initial: Some(Duration::from_secs(0)),
            ..Default::default()
        });

        let listener = TcpListener::bind((self.config.listen_address.as_str(), port))
            .await
            .with_context(|| {
                format!("cannot listen on {}:{}", self.config.listen_address, port)
            })?;
        let port = listener.local_addr()?.port();

        Ok((listener, config, port))
    }
}

async fn accept_loop(
    listener: TcpListener,
    config: Arc<server::Config>,
    context: Arc<SessionContext>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    spawn_session(stream, peer, Arc::clone(&config), Arc::clone(&context));
                }
                Err(e) => warn!(error = %e, "failed to accept SSH connection"),
            },
        }
    }
    info!("SSH listener stopped");
}

fn spawn_session(
    stream: tokio::net::TcpStream,
    peer: SocketAddr,
    config: Arc<server::Config>,
    context: Arc<SessionContext>,
) {
    debug!(peer = %peer, "new SSH connection");
    let handler = SshSession::new(context, Some(peer));

    tokio::spawn(async move {
        let result = match server::run_stream(config, stream, handler).await {
            Ok(session) => session.await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            debug!(peer = %peer, error = %e, "SSH session ended with error");
        }
    });
}
