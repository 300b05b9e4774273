//! Run the SSH transport

use std::sync::Arc;

use clap::Args;
use codehost_core::directory::MemoryDirectory;
use codehost_core::{Config, RepoLayout};
use codehost_ssh::{Services, TransportHealth, TransportServer};

/// Serve git over SSH until interrupted
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Print the listener health as JSON once started
    #[arg(long)]
    pub json: bool,
}

impl ServeArgs {
    /// Execute the serve command
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let directory = Arc::new(MemoryDirectory::load(&config.directory.path)?);
        let mut server = TransportServer::new(
            config.ssh.clone(),
            RepoLayout::from_config(&config.storage),
            Services::from_directory(directory),
        );

        let health = server.start().await;
        if self.json {
            println!("{}", serde_json::to_string(&health)?);
        }

        match health {
            TransportHealth::Running { port } => {
                println!("Serving git over SSH on {}:{}", config.ssh.listen_address, port);
                tokio::signal::ctrl_c().await?;
                tracing::info!("Shutting down");
                server.stop().await;
                Ok(())
            }
            TransportHealth::Disabled { reason } => {
                anyhow::bail!("SSH transport disabled: {}", reason)
            }
            TransportHealth::Stopped => Ok(()),
        }
    }
}
