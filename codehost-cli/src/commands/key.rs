//! Key registration commands

use std::path::PathBuf;

use clap::{Args, Subcommand};
use codehost_core::directory::{KeyRegistry, MemoryDirectory};
use codehost_core::{Config, RegisteredKey};

/// Key management commands
#[derive(Args, Debug)]
pub struct KeyArgs {
    #[command(subcommand)]
    pub command: KeyCommand,
}

#[derive(Subcommand, Debug)]
pub enum KeyCommand {
    /// Register an OpenSSH public key for a user
    Add {
        /// User the key belongs to
        user: String,

        /// Key line (`<algorithm> <base64> [comment]`)
        #[arg(required_unless_present = "file")]
        key: Option<String>,

        /// Read the key line from a .pub file
        #[arg(short, long, conflicts_with = "key")]
        file: Option<PathBuf>,

        /// Comment shown with the key
        #[arg(short, long)]
        comment: Option<String>,
    },

    /// List registered keys
    List {
        /// Only keys of this user
        #[arg(short, long)]
        user: Option<String>,
    },
}

impl KeyArgs {
    /// Execute the key command
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let directory = MemoryDirectory::load(&config.directory.path)?;

        match &self.command {
            KeyCommand::Add {
                user,
                key,
                file,
                comment,
            } => {
                let line = match (key, file) {
                    (Some(line), _) => line.clone(),
                    (None, Some(path)) => std::fs::read_to_string(path)?,
                    (None, None) => anyhow::bail!("Provide a key line or --file"),
                };

                let key = RegisteredKey::parse(&line, comment.as_deref(), user.as_str())?;
                let fingerprint = key.fingerprint.clone();
                directory.register(key).await?;
                println!("Added key {} for {}", fingerprint, user);
            }
            KeyCommand::List { user } => {
                let keys = directory.snapshot().await.keys;
                for key in keys
                    .iter()
                    .filter(|k| user.as_ref().map_or(true, |u| &k.user == u))
                {
                    let last_used = key
                        .last_used
                        .map(humanize)
                        .unwrap_or_else(|| "never used".to_string());
                    println!("{:<12} {}  {}  ({})", key.user, key.fingerprint, key.comment, last_used);
                }
            }
        }

        Ok(())
    }
}

fn humanize(at: std::time::SystemTime) -> String {
    match at.elapsed() {
        Ok(ago) => format!("last used {}s ago", ago.as_secs()),
        Err(_) => "last used just now".to_string(),
    }
}
