//! Repository commands

use std::io::Write;

use clap::{Args, Subcommand};
use codehost_core::directory::{MemoryDirectory, Project, ProjectRef, RepositoryKind, User};
use codehost_core::{CommitInfo, Config, PathMetadata, RepositoryStore};

/// Repository commands
#[derive(Args, Debug)]
pub struct RepoArgs {
    #[command(subcommand)]
    pub command: RepoCommand,
}

#[derive(Subcommand, Debug)]
pub enum RepoCommand {
    /// Create a bare repository and register its project
    Create {
        /// Project as owner/name
        project: ProjectRef,

        /// Anyone may read the project
        #[arg(long)]
        public: bool,
    },

    /// Delete a repository from disk
    Delete {
        project: ProjectRef,
    },

    /// List refs
    Branches {
        project: ProjectRef,
    },

    /// Show a page of history
    Log {
        project: ProjectRef,

        /// Zero-based page number
        #[arg(short, long, default_value_t = 0)]
        page: usize,

        /// Commits per page
        #[arg(short = 'n', long, default_value_t = 20)]
        size: usize,

        /// Start from this revision instead of HEAD
        #[arg(long)]
        until: Option<String>,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Describe a folder or file
    Show {
        project: ProjectRef,

        /// Path inside the repository; the root when omitted
        #[arg(default_value = "")]
        path: String,

        /// Branch to browse instead of HEAD
        #[arg(short, long)]
        branch: Option<String>,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Write a file's raw bytes at HEAD to stdout
    Raw {
        project: ProjectRef,
        path: String,
    },

    /// Show the diff introduced by a commit
    Patch {
        project: ProjectRef,
        revision: String,
    },

    /// Show a single commit
    Commit {
        project: ProjectRef,
        revision: String,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Rename a repository within its owner
    Rename {
        project: ProjectRef,
        new_name: String,
    },

    /// Copy a repository with all branches and tags
    Fork {
        project: ProjectRef,

        /// Fork as owner/name
        #[arg(long)]
        to: ProjectRef,
    },
}

impl RepoArgs {
    /// Execute the repo command
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let store = |project: &ProjectRef| RepositoryStore::from_config(config, project.clone());

        match &self.command {
            RepoCommand::Create { project, public } => {
                store(project).create()?;
                register_project(config, project, *public).await?;
                println!("Created {}", project);
            }
            RepoCommand::Delete { project } => {
                store(project).delete()?;
                println!("Deleted {}", project);
            }
            RepoCommand::Branches { project } => {
                for name in store(project).branches()? {
                    println!("{}", name);
                }
            }
            RepoCommand::Log {
                project,
                page,
                size,
                until,
                json,
            } => {
                let commits = store(project).history(*page, *size, until.as_deref())?;
                if *json {
                    println!("{}", serde_json::to_string_pretty(&commits)?);
                } else {
                    for commit in &commits {
                        print_commit_line(commit);
                    }
                }
            }
            RepoCommand::Show {
                project,
                path,
                branch,
                json,
            } => match store(project).metadata_at(branch.as_deref(), path)? {
                None => anyhow::bail!("{} not found in {}", display_path(path), project),
                Some(meta) if *json => println!("{}", serde_json::to_string_pretty(&meta)?),
                Some(meta) => print_metadata(&meta),
            },
            RepoCommand::Raw { project, path } => match store(project).raw_file_at(path)? {
                Some(bytes) => std::io::stdout().write_all(&bytes)?,
                None => anyhow::bail!("{} is not a file in {}", path, project),
            },
            RepoCommand::Patch { project, revision } => match store(project).patch(revision)? {
                Some(patch) => print!("{}", patch),
                None => anyhow::bail!("Unknown revision {}", revision),
            },
            RepoCommand::Commit {
                project,
                revision,
                json,
            } => match store(project).commit(revision)? {
                None => anyhow::bail!("Unknown revision {}", revision),
                Some(commit) if *json => println!("{}", serde_json::to_string_pretty(&commit)?),
                Some(commit) => {
                    println!("commit {}", commit.id);
                    if commit.parents.len() > 1 {
                        println!("Merge: {}", commit.parents.join(" "));
                    }
                    println!("Author: {} <{}>", commit.author_name, commit.author_email);
                    println!("Date:   {}", commit.time.to_rfc2822());
                    println!();
                    for line in commit.message.lines() {
                        println!("    {}", line);
                    }
                }
            },
            RepoCommand::Rename { project, new_name } => {
                let mut repo = store(project);
                if !repo.rename(new_name)? {
                    anyhow::bail!("Could not rename {} to {}", project, new_name);
                }
                println!("Renamed {} to {}", project, repo.project());
            }
            RepoCommand::Fork { project, to } => {
                let fork = store(project).fork(to.clone())?;
                register_project(config, to, false).await?;
                println!("Forked {} to {}", project, fork.project());
            }
        }

        Ok(())
    }
}

/// Record a new git project, and its owner if unknown, in the directory
async fn register_project(config: &Config, project: &ProjectRef, public: bool) -> anyhow::Result<()> {
    let directory = MemoryDirectory::load(&config.directory.path)?;

    let owner_known = directory
        .snapshot()
        .await
        .users
        .iter()
        .any(|u| u.login == project.owner);
    if !owner_known {
        directory
            .add_user(User {
                login: project.owner.clone(),
                name: String::new(),
            })
            .await?;
    }

    directory
        .add_project(Project {
            owner: project.owner.clone(),
            name: project.name.clone(),
            kind: RepositoryKind::Git,
            public,
        })
        .await?;
    Ok(())
}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "/"
    } else {
        path
    }
}

fn print_commit_line(commit: &CommitInfo) {
    println!(
        "{} {} {:<20} {}",
        commit.short_id,
        commit.time.format("%Y-%m-%d"),
        commit.author_name,
        commit.summary
    );
}

fn print_metadata(meta: &PathMetadata) {
    match meta {
        PathMetadata::Folder { path, entries } => {
            println!("{}", display_path(path));
            for (name, entry) in entries {
                let summary = entry
                    .last_commit
                    .as_ref()
                    .map(|c| format!("{} {}", c.short_id, c.summary))
                    .unwrap_or_default();
                println!("  {:<6} {:<30} {}", format!("{:?}", entry.kind).to_lowercase(), name, summary);
            }
        }
        PathMetadata::File {
            path,
            last_commit,
            size,
            binary,
            content,
        } => {
            println!("{} ({} bytes)", path, size);
            if let Some(commit) = last_commit {
                print_commit_line(commit);
            }
            println!();
            match content {
                Some(text) => print!("{}", text),
                None if *binary => println!("(binary file)"),
                None => println!("(file too large to display)"),
            }
        }
    }
}
