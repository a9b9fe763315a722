//! CLI for usync folder synchronization.

mod commands;
mod identity;
mod interrupt;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use usync_core::config;
use usync_core::relay::{DirRelay, Relay};
use usync_core::store::Store;

use commands::{
    run_add, run_consume, run_publish, run_shares, run_status, run_tasks,
};

/// Top-level CLI for usync.
#[derive(Debug, Parser)]
#[command(name = "usync")]
#[command(about = "usync: sync folders through an append-only Usenet relay", long_about = None)]
pub struct Cli {
    /// Directory-backed relay root (default: the XDG data dir). The NNTP
    /// transport is pluggable; this backend needs no server at all.
    #[arg(long, global = true, value_name = "DIR")]
    pub relay_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Create the config, identity, and store if they do not exist yet.
    Init,

    /// Register a local folder for syncing.
    Add {
        /// Folder to index and publish later.
        path: PathBuf,
        /// Display name (default: the directory name).
        #[arg(long)]
        name: Option<String>,
    },

    /// Scan, upload, and publish one folder; prints the share handle.
    Publish {
        /// Folder identifier (see `usync status`).
        folder_id: String,
        /// Password-protect the share.
        #[arg(long, conflicts_with = "users")]
        password: Option<String>,
        /// Grant access to a user id (repeatable). Makes the share private.
        #[arg(long = "user")]
        users: Vec<String>,
    },

    /// Download a share into a destination directory.
    Consume {
        /// Share handle printed by `usync publish`.
        handle: String,
        /// Destination directory (created if missing).
        destination: PathBuf,
        /// Password for protected shares.
        #[arg(long)]
        password: Option<String>,
        /// Your user id, for private shares.
        #[arg(long, requires = "root")]
        user: Option<String>,
        /// Hex folder root conveyed when you were granted access.
        #[arg(long, requires = "user")]
        root: Option<String>,
    },

    /// Show folders, per-folder stats, and queue counts.
    Status,

    /// List published shares.
    Shares {
        /// Restrict to one folder.
        #[arg(long)]
        folder_id: Option<String>,
    },

    /// Show upload/download task queues.
    Tasks,

    /// Generate shell completions.
    Completions {
        /// Shell to generate for.
        shell: clap_complete::Shell,
    },

    /// Generate a man page to stdout.
    #[command(hide = true)]
    Man,
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();

        // Commands with no engine behind them.
        match &cli.command {
            CliCommand::Completions { shell } => {
                let mut cmd = Cli::command();
                clap_complete::generate(*shell, &mut cmd, "usync", &mut std::io::stdout());
                return Ok(());
            }
            CliCommand::Man => {
                let man = clap_mangen::Man::new(Cli::command());
                man.render(&mut std::io::stdout())?;
                return Ok(());
            }
            _ => {}
        }

        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);
        let store = Store::open_default().await?;
        let actor = identity::load_or_create()?;
        let relay = open_relay(cli.relay_dir.clone())?;

        match cli.command {
            CliCommand::Init => {
                println!("config:  {}", config::config_path()?.display());
                println!("identity ready for user '{}'", actor.user_id);
                println!("store and relay initialized");
            }
            CliCommand::Add { path, name } => run_add(&store, &actor, &path, name).await?,
            CliCommand::Publish {
                folder_id,
                password,
                users,
            } => run_publish(&store, &relay, &actor, &cfg, &folder_id, password, users).await?,
            CliCommand::Consume {
                handle,
                destination,
                password,
                user,
                root,
            } => {
                run_consume(&store, &relay, &cfg, &handle, &destination, password, user, root)
                    .await?
            }
            CliCommand::Status => run_status(&store).await?,
            CliCommand::Shares { folder_id } => run_shares(&store, folder_id.as_deref()).await?,
            CliCommand::Tasks => run_tasks(&store).await?,
            CliCommand::Completions { .. } | CliCommand::Man => unreachable!("handled above"),
        }

        Ok(())
    }
}

fn open_relay(relay_dir: Option<PathBuf>) -> Result<Arc<dyn Relay>> {
    let dir = match relay_dir {
        Some(dir) => dir,
        None => xdg::BaseDirectories::with_prefix("usync")
            .context("resolving XDG dirs")?
            .create_data_directory("articles")
            .context("creating article directory")?,
    };
    let relay = DirRelay::open(&dir)
        .with_context(|| format!("opening relay directory {}", dir.display()))?;
    Ok(Arc::new(relay))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_publish_with_users() {
        let cli = Cli::parse_from([
            "usync", "publish", "abc", "--user", "u1", "--user", "u2",
        ]);
        match cli.command {
            CliCommand::Publish { users, password, .. } => {
                assert_eq!(users, vec!["u1", "u2"]);
                assert!(password.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn consume_root_requires_user() {
        assert!(Cli::try_parse_from([
            "usync", "consume", "H.ANDLE", "/tmp/out", "--root", "aa"
        ])
        .is_err());
    }
}
