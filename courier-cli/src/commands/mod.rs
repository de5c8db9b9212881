pub mod completion;
pub mod config;
pub mod messaging;
pub mod query;

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use shared::config::client::ClientConfig;
use tracing::debug;

use crate::cli::{Cli, Commands, ConnectionArgs};

/// `~/.config/courier/client.yaml` or the platform equivalent.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("chat", "courier", "courier")
        .map(|dirs| dirs.config_dir().join("client.yaml"))
}

/// Flags win over the environment, which wins over the file.
///
/// # Errors
/// Fails on an unreadable or invalid configuration.
pub fn resolve_config(args: &ConnectionArgs) -> Result<ClientConfig> {
    let path = args
        .config
        .clone()
        .or_else(|| default_config_path().filter(|path| path.exists()));
    debug!(?path, "loading client configuration");

    let mut config = ClientConfig::load(path).context("failed to load client configuration")?;
    if let Some(server) = &args.server {
        config.server_url.clone_from(server);
    }
    if let Some(token) = &args.token {
        config.token = Some(token.clone());
    }
    config
        .validate()
        .map_err(|errors| anyhow!("invalid client configuration: {}", errors.join("; ")))?;
    Ok(config)
}

/// # Errors
/// Fails when no credential was supplied anywhere.
pub fn require_token(config: &ClientConfig) -> Result<String> {
    config
        .token
        .clone()
        .filter(|token| !token.trim().is_empty())
        .ok_or_else(|| anyhow!("no token; pass --token or set COURIER_TOKEN"))
}

/// Runs one parsed command line, writing results to stdout.
///
/// # Errors
/// Propagates the failing command's error.
pub async fn run(cli: Cli) -> Result<()> {
    let mut stdout = std::io::stdout();
    match cli.command {
        Commands::Completion { shell } => {
            completion::generate_completion(shell, &mut stdout);
            Ok(())
        }
        Commands::Config { format } => config::generate_config(&format, &mut stdout),
        Commands::Send { receiver, content } => {
            let config = resolve_config(&cli.connection)?;
            messaging::send(config, messaging::Recipient::Direct(receiver), &content, &mut stdout)
                .await
        }
        Commands::SendGroup { group_id, content } => {
            let config = resolve_config(&cli.connection)?;
            messaging::send(config, messaging::Recipient::Group(group_id), &content, &mut stdout)
                .await
        }
        Commands::Listen { groups, duration } => {
            let config = resolve_config(&cli.connection)?;
            let limit = duration.map(std::time::Duration::from_secs);
            messaging::listen(config, &groups, limit).await
        }
        Commands::History {
            peer,
            group_id,
            since,
        } => {
            let config = resolve_config(&cli.connection)?;
            query::history(&config, peer, group_id, since, &mut stdout).await
        }
        Commands::Online { handle } => {
            let config = resolve_config(&cli.connection)?;
            query::online(&config, handle.as_deref(), &mut stdout).await
        }
    }
}
