use std::io::Write;

use anyhow::Result;
use chrono::{DateTime, Utc};
use shared::{config::client::ClientConfig, models::HistoryQuery};
use uuid::Uuid;

use super::require_token;
use crate::transport::RestTransport;

/// Prints one JSON line per message in the conversation.
///
/// # Errors
/// Fails on transport errors or a rejected query.
pub async fn history(
    config: &ClientConfig,
    peer: Option<String>,
    group_id: Option<Uuid>,
    since: Option<DateTime<Utc>>,
    out: &mut impl Write,
) -> Result<()> {
    let rest = RestTransport::new(config, require_token(config)?)?;
    let response = rest
        .history(&HistoryQuery {
            peer,
            group_id,
            since,
        })
        .await?;
    for message in response.messages {
        writeln!(out, "{}", serde_json::to_string(&message)?)?;
    }
    Ok(())
}

/// Without a handle, lists everyone online; with one, prints its status.
///
/// # Errors
/// Fails on transport errors.
pub async fn online(config: &ClientConfig, handle: Option<&str>, out: &mut impl Write) -> Result<()> {
    let rest = RestTransport::new(config, require_token(config)?)?;
    match handle {
        Some(handle) => {
            let status = rest.online_status(handle).await?;
            writeln!(out, "{}", serde_json::to_string(&status)?)?;
        }
        None => {
            for user in rest.online_users().await? {
                writeln!(out, "{}", user.handle)?;
            }
        }
    }
    Ok(())
}
