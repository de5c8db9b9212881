use chrono::{DateTime, Utc};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use shared::{
    config::client::ClientConfig,
    models::{
        ErrorResponse, HistoryQuery, HistoryResponse, Message, OnlineStatus, OnlineUsersResponse,
        PollResponse, SendMessageRequest, SendMessageResponse, UserSummary,
    },
};
use tracing::debug;
use url::Url;

use super::TransportError;

/// Request/response half of the transport: the send fallback, polling, and
/// the read-only presence and history endpoints.
#[derive(Debug, Clone)]
pub struct RestTransport {
    client: Client,
    base: Url,
    token: String,
}

impl RestTransport {
    /// # Errors
    /// Returns [`TransportError::Url`] when the configured server URL is invalid.
    pub fn new(config: &ClientConfig, token: impl Into<String>) -> Result<Self, TransportError> {
        Ok(Self {
            client: Client::new(),
            base: config.base_url()?,
            token: token.into(),
        })
    }

    /// `POST /api/messages`.
    ///
    /// # Errors
    /// Returns [`TransportError::Rejected`] with the server's reason on a
    /// non-success status.
    pub async fn send(&self, request: &SendMessageRequest) -> Result<Message, TransportError> {
        let response = self
            .client
            .post(self.base.join("api/messages")?)
            .bearer_auth(&self.token)
            .json(request)
            .send()
            .await?;
        let body: SendMessageResponse = decode(response).await?;
        Ok(body.data)
    }

    /// `GET /api/messages/poll?since=`.
    ///
    /// # Errors
    /// See [`RestTransport::send`].
    pub async fn poll(&self, since: Option<DateTime<Utc>>) -> Result<PollResponse, TransportError> {
        let mut url = self.base.join("api/messages/poll")?;
        if let Some(since) = since {
            url.query_pairs_mut()
                .append_pair("since", &since.to_rfc3339());
        }
        debug!(%url, "polling");
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        decode(response).await
    }

    /// # Errors
    /// See [`RestTransport::send`].
    pub async fn history(&self, query: &HistoryQuery) -> Result<HistoryResponse, TransportError> {
        let mut url = self.base.join("api/messages")?;
        {
            let mut pairs = url.query_pairs_mut();
            if let Some(peer) = &query.peer {
                pairs.append_pair("peer", peer);
            }
            if let Some(group_id) = query.group_id {
                pairs.append_pair("groupId", &group_id.to_string());
            }
            if let Some(since) = query.since {
                pairs.append_pair("since", &since.to_rfc3339());
            }
        }
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        decode(response).await
    }

    /// # Errors
    /// See [`RestTransport::send`].
    pub async fn online_users(&self) -> Result<Vec<UserSummary>, TransportError> {
        let response = self
            .client
            .get(self.base.join("api/users/online")?)
            .bearer_auth(&self.token)
            .send()
            .await?;
        let body: OnlineUsersResponse = decode(response).await?;
        Ok(body.users)
    }

    /// # Errors
    /// See [`RestTransport::send`].
    pub async fn online_status(&self, handle: &str) -> Result<OnlineStatus, TransportError> {
        let mut url = self.base.join("api/users/")?;
        url.path_segments_mut()
            .map_err(|()| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .extend([handle, "online"]);
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    let text = response.text().await.unwrap_or_default();
    let reason = serde_json::from_str::<ErrorResponse>(&text)
        .map(|body| body.message)
        .unwrap_or(text);
    Err(TransportError::Rejected {
        status: status.as_u16(),
        reason,
    })
}
