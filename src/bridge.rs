use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::SourceError;
use crate::source::{
    ConnectionState, ContactInfo, GroupSnapshot, MediaPayload, RawMessage, SourceClient,
};

#[derive(Deserialize)]
struct StatusResponse {
    connected: bool,
}

/// Source client backed by a sidecar process that owns the actual chat
/// session (auth, pairing, reconnects) and exposes it over plain HTTP.
/// This adapter only translates requests and tracks reachability.
pub struct HttpSourceClient {
    http: reqwest::Client,
    base_url: String,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl HttpSourceClient {
    pub fn new(base_url: &str) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            state_tx,
            state_rx,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current != state {
                info!(?state, "source bridge connection state changed");
                *current = state;
                true
            } else {
                false
            }
        });
    }

    /// Probes the sidecar once and updates the connection state.
    pub async fn probe(&self) -> bool {
        match self.get_json::<StatusResponse>("/status").await {
            Ok(status) if status.connected => {
                self.set_state(ConnectionState::Connected);
                true
            }
            Ok(_) => {
                // Sidecar reachable but its chat session is still pairing.
                self.set_state(ConnectionState::Connecting);
                false
            }
            Err(e) => {
                debug!(error = %e, "bridge probe failed");
                self.set_state(ConnectionState::Disconnected);
                false
            }
        }
    }

    /// Keeps the connection state fresh by probing on an interval.
    pub fn start_monitor(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.probe().await;
            }
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, SourceError> {
        let response = self
            .http
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| SourceError::Unavailable(format!("GET {path}: {e}")))?;
        if !response.status().is_success() {
            return Err(SourceError::Unavailable(format!(
                "GET {path}: HTTP {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| SourceError::Unavailable(format!("GET {path}: invalid body: {e}")))
    }
}

#[async_trait]
impl SourceClient for HttpSourceClient {
    async fn fetch_group_by_id(&self, id: &str) -> Result<GroupSnapshot, SourceError> {
        self.get_json(&format!("/groups/{id}")).await
    }

    async fn fetch_recent_messages(
        &self,
        group_id: &str,
        limit: usize,
    ) -> Result<Vec<RawMessage>, SourceError> {
        self.get_json(&format!("/groups/{group_id}/messages?limit={limit}"))
            .await
    }

    async fn resolve_contact(&self, id: &str) -> Result<ContactInfo, SourceError> {
        self.get_json(&format!("/contacts/{id}"))
            .await
            .map_err(|e| SourceError::Lookup {
                id: id.to_string(),
                reason: e.to_string(),
            })
    }

    async fn download_media(&self, message_id: &str) -> Result<Option<MediaPayload>, SourceError> {
        let path = format!("/messages/{message_id}/media");
        let response = self
            .http
            .get(self.url(&path))
            .send()
            .await
            .map_err(|e| SourceError::Media {
                id: message_id.to_string(),
                reason: e.to_string(),
            })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(SourceError::Media {
                id: message_id.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = response.bytes().await.map_err(|e| SourceError::Media {
            id: message_id.to_string(),
            reason: e.to_string(),
        })?;

        if bytes.is_empty() {
            warn!(message = %message_id, "bridge returned empty media payload");
            return Ok(None);
        }
        Ok(Some(MediaPayload {
            mime_type,
            bytes: bytes.to_vec(),
        }))
    }

    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_normalized() {
        let client = HttpSourceClient::new("http://localhost:3000/");
        assert_eq!(client.url("/status"), "http://localhost:3000/status");
    }

    #[test]
    fn starts_disconnected() {
        let client = HttpSourceClient::new("http://localhost:3000");
        assert_eq!(*client.connection_state().borrow(), ConnectionState::Disconnected);
    }
}
