use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::watch;

use crate::error::SourceError;

/// Connection state of the underlying chat client. The session itself
/// (auth, pairing, reconnects) is owned by the source side; the pipeline
/// only observes the state through a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Snapshot of a group chat at fetch time.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupSnapshot {
    pub id: String,
    pub name: String,
    pub is_group: bool,
    #[serde(default)]
    pub participants: Vec<Participant>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Participant {
    pub id: String,
}

/// Contact record as the source knows it. `number` is the source's own idea
/// of the contact's phone number and may be missing for privacy-restricted
/// or linked-device identities.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContactInfo {
    pub id: String,
    pub number: Option<String>,
    pub pushname: Option<String>,
    pub name: Option<String>,
}

/// One raw message as fetched from the source, prior to normalization.
#[derive(Debug, Clone, Deserialize)]
pub struct RawMessage {
    pub id: String,
    pub body: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    /// Source-assigned epoch seconds. Immutable once stored.
    pub timestamp: i64,
    pub from_id: String,
    /// Present for group messages: the actual sender within the group.
    pub author_id: Option<String>,
    #[serde(default)]
    pub from_me: bool,
    #[serde(default)]
    pub has_media: bool,
    #[serde(default)]
    pub ack_state: i64,
}

impl RawMessage {
    /// The identifier to resolve the sender from: the in-group author when
    /// present, otherwise the top-level from id.
    pub fn raw_author_id(&self) -> &str {
        self.author_id.as_deref().unwrap_or(&self.from_id)
    }
}

/// Downloaded media payload.
#[derive(Debug, Clone)]
pub struct MediaPayload {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Boundary to the external chat client. The pipeline depends on this trait
/// only; connection lifecycle, auth and session management live behind it.
#[async_trait]
pub trait SourceClient: Send + Sync {
    async fn fetch_group_by_id(&self, id: &str) -> Result<GroupSnapshot, SourceError>;

    async fn fetch_recent_messages(
        &self,
        group_id: &str,
        limit: usize,
    ) -> Result<Vec<RawMessage>, SourceError>;

    async fn resolve_contact(&self, id: &str) -> Result<ContactInfo, SourceError>;

    /// Returns `Ok(None)` when the message has no downloadable media.
    async fn download_media(&self, message_id: &str) -> Result<Option<MediaPayload>, SourceError>;

    /// Subscribe to connection state changes. The orchestrator checks the
    /// current value before scraping and refuses to start a run while the
    /// client is not connected.
    fn connection_state(&self) -> watch::Receiver<ConnectionState>;
}
