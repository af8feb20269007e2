use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::db::StoredMessage;
use crate::error::NormalizeError;
use crate::identity::{normalize_phone, phone_from_id, phone_from_plausible_local, IdentityMap};
use crate::source::{ContactInfo, RawMessage, SourceClient};

const SQLITE_DATETIME: &str = "%Y-%m-%d %H:%M:%S";

/// Converts raw messages into canonical stored records for one scrape.
/// Holds no state across messages; the identity map is threaded through
/// each call explicitly.
pub struct Normalizer<'a> {
    client: &'a dyn SourceClient,
    /// When set, media attachments are downloaded and written under this
    /// directory; when `None`, media capture is disabled.
    media_dir: Option<PathBuf>,
}

impl<'a> Normalizer<'a> {
    pub fn new(client: &'a dyn SourceClient, media_dir: Option<PathBuf>) -> Self {
        Self { client, media_dir }
    }

    pub async fn normalize(
        &self,
        group_id: &str,
        msg: &RawMessage,
        identities: &IdentityMap,
    ) -> Result<StoredMessage, NormalizeError> {
        let timestamp_formatted = DateTime::from_timestamp(msg.timestamp, 0)
            .ok_or_else(|| NormalizeError::InvalidTimestamp {
                id: msg.id.clone(),
                timestamp: msg.timestamp,
            })?
            .format(SQLITE_DATETIME)
            .to_string();

        let author_id = msg.raw_author_id();
        let contact = match self.client.resolve_contact(author_id).await {
            Ok(c) => Some(c),
            Err(e) => {
                debug!(message = %msg.id, error = %e, "contact unavailable, resolution degrades");
                None
            }
        };

        let author_phone = resolve_sender(author_id, contact.as_ref(), identities);
        let from_name = resolve_display_name(msg, contact.as_ref());

        let media_path = if msg.has_media {
            self.capture_media(&msg.id).await
        } else {
            None
        };

        Ok(StoredMessage {
            id: msg.id.clone(),
            group_id: group_id.to_string(),
            body: msg.body.clone(),
            kind: msg.kind.clone(),
            timestamp: msg.timestamp,
            timestamp_formatted,
            from_number: phone_from_id(&msg.from_id).unwrap_or_else(|| msg.from_id.clone()),
            from_name,
            author_raw_id: msg.author_id.clone(),
            author_phone,
            is_from_me: msg.from_me,
            has_media: msg.has_media,
            media_path,
            ack_state: msg.ack_state,
            scraped_at: Utc::now().format(SQLITE_DATETIME).to_string(),
        })
    }

    /// Downloads and stores the media payload for a message, addressed by the
    /// message id. A fetch or write failure only degrades `media_path` to
    /// absent; the message itself is still stored.
    async fn capture_media(&self, message_id: &str) -> Option<String> {
        let dir = self.media_dir.as_ref()?;
        match self.client.download_media(message_id).await {
            Ok(Some(payload)) => {
                let file = dir.join(format!(
                    "{}.{}",
                    sanitize_id(message_id),
                    extension_for(&payload.mime_type)
                ));
                match write_media(dir, &file, &payload.bytes) {
                    Ok(()) => Some(file.to_string_lossy().into_owned()),
                    Err(e) => {
                        warn!(message = %message_id, error = %e, "failed to write media file");
                        None
                    }
                }
            }
            Ok(None) => None,
            Err(e) => {
                warn!(message = %message_id, error = %e, "media download failed");
                None
            }
        }
    }
}

/// Canonical sender resolution. Strict fallback chain, first match wins:
/// identity map entry for the raw author id, contact's own number, contact's
/// phone-bearing id (or its map entry), phone-bearing author id, then the
/// bare 10-15 digit local-part heuristic. Anything else stays unresolved.
pub fn resolve_sender(
    author_id: &str,
    contact: Option<&ContactInfo>,
    identities: &IdentityMap,
) -> Option<String> {
    if let Some(mapped) = identities.get(author_id) {
        return Some(mapped.clone());
    }
    if let Some(contact) = contact {
        if let Some(number) = contact.number.as_deref().filter(|n| !n.is_empty()) {
            return Some(normalize_phone(number));
        }
        if let Some(phone) = phone_from_id(&contact.id) {
            return Some(phone);
        }
        if let Some(mapped) = identities.get(&contact.id) {
            return Some(mapped.clone());
        }
    }
    if let Some(phone) = phone_from_id(author_id) {
        return Some(phone);
    }
    phone_from_plausible_local(author_id)
}

/// Display name: contact pushname, then contact name, then the raw from id.
pub fn resolve_display_name(msg: &RawMessage, contact: Option<&ContactInfo>) -> Option<String> {
    if let Some(contact) = contact {
        if let Some(pushname) = contact.pushname.as_deref().filter(|n| !n.is_empty()) {
            return Some(pushname.to_string());
        }
        if let Some(name) = contact.name.as_deref().filter(|n| !n.is_empty()) {
            return Some(name.to_string());
        }
    }
    Some(msg.from_id.clone())
}

fn write_media(dir: &Path, file: &Path, bytes: &[u8]) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    std::fs::write(file, bytes)
}

fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn extension_for(mime_type: &str) -> &'static str {
    match mime_type {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "video/mp4" => "mp4",
        "audio/ogg" | "audio/ogg; codecs=opus" => "ogg",
        "audio/mpeg" => "mp3",
        "application/pdf" => "pdf",
        _ => "bin",
    }
}
