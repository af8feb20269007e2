//! Shared test fixtures: an in-memory mock of the source client boundary and
//! small record builders. Compiled for tests only.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;

use crate::db::{Database, StoredMessage};
use crate::error::SourceError;
use crate::source::{
    ConnectionState, ContactInfo, GroupSnapshot, MediaPayload, Participant, RawMessage,
    SourceClient,
};

pub struct MockSourceClient {
    groups: Mutex<HashMap<String, GroupSnapshot>>,
    messages: Mutex<HashMap<String, Vec<RawMessage>>>,
    contacts: Mutex<HashMap<String, ContactInfo>>,
    media: Mutex<HashMap<String, MediaPayload>>,
    call_log: Mutex<Vec<String>>,
    contact_lookups: AtomicUsize,
    fail_contacts: AtomicBool,
    fail_groups: AtomicBool,
    fail_message_fetches: AtomicBool,
    fail_media: AtomicBool,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl MockSourceClient {
    pub fn new() -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connected);
        Self {
            groups: Mutex::new(HashMap::new()),
            messages: Mutex::new(HashMap::new()),
            contacts: Mutex::new(HashMap::new()),
            media: Mutex::new(HashMap::new()),
            call_log: Mutex::new(Vec::new()),
            contact_lookups: AtomicUsize::new(0),
            fail_contacts: AtomicBool::new(false),
            fail_groups: AtomicBool::new(false),
            fail_message_fetches: AtomicBool::new(false),
            fail_media: AtomicBool::new(false),
            state_tx,
            state_rx,
        }
    }

    pub fn add_group(&self, snapshot: GroupSnapshot) {
        self.groups.lock().unwrap().insert(snapshot.id.clone(), snapshot);
    }

    pub fn add_messages(&self, group_id: &str, msgs: Vec<RawMessage>) {
        self.messages.lock().unwrap().insert(group_id.to_string(), msgs);
    }

    pub fn add_contact(&self, contact: ContactInfo) {
        self.contacts.lock().unwrap().insert(contact.id.clone(), contact);
    }

    pub fn add_media(&self, message_id: &str, payload: MediaPayload) {
        self.media.lock().unwrap().insert(message_id.to_string(), payload);
    }

    pub fn fail_contact_lookups(&self) {
        self.fail_contacts.store(true, Ordering::SeqCst);
    }

    pub fn fail_group_fetches(&self) {
        self.fail_groups.store(true, Ordering::SeqCst);
    }

    pub fn fail_message_fetches(&self) {
        self.fail_message_fetches.store(true, Ordering::SeqCst);
    }

    pub fn fail_media_downloads(&self) {
        self.fail_media.store(true, Ordering::SeqCst);
    }

    pub fn contact_lookups(&self) -> usize {
        self.contact_lookups.load(Ordering::SeqCst)
    }

    pub fn call_log(&self) -> Vec<String> {
        self.call_log.lock().unwrap().clone()
    }

    pub fn set_state(&self, state: ConnectionState) {
        let _ = self.state_tx.send(state);
    }

    fn log(&self, entry: String) {
        self.call_log.lock().unwrap().push(entry);
    }
}

#[async_trait]
impl SourceClient for MockSourceClient {
    async fn fetch_group_by_id(&self, id: &str) -> Result<GroupSnapshot, SourceError> {
        self.log(format!("fetch_group:{id}"));
        if self.fail_groups.load(Ordering::SeqCst) {
            return Err(SourceError::Unavailable("mock group fetch failure".to_string()));
        }
        self.groups
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| SourceError::Unavailable(format!("unknown chat {id}")))
    }

    async fn fetch_recent_messages(
        &self,
        group_id: &str,
        limit: usize,
    ) -> Result<Vec<RawMessage>, SourceError> {
        self.log(format!("fetch_messages:{group_id}"));
        if self.fail_message_fetches.load(Ordering::SeqCst) {
            return Err(SourceError::Unavailable("mock message fetch failure".to_string()));
        }
        let msgs = self
            .messages
            .lock()
            .unwrap()
            .get(group_id)
            .cloned()
            .unwrap_or_default();
        Ok(msgs.into_iter().take(limit).collect())
    }

    async fn resolve_contact(&self, id: &str) -> Result<ContactInfo, SourceError> {
        self.contact_lookups.fetch_add(1, Ordering::SeqCst);
        if self.fail_contacts.load(Ordering::SeqCst) {
            return Err(SourceError::Lookup {
                id: id.to_string(),
                reason: "mock lookup failure".to_string(),
            });
        }
        self.contacts
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| SourceError::Lookup {
                id: id.to_string(),
                reason: "contact not found".to_string(),
            })
    }

    async fn download_media(&self, message_id: &str) -> Result<Option<MediaPayload>, SourceError> {
        if self.fail_media.load(Ordering::SeqCst) {
            return Err(SourceError::Media {
                id: message_id.to_string(),
                reason: "mock media failure".to_string(),
            });
        }
        Ok(self.media.lock().unwrap().get(message_id).cloned())
    }

    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }
}

pub fn group_snapshot(id: &str, name: &str, participant_ids: &[&str]) -> GroupSnapshot {
    GroupSnapshot {
        id: id.to_string(),
        name: name.to_string(),
        is_group: true,
        participants: participant_ids
            .iter()
            .map(|p| Participant { id: p.to_string() })
            .collect(),
    }
}

pub fn raw_message(id: &str, from_id: &str, author_id: Option<&str>, timestamp: i64) -> RawMessage {
    RawMessage {
        id: id.to_string(),
        body: Some(format!("body of {id}")),
        kind: "chat".to_string(),
        timestamp,
        from_id: from_id.to_string(),
        author_id: author_id.map(str::to_string),
        from_me: false,
        has_media: false,
        ack_state: 2,
    }
}

pub fn test_message(id: &str, group_id: &str, timestamp: i64) -> StoredMessage {
    StoredMessage {
        id: id.to_string(),
        group_id: group_id.to_string(),
        body: None,
        kind: "chat".to_string(),
        timestamp,
        timestamp_formatted: "2024-01-01 00:00:00".to_string(),
        from_number: "+14155550123".to_string(),
        from_name: None,
        author_raw_id: None,
        author_phone: None,
        is_from_me: false,
        has_media: false,
        media_path: None,
        ack_state: 2,
        scraped_at: Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
    }
}

pub fn test_config(database_url: &str, group_ids: &[&str]) -> crate::config::Config {
    crate::config::Config {
        database_url: database_url.to_string(),
        bridge_url: "http://localhost:3000".to_string(),
        groups: group_ids
            .iter()
            .map(|id| crate::config::GroupTarget {
                id: id.to_string(),
                name: None,
            })
            .collect(),
        scrape_schedule: "*/30 * * * *".to_string(),
        cleanup_schedule: "0 3 * * *".to_string(),
        timezone: "UTC".to_string(),
        scrape_max_messages: 500,
        group_delay: std::time::Duration::from_secs(5),
        retention_days: 30,
        media_enabled: false,
        media_dir: "data/media".to_string(),
    }
}

/// Opens a pooled database on a throwaway directory. The TempDir must be held
/// for the lifetime of the test or the backing file disappears.
pub fn test_database() -> (Database, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("test.db");
    let db = Database::open(path.to_str().unwrap()).expect("open test db");
    db.init_schema().expect("init schema");
    (db, dir)
}
