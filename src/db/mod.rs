use std::path::Path;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::OptionalExtension;
use tracing::{debug, info};

use crate::error::StorageError;

pub type DbConn = PooledConnection<SqliteConnectionManager>;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS groups (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        participant_count INTEGER NOT NULL DEFAULT 0,
        created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
    );

    CREATE TABLE IF NOT EXISTS messages (
        id TEXT PRIMARY KEY,
        group_id TEXT NOT NULL REFERENCES groups(id),
        body TEXT,
        type TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        timestamp_formatted DATETIME NOT NULL,
        from_number TEXT NOT NULL,
        from_name TEXT,
        author_raw_id TEXT,
        author_phone TEXT,
        is_from_me BOOLEAN NOT NULL DEFAULT FALSE,
        has_media BOOLEAN NOT NULL DEFAULT FALSE,
        media_path TEXT,
        ack_state INTEGER NOT NULL DEFAULT 0,
        scraped_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
    CREATE INDEX IF NOT EXISTS idx_messages_group ON messages (group_id);
    CREATE INDEX IF NOT EXISTS idx_messages_timestamp ON messages (timestamp);

    CREATE TABLE IF NOT EXISTS scrape_runs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        group_id TEXT NOT NULL,
        messages_scraped INTEGER NOT NULL DEFAULT 0,
        started_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
        ended_at DATETIME,
        status TEXT NOT NULL DEFAULT 'in_progress',
        error_message TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_runs_group ON scrape_runs (group_id);
";

#[derive(Debug, Clone)]
pub struct GroupRecord {
    pub id: String,
    pub name: String,
    pub participant_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// One persisted message. `timestamp` is source-assigned epoch seconds and
/// never mutated once written; rows are removed only by retention cleanup.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: String,
    pub group_id: String,
    pub body: Option<String>,
    pub kind: String,
    pub timestamp: i64,
    pub timestamp_formatted: String,
    pub from_number: String,
    pub from_name: Option<String>,
    pub author_raw_id: Option<String>,
    pub author_phone: Option<String>,
    pub is_from_me: bool,
    pub has_media: bool,
    pub media_path: Option<String>,
    pub ack_state: i64,
    pub scraped_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    InProgress,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::InProgress => "in_progress",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "completed" => RunStatus::Completed,
            "failed" => RunStatus::Failed,
            _ => RunStatus::InProgress,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScrapeRunRecord {
    pub id: i64,
    pub group_id: String,
    pub messages_scraped: i64,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub status: RunStatus,
    pub error_message: Option<String>,
}

/// Persistence gateway. Sole owner of the three tables; shared across the
/// process as a cloneable handle over an r2d2 connection pool. Each operation
/// acquires a pooled connection for its own duration only.
#[derive(Clone)]
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    pub fn open(database_path: &str) -> Result<Self, StorageError> {
        if let Some(parent) = Path::new(database_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).ok();
            }
        }

        let manager = SqliteConnectionManager::file(database_path).with_init(|conn| {
            conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")
        });

        // SQLite under WAL works best with a small pool: many readers, one
        // writer at a time.
        let pool = Pool::builder().max_size(8).build(manager)?;

        info!("Database: opened {}", database_path);
        Ok(Self { pool })
    }

    fn conn(&self) -> Result<DbConn, StorageError> {
        Ok(self.pool.get()?)
    }

    pub fn init_schema(&self) -> Result<(), StorageError> {
        self.conn()?.execute_batch(SCHEMA)?;
        debug!("Database: schema initialized");
        Ok(())
    }

    /// Runs a gateway operation on the blocking thread pool. rusqlite calls
    /// are synchronous; this keeps them off the async executor threads.
    pub async fn run_blocking<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, StorageError> + Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| StorageError::Join(e.to_string()))?
    }

    /// Escape hatch for tests that need to corrupt or inspect state directly.
    #[cfg(test)]
    pub fn raw_execute(&self, sql: &str) -> Result<usize, StorageError> {
        Ok(self.conn()?.execute(sql, [])?)
    }

    // --- Groups ---

    /// Insert-or-update keyed on id. `updated_at` is always refreshed;
    /// `created_at` is preserved from the first scrape.
    pub fn upsert_group(&self, id: &str, name: &str, participant_count: i64) -> Result<(), StorageError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO groups (id, name, participant_count)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                 name = ?2,
                 participant_count = ?3,
                 updated_at = CURRENT_TIMESTAMP",
            (id, name, participant_count),
        )?;
        Ok(())
    }

    pub fn get_group(&self, id: &str) -> Result<Option<GroupRecord>, StorageError> {
        let conn = self.conn()?;
        let group = conn
            .query_row(
                "SELECT id, name, participant_count, created_at, updated_at
                 FROM groups WHERE id = ?1",
                [id],
                |row| {
                    Ok(GroupRecord {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        participant_count: row.get(2)?,
                        created_at: row.get(3)?,
                        updated_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(group)
    }

    pub fn list_groups(&self) -> Result<Vec<GroupRecord>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, participant_count, created_at, updated_at
             FROM groups ORDER BY name",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(GroupRecord {
                id: row.get(0)?,
                name: row.get(1)?,
                participant_count: row.get(2)?,
                created_at: row.get(3)?,
                updated_at: row.get(4)?,
            })
        })?;
        let mut groups = Vec::new();
        for row in rows {
            groups.push(row?);
        }
        Ok(groups)
    }

    // --- Messages ---

    /// Inserts one message. Message ids are globally unique and source
    /// assigned, so a primary-key conflict means the message was already
    /// harvested by an earlier run: the insert is silently ignored and
    /// `false` is returned. This is the sole deduplication mechanism.
    pub fn insert_message(&self, msg: &StoredMessage) -> Result<bool, StorageError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO messages
                 (id, group_id, body, type, timestamp, timestamp_formatted,
                  from_number, from_name, author_raw_id, author_phone,
                  is_from_me, has_media, media_path, ack_state, scraped_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            rusqlite::params![
                msg.id,
                msg.group_id,
                msg.body,
                msg.kind,
                msg.timestamp,
                msg.timestamp_formatted,
                msg.from_number,
                msg.from_name,
                msg.author_raw_id,
                msg.author_phone,
                msg.is_from_me,
                msg.has_media,
                msg.media_path,
                msg.ack_state,
                msg.scraped_at,
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn messages_for_group(&self, group_id: &str, limit: usize) -> Result<Vec<StoredMessage>, StorageError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE group_id = ?1 ORDER BY timestamp DESC LIMIT ?2"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map((group_id, limit as i64), message_from_row)?;
        collect_messages(rows)
    }

    pub fn messages_between(
        &self,
        group_id: &str,
        from_epoch: i64,
        to_epoch: i64,
    ) -> Result<Vec<StoredMessage>, StorageError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE group_id = ?1 AND timestamp >= ?2 AND timestamp <= ?3
             ORDER BY timestamp"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map((group_id, from_epoch, to_epoch), message_from_row)?;
        collect_messages(rows)
    }

    pub fn search_messages(
        &self,
        group_id: Option<&str>,
        query: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StorageError> {
        let conn = self.conn()?;
        let pattern = format!("%{query}%");
        let messages = if let Some(gid) = group_id {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE group_id = ?1 AND body LIKE ?2
                 ORDER BY timestamp DESC LIMIT ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map((gid, pattern, limit as i64), message_from_row)?;
            collect_messages(rows)?
        } else {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE body LIKE ?1 ORDER BY timestamp DESC LIMIT ?2"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map((pattern, limit as i64), message_from_row)?;
            collect_messages(rows)?
        };
        debug!("Database: search returned {} results", messages.len());
        Ok(messages)
    }

    pub fn count_messages(&self, group_id: Option<&str>) -> Result<i64, StorageError> {
        let conn = self.conn()?;
        let count = match group_id {
            Some(gid) => conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE group_id = ?1",
                [gid],
                |row| row.get(0),
            )?,
            None => conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?,
        };
        Ok(count)
    }

    /// Removes messages whose source timestamp is older than the cutoff.
    /// Returns the number of messages deleted.
    pub fn delete_messages_older_than(&self, cutoff_epoch: i64) -> Result<usize, StorageError> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM messages WHERE timestamp < ?1", [cutoff_epoch])?;
        Ok(deleted)
    }

    // --- Scrape runs ---

    /// Opens an `in_progress` run for the group and returns its id. Every
    /// run opened here must be closed exactly once via `end_run`.
    pub fn start_run(&self, group_id: &str) -> Result<i64, StorageError> {
        let conn = self.conn()?;
        conn.execute("INSERT INTO scrape_runs (group_id) VALUES (?1)", [group_id])?;
        Ok(conn.last_insert_rowid())
    }

    pub fn end_run(
        &self,
        run_id: i64,
        messages_scraped: i64,
        status: RunStatus,
        error_message: Option<&str>,
    ) -> Result<(), StorageError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE scrape_runs
             SET messages_scraped = ?1, status = ?2, error_message = ?3,
                 ended_at = CURRENT_TIMESTAMP
             WHERE id = ?4 AND ended_at IS NULL",
            (messages_scraped, status.as_str(), error_message, run_id),
        )?;
        Ok(())
    }

    pub fn list_runs(&self, group_id: &str, limit: usize) -> Result<Vec<ScrapeRunRecord>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, group_id, messages_scraped, started_at, ended_at, status, error_message
             FROM scrape_runs WHERE group_id = ?1
             ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map((group_id, limit as i64), |row| {
            let status: String = row.get(5)?;
            Ok(ScrapeRunRecord {
                id: row.get(0)?,
                group_id: row.get(1)?,
                messages_scraped: row.get(2)?,
                started_at: row.get(3)?,
                ended_at: row.get(4)?,
                status: RunStatus::parse(&status),
                error_message: row.get(6)?,
            })
        })?;
        let mut runs = Vec::new();
        for row in rows {
            runs.push(row?);
        }
        Ok(runs)
    }
}

const MESSAGE_COLUMNS: &str = "id, group_id, body, type, timestamp, timestamp_formatted, \
     from_number, from_name, author_raw_id, author_phone, is_from_me, has_media, \
     media_path, ack_state, scraped_at";

fn message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    Ok(StoredMessage {
        id: row.get(0)?,
        group_id: row.get(1)?,
        body: row.get(2)?,
        kind: row.get(3)?,
        timestamp: row.get(4)?,
        timestamp_formatted: row.get(5)?,
        from_number: row.get(6)?,
        from_name: row.get(7)?,
        author_raw_id: row.get(8)?,
        author_phone: row.get(9)?,
        is_from_me: row.get(10)?,
        has_media: row.get(11)?,
        media_path: row.get(12)?,
        ack_state: row.get(13)?,
        scraped_at: row.get(14)?,
    })
}

fn collect_messages<F>(rows: rusqlite::MappedRows<'_, F>) -> Result<Vec<StoredMessage>, StorageError>
where
    F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage>,
{
    let mut messages = Vec::new();
    for row in rows {
        messages.push(row?);
    }
    Ok(messages)
}
