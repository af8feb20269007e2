use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::db::{Database, RunStatus};
use crate::error::{ScrapeError, SourceError, StorageError};
use crate::identity::{self, IdentityMap};
use crate::normalize::Normalizer;
use crate::source::{ConnectionState, SourceClient};

/// Structured result of one group scrape. The orchestrator never lets an
/// error escape past this shape.
#[derive(Debug, Clone, Serialize)]
pub struct ScrapeOutcome {
    pub success: bool,
    pub group_id: String,
    pub group_name: Option<String>,
    pub messages_processed: Option<usize>,
    pub error: Option<String>,
}

impl ScrapeOutcome {
    fn completed(group_id: &str, group_name: String, processed: usize) -> Self {
        Self {
            success: true,
            group_id: group_id.to_string(),
            group_name: Some(group_name),
            messages_processed: Some(processed),
            error: None,
        }
    }

    fn failed(group_id: &str, error: &ScrapeError) -> Self {
        Self {
            success: false,
            group_id: group_id.to_string(),
            group_name: None,
            messages_processed: None,
            error: Some(error.to_string()),
        }
    }
}

/// Drives one group's end-to-end scrape: fetch, identity resolution,
/// normalization, persistence, and run bookkeeping. Holds no state across
/// invocations; the identity map lives and dies with a single scrape.
pub struct ScrapeOrchestrator {
    client: Arc<dyn SourceClient>,
    db: Database,
    groups: Vec<String>,
    max_messages: usize,
    group_delay: Duration,
    retention_days: i64,
    media_dir: Option<PathBuf>,
}

impl ScrapeOrchestrator {
    pub fn new(client: Arc<dyn SourceClient>, db: Database, config: &Config) -> Self {
        Self {
            client,
            db,
            groups: config.group_ids(),
            max_messages: config.scrape_max_messages,
            group_delay: config.group_delay,
            retention_days: config.retention_days,
            media_dir: config.media_enabled.then(|| PathBuf::from(&config.media_dir)),
        }
    }

    /// Scrapes a single group. All failures are converted into the outcome;
    /// failures before the run record exists leave no audit artifact.
    pub async fn scrape_group(&self, group_id: &str) -> ScrapeOutcome {
        info!(group = %group_id, "scrape starting");
        match self.scrape_inner(group_id).await {
            Ok((group_name, processed)) => {
                info!(group = %group_id, name = %group_name, processed, "scrape completed");
                ScrapeOutcome::completed(group_id, group_name, processed)
            }
            Err(e) => {
                error!(group = %group_id, error = %e, "scrape failed");
                ScrapeOutcome::failed(group_id, &e)
            }
        }
    }

    /// Scrapes every configured group sequentially with the pacing delay
    /// between them. Pacing throttles source-side request volume; ordering
    /// is irrelevant for correctness since ingestion is idempotent.
    pub async fn scrape_all(&self) -> Vec<ScrapeOutcome> {
        let mut outcomes = Vec::with_capacity(self.groups.len());
        for (i, group_id) in self.groups.iter().enumerate() {
            if i > 0 && !self.group_delay.is_zero() {
                tokio::time::sleep(self.group_delay).await;
            }
            outcomes.push(self.scrape_group(group_id).await);
        }
        outcomes
    }

    /// Deletes messages older than the retention window. Returns the number
    /// deleted; a non-positive window disables retention and deletes nothing.
    pub async fn cleanup_expired(&self) -> Result<usize, StorageError> {
        if self.retention_days <= 0 {
            return Ok(0);
        }
        let cutoff = Utc::now().timestamp() - self.retention_days * 86_400;
        let deleted = self
            .db
            .run_blocking(move |db| db.delete_messages_older_than(cutoff))
            .await?;
        if deleted > 0 {
            info!(deleted, retention_days = self.retention_days, "retention cleanup done");
        }
        Ok(deleted)
    }

    async fn scrape_inner(&self, group_id: &str) -> Result<(String, usize), ScrapeError> {
        if *self.client.connection_state().borrow() != ConnectionState::Connected {
            return Err(SourceError::Unavailable("source client is not connected".to_string()).into());
        }

        let snapshot = self.client.fetch_group_by_id(group_id).await?;
        if !snapshot.is_group {
            return Err(ScrapeError::NotAGroup(group_id.to_string()));
        }

        let identities = identity::build_identity_map(self.client.as_ref(), &snapshot).await;

        {
            let (id, name, count) = (
                snapshot.id.clone(),
                snapshot.name.clone(),
                snapshot.participants.len() as i64,
            );
            self.db
                .run_blocking(move |db| db.upsert_group(&id, &name, count))
                .await?;
        }

        let gid = group_id.to_string();
        let run_id = self.db.run_blocking(move |db| db.start_run(&gid)).await?;

        // Past this point every exit must close the run exactly once; the
        // message loop returns its partial count alongside any error so the
        // failed run still records how far it got.
        match self.process_messages(group_id, &identities).await {
            Ok(processed) => {
                self.db
                    .run_blocking(move |db| {
                        db.end_run(run_id, processed as i64, RunStatus::Completed, None)
                    })
                    .await?;
                Ok((snapshot.name, processed))
            }
            Err((processed, e)) => {
                let error_text = e.to_string();
                let close = self
                    .db
                    .run_blocking(move |db| {
                        db.end_run(run_id, processed as i64, RunStatus::Failed, Some(error_text.as_str()))
                    })
                    .await;
                if let Err(close_err) = close {
                    error!(run = run_id, error = %close_err, "failed to close run record");
                }
                Err(e)
            }
        }
    }

    /// Fetches and processes the batch. Per-message failures are logged and
    /// skipped; storage failures abort with the count processed so far.
    /// Idempotent duplicate no-ops count as processed for audit purposes.
    async fn process_messages(
        &self,
        group_id: &str,
        identities: &IdentityMap,
    ) -> Result<usize, (usize, ScrapeError)> {
        let messages = self
            .client
            .fetch_recent_messages(group_id, self.max_messages)
            .await
            .map_err(|e| (0, ScrapeError::Source(e)))?;

        let normalizer = Normalizer::new(self.client.as_ref(), self.media_dir.clone());
        let fetched = messages.len();
        let mut processed = 0usize;
        let mut inserted = 0usize;

        for msg in &messages {
            let stored = match normalizer.normalize(group_id, msg, identities).await {
                Ok(stored) => stored,
                Err(e) => {
                    warn!(message = %msg.id, error = %e, "skipping message");
                    continue;
                }
            };
            match self.db.run_blocking(move |db| db.insert_message(&stored)).await {
                Ok(true) => {
                    inserted += 1;
                    processed += 1;
                }
                Ok(false) => processed += 1,
                Err(e) => return Err((processed, ScrapeError::Storage(e))),
            }
        }

        info!(
            group = %group_id,
            fetched,
            processed,
            inserted,
            skipped = fetched - processed,
            "batch processed"
        );
        Ok(processed)
    }
}
