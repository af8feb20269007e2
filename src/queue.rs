use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::scraper::{ScrapeOrchestrator, ScrapeOutcome};

/// Work submitted to the scrape worker. Each job carries a reply channel so
/// background-triggered scrapes still surface their outcome to the caller.
enum ScrapeJob {
    One {
        group_id: String,
        reply: oneshot::Sender<ScrapeOutcome>,
    },
    All {
        reply: oneshot::Sender<Vec<ScrapeOutcome>>,
    },
}

/// Serialized entry point for all ingestion writes. Every scrape, whether
/// triggered by the scheduler or submitted by an API collaborator, flows
/// through the single worker task, so exactly one scrape runs at a time and
/// ingestion ticks can never overlap.
#[derive(Clone)]
pub struct ScrapeQueue {
    tx: mpsc::Sender<ScrapeJob>,
}

impl ScrapeQueue {
    pub fn start(orchestrator: Arc<ScrapeOrchestrator>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<ScrapeJob>(32);
        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                match job {
                    ScrapeJob::One { group_id, reply } => {
                        let outcome = orchestrator.scrape_group(&group_id).await;
                        // A dropped receiver only means the submitter stopped
                        // waiting; the scrape itself already happened.
                        let _ = reply.send(outcome);
                    }
                    ScrapeJob::All { reply } => {
                        let outcomes = orchestrator.scrape_all().await;
                        let _ = reply.send(outcomes);
                    }
                }
            }
            info!("scrape queue worker stopped");
        });
        (Self { tx }, handle)
    }

    /// Queues a scrape of one group and waits for its outcome.
    pub async fn scrape_group(&self, group_id: &str) -> Option<ScrapeOutcome> {
        let (reply, rx) = oneshot::channel();
        let job = ScrapeJob::One {
            group_id: group_id.to_string(),
            reply,
        };
        if self.tx.send(job).await.is_err() {
            debug!("scrape queue worker gone, dropping job");
            return None;
        }
        rx.await.ok()
    }

    /// Queues a full sweep over all configured groups and waits for the
    /// per-group outcomes.
    pub async fn scrape_all(&self) -> Option<Vec<ScrapeOutcome>> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(ScrapeJob::All { reply }).await.is_err() {
            debug!("scrape queue worker gone, dropping job");
            return None;
        }
        rx.await.ok()
    }
}
