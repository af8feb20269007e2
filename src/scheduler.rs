use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use chrono_tz::Tz;
use croner::Cron;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::queue::ScrapeQueue;
use crate::scraper::ScrapeOrchestrator;

#[derive(Debug, Clone, Serialize)]
pub struct TimerStatus {
    pub schedule: String,
    pub armed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupStatus {
    pub schedule: String,
    pub armed: bool,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub ingestion: TimerStatus,
    pub cleanup: CleanupStatus,
    pub timezone: String,
}

#[derive(Default)]
struct Timers {
    ingestion: Option<JoinHandle<()>>,
    cleanup: Option<JoinHandle<()>>,
}

/// Drives ingestion and retention on two independent cron timers, evaluated
/// in a configured timezone. The ingestion timer submits a full sweep to the
/// scrape queue and awaits it before computing the next occurrence, so two
/// ingestion ticks can never overlap. One tick's failures are logged and
/// recorded per group; the timer itself never stops ticking because of them.
pub struct Scheduler {
    queue: ScrapeQueue,
    orchestrator: Arc<ScrapeOrchestrator>,
    scrape_cron: Cron,
    cleanup_cron: Cron,
    scrape_schedule: String,
    cleanup_schedule: String,
    timezone: Tz,
    cleanup_enabled: bool,
    timers: Mutex<Timers>,
}

impl Scheduler {
    pub fn new(
        queue: ScrapeQueue,
        orchestrator: Arc<ScrapeOrchestrator>,
        config: &Config,
    ) -> anyhow::Result<Self> {
        let scrape_cron: Cron = config
            .scrape_schedule
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid SCRAPE_SCHEDULE '{}': {e}", config.scrape_schedule))?;
        let cleanup_cron: Cron = config
            .cleanup_schedule
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid CLEANUP_SCHEDULE '{}': {e}", config.cleanup_schedule))?;
        let timezone: Tz = config
            .timezone
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid TIMEZONE '{}': {e}", config.timezone))?;

        Ok(Self {
            queue,
            orchestrator,
            scrape_cron,
            cleanup_cron,
            scrape_schedule: config.scrape_schedule.clone(),
            cleanup_schedule: config.cleanup_schedule.clone(),
            timezone,
            cleanup_enabled: config.retention_days > 0,
            timers: Mutex::new(Timers::default()),
        })
    }

    /// Arms both timers. Idempotent: timers that are already armed are left
    /// alone. The cleanup timer stays disarmed when retention is disabled.
    pub fn start(&self) {
        let mut timers = self.timers.lock().unwrap();

        if !armed(&timers.ingestion) {
            let queue = self.queue.clone();
            let cron = self.scrape_cron.clone();
            let tz = self.timezone;
            timers.ingestion = Some(tokio::spawn(async move {
                loop {
                    let Some(wait) = until_next_occurrence(&cron, &tz) else {
                        break;
                    };
                    tokio::time::sleep(wait).await;
                    info!("ingestion tick");
                    match queue.scrape_all().await {
                        Some(outcomes) => {
                            let failures = outcomes.iter().filter(|o| !o.success).count();
                            info!(groups = outcomes.len(), failures, "ingestion tick finished");
                        }
                        None => {
                            warn!("scrape queue worker gone, disarming ingestion timer");
                            break;
                        }
                    }
                }
            }));
            info!(schedule = %self.scrape_schedule, timezone = %self.timezone, "ingestion timer armed");
        }

        if self.cleanup_enabled && !armed(&timers.cleanup) {
            let orchestrator = self.orchestrator.clone();
            let cron = self.cleanup_cron.clone();
            let tz = self.timezone;
            timers.cleanup = Some(tokio::spawn(async move {
                loop {
                    let Some(wait) = until_next_occurrence(&cron, &tz) else {
                        break;
                    };
                    tokio::time::sleep(wait).await;
                    match orchestrator.cleanup_expired().await {
                        Ok(0) => debug!("cleanup tick: nothing expired"),
                        Ok(n) => info!(deleted = n, "cleanup tick finished"),
                        Err(e) => error!(error = %e, "cleanup tick failed"),
                    }
                }
            }));
            info!(schedule = %self.cleanup_schedule, "cleanup timer armed");
        }
    }

    /// Disarms both timers. Idempotent: stopping an unstarted or already
    /// stopped scheduler is a no-op. A scrape already running on the queue
    /// worker is not interrupted; only the waiting timer task is dropped.
    pub fn stop(&self) {
        let mut timers = self.timers.lock().unwrap();
        if let Some(handle) = timers.ingestion.take() {
            handle.abort();
            info!("ingestion timer disarmed");
        }
        if let Some(handle) = timers.cleanup.take() {
            handle.abort();
            info!("cleanup timer disarmed");
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        let timers = self.timers.lock().unwrap();
        SchedulerStatus {
            ingestion: TimerStatus {
                schedule: self.scrape_schedule.clone(),
                armed: armed(&timers.ingestion),
            },
            cleanup: CleanupStatus {
                schedule: self.cleanup_schedule.clone(),
                armed: armed(&timers.cleanup),
                enabled: self.cleanup_enabled,
            },
            timezone: self.timezone.to_string(),
        }
    }
}

fn armed(handle: &Option<JoinHandle<()>>) -> bool {
    handle.as_ref().is_some_and(|h| !h.is_finished())
}

fn until_next_occurrence(cron: &Cron, tz: &Tz) -> Option<Duration> {
    let now = Utc::now().with_timezone(tz);
    match cron.find_next_occurrence(&now, false) {
        Ok(next) => Some((next - now).to_std().unwrap_or(Duration::ZERO)),
        Err(e) => {
            error!(error = %e, "no next cron occurrence, timer disarmed");
            None
        }
    }
}
