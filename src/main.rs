use std::sync::Arc;
use std::time::Duration;

use groupscraper::bridge::HttpSourceClient;
use groupscraper::config::Config;
use groupscraper::db::Database;
use groupscraper::queue::ScrapeQueue;
use groupscraper::scheduler::Scheduler;
use groupscraper::scraper::ScrapeOrchestrator;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    if config.groups.is_empty() {
        warn!("no groups configured; set GROUP_IDS or provide groups.toml");
    }

    let db = Database::open(&config.database_url)?;
    db.init_schema()?;

    let client = Arc::new(HttpSourceClient::new(&config.bridge_url));
    if !client.probe().await {
        warn!(bridge = %config.bridge_url, "source bridge not connected yet; scrapes will start once it is");
    }
    let _monitor = client.clone().start_monitor(Duration::from_secs(30));

    let orchestrator = Arc::new(ScrapeOrchestrator::new(client.clone(), db, &config));
    let (queue, _worker) = ScrapeQueue::start(orchestrator.clone());
    let scheduler = Scheduler::new(queue, orchestrator, &config)?;
    scheduler.start();

    info!(
        status = %serde_json::to_string(&scheduler.status())?,
        groups = config.groups.len(),
        "groupscraper running"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    scheduler.stop();

    Ok(())
}
