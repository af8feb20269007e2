use std::env;
use std::fs;
use std::time::Duration;

use dotenvy::dotenv;
use serde::Deserialize;

/// One group chat to monitor. Loaded from `groups.toml` or the `GROUP_IDS`
/// environment variable.
#[derive(Clone, Debug, Deserialize)]
pub struct GroupTarget {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub bridge_url: String,
    pub groups: Vec<GroupTarget>,
    /// Cron pattern for the ingestion timer.
    pub scrape_schedule: String,
    /// Cron pattern for the retention cleanup timer.
    pub cleanup_schedule: String,
    /// IANA timezone name both timers are evaluated in.
    pub timezone: String,
    /// Upper bound on messages fetched per group per scrape.
    pub scrape_max_messages: usize,
    /// Pacing delay between sequential group scrapes within one tick.
    pub group_delay: Duration,
    /// Messages older than this are deleted by the cleanup timer.
    /// Zero or negative disables retention entirely.
    pub retention_days: i64,
    pub media_enabled: bool,
    pub media_dir: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok();
        Self::build()
    }

    fn build() -> anyhow::Result<Self> {
        Ok(Config {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "data/groupscraper.db".to_string()),
            bridge_url: env::var("BRIDGE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            groups: Self::load_groups()?,
            scrape_schedule: env::var("SCRAPE_SCHEDULE")
                .unwrap_or_else(|_| "*/30 * * * *".to_string()),
            cleanup_schedule: env::var("CLEANUP_SCHEDULE")
                .unwrap_or_else(|_| "0 3 * * *".to_string()),
            timezone: env::var("TIMEZONE").unwrap_or_else(|_| "UTC".to_string()),
            scrape_max_messages: env::var("SCRAPE_MAX_MESSAGES")
                .unwrap_or_else(|_| "500".to_string())
                .parse()
                .unwrap_or(500),
            group_delay: env::var("GROUP_DELAY")
                .ok()
                .and_then(|v| humantime::parse_duration(&v).ok())
                .unwrap_or(Duration::from_secs(5)),
            retention_days: env::var("RETENTION_DAYS")
                .unwrap_or_else(|_| "0".to_string())
                .parse()
                .unwrap_or(0),
            media_enabled: env::var("MEDIA_ENABLED")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
            media_dir: env::var("MEDIA_DIR").unwrap_or_else(|_| "data/media".to_string()),
        })
    }

    /// Loads monitored groups from `groups.toml` when present, otherwise from
    /// the comma-separated `GROUP_IDS` environment variable.
    pub fn load_groups() -> anyhow::Result<Vec<GroupTarget>> {
        if let Ok(content) = fs::read_to_string("groups.toml") {
            #[derive(Deserialize)]
            struct GroupsWrapper {
                groups: Vec<GroupTarget>,
            }
            if let Ok(wrapper) = toml::from_str::<GroupsWrapper>(&content) {
                return Ok(wrapper.groups);
            }
        }

        if let Ok(ids) = env::var("GROUP_IDS") {
            return Ok(ids
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(|id| GroupTarget {
                    id: id.to_string(),
                    name: None,
                })
                .collect());
        }

        Ok(Vec::new())
    }

    pub fn group_ids(&self) -> Vec<String> {
        self.groups.iter().map(|g| g.id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_config_defaults_and_group_ids() {
        env::remove_var("DATABASE_URL");
        env::remove_var("GROUP_IDS");
        let config = Config::build().unwrap();
        assert_eq!(config.database_url, "data/groupscraper.db");
        assert_eq!(config.scrape_schedule, "*/30 * * * *");
        assert_eq!(config.timezone, "UTC");
        assert_eq!(config.retention_days, 0);
        assert!(config.groups.is_empty());

        env::set_var("GROUP_IDS", "123@g.us, 456@g.us,");
        env::set_var("GROUP_DELAY", "2s");
        let config = Config::build().unwrap();
        assert_eq!(config.group_ids(), vec!["123@g.us", "456@g.us"]);
        assert_eq!(config.group_delay, Duration::from_secs(2));

        env::remove_var("GROUP_IDS");
        env::remove_var("GROUP_DELAY");
    }
}
