use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment};
use serde::Deserialize;

/// Runtime settings. Defaults below, overridden by `HELPDOCS_*` env vars
/// (e.g. `HELPDOCS_MAX_CONCURRENT=8`), then by CLI flags.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub base_url: String,
    pub max_depth: u8,
    pub delay_ms: u64,
    pub max_concurrent: usize,
    pub timeout_secs: u64,
    pub user_agent: String,
    pub db_path: PathBuf,
    pub export_dir: PathBuf,
    pub normalize_on_crawl: bool,
}

impl Settings {
    pub fn load() -> Result<Self> {
        let settings = Config::builder()
            .set_default("base_url", "https://elma365.com")?
            .set_default("max_depth", 10)?
            .set_default("delay_ms", 1000)?
            .set_default("max_concurrent", 5)?
            .set_default("timeout_secs", 30)?
            .set_default("user_agent", "Mozilla/5.0 (compatible; HelpDocs-Crawler/1.0)")?
            .set_default("db_path", "data/helpdocs.sqlite")?
            .set_default("export_dir", "data/crawled")?
            .set_default("normalize_on_crawl", true)?
            .add_source(Environment::with_prefix("HELPDOCS").try_parsing(true))
            .build()
            .context("building settings")?;
        settings
            .try_deserialize()
            .context("invalid HELPDOCS_* settings")
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: "https://elma365.com".into(),
            max_depth: 10,
            delay_ms: 1000,
            max_concurrent: 5,
            timeout_secs: 30,
            user_agent: "Mozilla/5.0 (compatible; HelpDocs-Crawler/1.0)".into(),
            db_path: PathBuf::from("data/helpdocs.sqlite"),
            export_dir: PathBuf::from("data/crawled"),
            normalize_on_crawl: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_load_without_env() {
        let s = Settings::load().unwrap();
        assert_eq!(s.max_concurrent, Settings::default().max_concurrent);
        assert_eq!(s.delay(), Duration::from_secs(1));
        assert!(s.normalize_on_crawl);
    }
}
