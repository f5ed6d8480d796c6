//! Configuration loader and validator for the feed harvester.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub site: Site,
    pub crawl: Crawl,
    pub media: Media,
    pub repair: Repair,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    #[serde(default)]
    pub database_url: Option<String>,
}

/// Where the feed lives and how its markup is shaped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Site {
    pub origin: String,
    pub feed_url: String,
    pub category: String,
    pub item_selector: String,
    pub media_selector: String,
    pub default_avatar_url: String,
    pub placeholder_prefixes: Vec<String>,
    pub loaded_prefixes: Vec<String>,
}

/// Scroll/verify/retry budget for one crawl.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Crawl {
    pub max_scrolls: usize,
    pub max_articles: usize,
    pub batch_concurrency: usize,
    pub scroll_settle_ms: u64,
    pub item_settle_ms: u64,
    pub verify_delay_ms: u64,
    pub retry_attempts: usize,
    pub retry_delay_ms: u64,
    pub page_ready_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Media {
    pub fetch_timeout_secs: u64,
    pub deadline_secs: u64,
    pub user_agent: String,
    pub media_dir: String,
    pub public_base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Repair {
    pub affordance_selector: String,
    pub affordance_link_selector: String,
    pub affordance_timeout_secs: u64,
    pub not_found_url_patterns: Vec<String>,
    pub not_found_keywords: Vec<String>,
    #[serde(default)]
    pub blacklist: Vec<String>,
}

impl Config {
    /// Ensure required directories exist (data dir and media dir).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        fs::create_dir_all(&self.app.data_dir)?;
        fs::create_dir_all(&self.media.media_dir)
    }

    /// `DATABASE_URL` wins over the file, which wins over the data-dir default.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .ok()
            .or_else(|| self.app.database_url.clone())
            .unwrap_or_else(|| format!("sqlite://{}/harvest.db", self.app.data_dir))
    }

    pub fn exports_dir(&self) -> std::path::PathBuf {
        Path::new(&self.app.data_dir).join("exports")
    }
}

impl Crawl {
    pub fn scroll_settle(&self) -> Duration {
        Duration::from_millis(self.scroll_settle_ms)
    }

    pub fn item_settle(&self) -> Duration {
        Duration::from_millis(self.item_settle_ms)
    }

    pub fn verify_delay(&self) -> Duration {
        Duration::from_millis(self.verify_delay_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn page_ready_timeout(&self) -> Duration {
        Duration::from_secs(self.page_ready_timeout_secs)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }

    if url::Url::parse(&cfg.site.origin).is_err() {
        return Err(ConfigError::Invalid("site.origin must be an absolute URL"));
    }
    if cfg.site.feed_url.trim().is_empty() {
        return Err(ConfigError::Invalid("site.feed_url must be non-empty"));
    }
    if cfg.site.item_selector.trim().is_empty() {
        return Err(ConfigError::Invalid("site.item_selector must be non-empty"));
    }
    if cfg.site.media_selector.trim().is_empty() {
        return Err(ConfigError::Invalid("site.media_selector must be non-empty"));
    }
    if cfg.site.placeholder_prefixes.is_empty() {
        return Err(ConfigError::Invalid("site.placeholder_prefixes must not be empty"));
    }

    if cfg.crawl.max_articles == 0 {
        return Err(ConfigError::Invalid("crawl.max_articles must be > 0"));
    }
    if cfg.crawl.batch_concurrency == 0 {
        return Err(ConfigError::Invalid("crawl.batch_concurrency must be > 0"));
    }
    if cfg.crawl.retry_attempts == 0 {
        return Err(ConfigError::Invalid("crawl.retry_attempts must be > 0"));
    }

    if cfg.media.deadline_secs == 0 {
        return Err(ConfigError::Invalid("media.deadline_secs must be > 0"));
    }
    if cfg.media.media_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("media.media_dir must be non-empty"));
    }

    if cfg.repair.affordance_selector.trim().is_empty() {
        return Err(ConfigError::Invalid("repair.affordance_selector must be non-empty"));
    }
    if cfg
        .repair
        .not_found_url_patterns
        .iter()
        .any(|p| regex::Regex::new(p).is_err())
    {
        return Err(ConfigError::Invalid(
            "repair.not_found_url_patterns must be valid regexes",
        ));
    }

    Ok(())
}

/// Returns a complete example configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"

site:
  origin: "https://hackernoon.com"
  feed_url: "https://hackernoon.com/tagged/bitcoin"
  category: "bitcoin"
  item_selector: ".infinite-scroll-component article"
  media_selector: "img[data-nimg]"
  default_avatar_url: "https://hackernoon.com/default-avatar.png"
  placeholder_prefixes:
    - "data:image/gif"
  loaded_prefixes:
    - "http"

crawl:
  max_scrolls: 24
  max_articles: 200
  batch_concurrency: 3
  scroll_settle_ms: 3000
  item_settle_ms: 200
  verify_delay_ms: 1000
  retry_attempts: 10
  retry_delay_ms: 500
  page_ready_timeout_secs: 30

media:
  fetch_timeout_secs: 30
  deadline_secs: 120
  user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36"
  media_dir: "./data/media"
  public_base_url: "http://localhost:8080/media"

repair:
  affordance_selector: ".download-button"
  affordance_link_selector: ".download-button a"
  affordance_timeout_secs: 15
  not_found_url_patterns:
    - "/404"
  not_found_keywords:
    - "404"
    - "not found"
    - "page does not exist"
    - "oops"
  blacklist: []
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn example_cfg() -> Config {
        serde_yaml::from_str(example()).unwrap()
    }

    #[test]
    fn parse_example_ok() {
        let cfg = example_cfg();
        validate(&cfg).unwrap();
        assert_eq!(cfg.crawl.batch_concurrency, 3);
        assert_eq!(cfg.site.placeholder_prefixes, vec!["data:image/gif"]);
    }

    #[test]
    fn invalid_origin() {
        let mut cfg = example_cfg();
        cfg.site.origin = "not a url".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("site.origin")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn invalid_crawl_budget() {
        let mut cfg = example_cfg();
        cfg.crawl.batch_concurrency = 0;
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("batch_concurrency")),
            _ => panic!("wrong error"),
        }

        let mut cfg = example_cfg();
        cfg.crawl.retry_attempts = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg = example_cfg();
        cfg.crawl.max_articles = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_selectors() {
        let mut cfg = example_cfg();
        cfg.site.item_selector = " ".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg = example_cfg();
        cfg.repair.affordance_selector = "".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg = example_cfg();
        cfg.repair.not_found_url_patterns.push("(unclosed".into());
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn ensure_dirs_creates_data_and_media_dirs() {
        let td = tempdir().unwrap();
        let mut cfg = example_cfg();
        cfg.app.data_dir = td.path().join("data").to_string_lossy().to_string();
        cfg.media.media_dir = td.path().join("media").to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(td.path().join("data").exists());
        assert!(td.path().join("media").exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.site.category, "bitcoin");
        assert_eq!(cfg.repair.not_found_url_patterns, vec!["/404"]);
    }
}
