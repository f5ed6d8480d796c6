//! Crawl snapshots on disk, and replaying them onto the bus.
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::crawl::CrawlController;
use crate::events::EventBus;
use crate::model::{Event, RawExtractedRecord, Topic};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CrawlExport {
    pub scraped_at: DateTime<Utc>,
    pub total_articles: usize,
    pub source: String,
    pub category: String,
    pub articles: Vec<RawExtractedRecord>,
}

impl CrawlExport {
    pub fn new(source: &str, category: &str, articles: Vec<RawExtractedRecord>) -> Self {
        Self {
            scraped_at: Utc::now(),
            total_articles: articles.len(),
            source: source.to_string(),
            category: category.to_string(),
            articles,
        }
    }

    /// `{YYYYmmdd-HHMMSS}-{category}-articles.json`
    pub fn file_name(&self) -> String {
        format!(
            "{}-{}-articles.json",
            self.scraped_at.format("%Y%m%d-%H%M%S"),
            self.category
        )
    }
}

pub async fn write_export(dir: &Path, export: &CrawlExport) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create exports dir: {}", dir.display()))?;
    let path = dir.join(export.file_name());
    let body = serde_json::to_vec_pretty(export)?;
    tokio::fs::write(&path, body)
        .await
        .with_context(|| format!("failed to write export: {}", path.display()))?;
    info!(path = %path.display(), articles = export.total_articles, "export written");
    Ok(path)
}

pub async fn read_export(path: &Path) -> Result<CrawlExport> {
    let body = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read export: {}", path.display()))?;
    serde_json::from_slice(&body).with_context(|| format!("invalid export: {}", path.display()))
}

/// Where published records went.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dispatched {
    pub ingest: usize,
    pub repair: usize,
    /// Image-less records skipped because their title is blacklisted.
    pub dropped: usize,
}

/// Sends records that still need an image to the repair topic and everything else to
/// ingestion. Blacklisted titles never go to repair.
pub fn publish_records(
    bus: &EventBus,
    records: &[RawExtractedRecord],
    blacklist: &[String],
) -> Dispatched {
    let blacklist: HashSet<&str> = blacklist.iter().map(|t| t.trim()).collect();
    let mut sent = Dispatched::default();
    for record in records {
        if !record.needs_image() {
            bus.publish(
                Topic::SaveScrapedArticle,
                Event::ScrapedArticle(record.clone()),
            );
            sent.ingest += 1;
        } else if blacklist.contains(record.title.trim()) {
            debug!(title = %record.title, "blacklisted; not repaired");
            sent.dropped += 1;
        } else {
            bus.publish(
                Topic::ScrapeSingleArticle,
                Event::MissingImage(record.clone()),
            );
            sent.repair += 1;
        }
    }
    info!(?sent, "records published");
    sent
}

/// Publishes an export file onto the ingestion and repair topics.
pub async fn replay(bus: &EventBus, path: &Path, blacklist: &[String]) -> Result<Dispatched> {
    let export = read_export(path).await?;
    info!(path = %path.display(), articles = export.articles.len(), "replaying export");
    Ok(publish_records(bus, &export.articles, blacklist))
}

#[derive(Debug, Clone)]
pub struct HarvestReport {
    pub export_path: PathBuf,
    pub published: Dispatched,
}

/// Crawl, snapshot the records to disk, then hand them to ingestion or repair.
pub async fn harvest(
    controller: &CrawlController,
    exports_dir: &Path,
    source: &str,
    category: &str,
    blacklist: &[String],
    bus: &EventBus,
) -> Result<HarvestReport> {
    let outcome = controller.run().await?;
    let export = CrawlExport::new(source, category, outcome.records);
    let export_path = write_export(exports_dir, &export).await?;
    let published = publish_records(bus, &export.articles, blacklist);
    Ok(HarvestReport {
        export_path,
        published,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn record(title: &str) -> RawExtractedRecord {
        RawExtractedRecord {
            title: title.into(),
            url: format!("https://example.com/{}", title),
            image_url: format!("https://cdn.example.com/{}.png", title),
            posted_at: Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap(),
            author_name: "alice".into(),
            author_page_url: String::new(),
            author_avatar_url: String::new(),
            summary: String::new(),
            tag: "bitcoin".into(),
            read_duration: String::new(),
        }
    }

    #[test]
    fn file_name_uses_timestamp_and_category() {
        let mut export = CrawlExport::new("https://hackernoon.com", "bitcoin", vec![]);
        export.scraped_at = Utc.with_ymd_and_hms(2025, 8, 10, 11, 48, 40).unwrap();
        assert_eq!(export.file_name(), "20250810-114840-bitcoin-articles.json");
    }

    #[tokio::test]
    async fn write_read_and_replay() {
        let td = tempdir().unwrap();
        let export = CrawlExport::new("src", "bitcoin", vec![record("a"), record("b")]);
        let path = write_export(&td.path().join("exports"), &export).await.unwrap();

        let loaded = read_export(&path).await.unwrap();
        assert_eq!(loaded, export);

        let bus = EventBus::new();
        let mut rx = bus.subscribe(Topic::SaveScrapedArticle);
        let sent = replay(&bus, &path, &[]).await.unwrap();
        assert_eq!((sent.ingest, sent.repair), (2, 0));
        let first = rx.recv().await.unwrap();
        assert_eq!(first, Event::ScrapedArticle(record("a")));
    }

    #[tokio::test]
    async fn imageless_records_go_to_repair() {
        let bus = EventBus::new();
        let mut ingest = bus.subscribe(Topic::SaveScrapedArticle);
        let mut repair = bus.subscribe(Topic::ScrapeSingleArticle);

        let mut missing = record("missing");
        missing.image_url.clear();
        let mut banned = record("banned");
        banned.image_url.clear();
        let mut nameless = record("nameless");
        nameless.image_url.clear();
        nameless.author_name.clear();

        let records = vec![record("ok"), missing.clone(), banned, nameless.clone()];
        let sent = publish_records(&bus, &records, &["banned".into()]);
        assert_eq!(
            sent,
            Dispatched {
                ingest: 2,
                repair: 1,
                dropped: 1
            }
        );

        assert_eq!(repair.recv().await, Some(Event::MissingImage(missing)));
        assert!(repair.try_recv().is_err());
        assert_eq!(ingest.recv().await, Some(Event::ScrapedArticle(record("ok"))));
        // Invalid records are left for ingestion to discard.
        assert_eq!(ingest.recv().await, Some(Event::ScrapedArticle(nameless)));
    }

    #[tokio::test]
    async fn reading_garbage_fails_with_context() {
        let td = tempdir().unwrap();
        let path = td.path().join("bad.json");
        std::fs::write(&path, "not json").unwrap();
        let err = read_export(&path).await.unwrap_err();
        assert!(err.to_string().contains("invalid export"));
    }
}
