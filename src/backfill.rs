//! One-off maintenance passes over stored articles, driven by crawl exports.
use anyhow::Result;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, instrument, warn};

use crate::db::{self, Pool};
use crate::events::EventBus;
use crate::ingest::IngestPipeline;
use crate::model::{Event, RawExtractedRecord, Topic};
use crate::storage::ObjectStore;

/// Upper bound on rows a single pass looks at.
pub const SCAN_LIMIT: i64 = 10_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub scanned: usize,
    pub updated: usize,
    pub skipped: usize,
}

fn by_title(records: &[RawExtractedRecord]) -> HashMap<&str, &RawExtractedRecord> {
    let mut map = HashMap::new();
    for r in records {
        map.entry(r.title.as_str()).or_insert(r);
    }
    map
}

/// Sends export records that lack an image to the repair topic, unless blacklisted or
/// already stored.
#[instrument(skip_all)]
pub async fn requeue_missing_images(
    pool: &Pool,
    bus: &EventBus,
    records: &[RawExtractedRecord],
    blacklist: &[String],
) -> Result<usize> {
    let blacklist: HashSet<&str> = blacklist.iter().map(|t| t.trim()).collect();
    let mut published = 0;
    for record in records {
        if !record.needs_image() {
            continue;
        }
        if blacklist.contains(record.title.trim()) {
            debug!(title = %record.title, "blacklisted");
            continue;
        }
        if db::find_article_by_title(pool, &record.title).await?.is_some() {
            debug!(title = %record.title, "already stored");
            continue;
        }
        bus.publish(Topic::ScrapeSingleArticle, Event::MissingImage(record.clone()));
        published += 1;
    }
    info!(published, "missing-image records requeued");
    Ok(published)
}

/// Fills empty `href` columns from the export entry with the same title.
#[instrument(skip_all)]
pub async fn backfill_links(pool: &Pool, records: &[RawExtractedRecord]) -> Result<BackfillReport> {
    let index = by_title(records);
    let mut report = BackfillReport::default();
    for article in db::list_articles_without_link(pool, SCAN_LIMIT).await? {
        report.scanned += 1;
        let Some(url) = index
            .get(article.title.as_str())
            .map(|r| r.url.as_str())
            .filter(|u| !u.is_empty())
        else {
            debug!(title = %article.title, "no link in export");
            report.skipped += 1;
            continue;
        };
        db::update_article_link(pool, &article.id, url).await?;
        report.updated += 1;
    }
    info!(?report, "link backfill finished");
    Ok(report)
}

/// Re-hosts images whose stored URL still carries a query string, using the export's
/// image URL, and removes the old object.
#[instrument(skip_all)]
pub async fn backfill_images(
    pool: &Pool,
    pipeline: &IngestPipeline,
    store: &dyn ObjectStore,
    records: &[RawExtractedRecord],
) -> Result<BackfillReport> {
    let index = by_title(records);
    let mut report = BackfillReport::default();
    for article in db::list_articles_with_query_image(pool, SCAN_LIMIT).await? {
        report.scanned += 1;
        let Some(source) = index
            .get(article.title.as_str())
            .map(|r| r.image_url.as_str())
            .filter(|u| !u.is_empty())
        else {
            debug!(title = %article.title, "no image in export");
            report.skipped += 1;
            continue;
        };
        let stored = match pipeline.store_media(source).await {
            Ok(stored) => stored,
            Err(err) => {
                warn!(title = %article.title, %err, "image re-host failed");
                report.skipped += 1;
                continue;
            }
        };
        db::update_article_image(pool, &article.id, &stored.url, &stored.key).await?;
        report.updated += 1;
        // The row no longer points at the old object; a failed delete only leaks it.
        if let Some(old) = article.image_key.as_deref() {
            if let Err(err) = store.delete(old).await {
                warn!(title = %article.title, key = old, ?err, "failed to delete old image");
            }
        }
    }
    info!(?report, "image backfill finished");
    Ok(report)
}

/// Zero-padded position in posted-at order, starting at 1.
pub fn tag_index(position: usize) -> String {
    format!("{:06}", position)
}

/// Gives every article without a tag index its 1-based position in posted-at order.
#[instrument(skip_all)]
pub async fn backfill_tags(pool: &Pool) -> Result<BackfillReport> {
    let mut report = BackfillReport::default();
    for (i, article) in db::list_articles_by_posted_at(pool, SCAN_LIMIT)
        .await?
        .into_iter()
        .enumerate()
    {
        report.scanned += 1;
        if article.tag_index.as_deref().is_some_and(|t| !t.is_empty()) {
            report.skipped += 1;
            continue;
        }
        db::update_article_tag_index(pool, &article.id, &tag_index(i + 1)).await?;
        report.updated += 1;
    }
    info!(?report, "tag backfill finished");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{NewArticle, NewAuthor};
    use chrono::{Duration, TimeZone, Utc};

    async fn setup_pool() -> Pool {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    async fn seed(pool: &Pool, title: &str, day: i64, image_url: &str) -> String {
        let author = match db::find_author_by_name(pool, "alice").await.unwrap() {
            Some(a) => a,
            None => db::create_author(
                pool,
                &NewAuthor {
                    name: "alice".into(),
                    avatar_url: "x".into(),
                    avatar_key: None,
                    profile_url: None,
                },
            )
            .await
            .unwrap(),
        };
        db::create_article(
            pool,
            &NewArticle {
                author_id: author.id,
                tag: "bitcoin".into(),
                title: title.into(),
                href: None,
                image_url: image_url.into(),
                image_key: Some("old.png".into()),
                posted_at: Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap() + Duration::days(day),
                read_duration: String::new(),
                summary: None,
            },
        )
        .await
        .unwrap()
        .id
    }

    fn record(title: &str, url: &str, image_url: &str) -> RawExtractedRecord {
        RawExtractedRecord {
            title: title.into(),
            url: url.into(),
            image_url: image_url.into(),
            posted_at: Utc::now(),
            author_name: "alice".into(),
            author_page_url: String::new(),
            author_avatar_url: String::new(),
            summary: String::new(),
            tag: String::new(),
            read_duration: String::new(),
        }
    }

    #[tokio::test]
    async fn requeue_skips_stored_blacklisted_and_complete() {
        let pool = setup_pool().await;
        seed(&pool, "stored", 0, "https://m/x.png").await;
        let bus = EventBus::new();
        let mut rx = bus.subscribe(Topic::ScrapeSingleArticle);

        let records = vec![
            record("stored", "u", ""),
            record("banned", "u", ""),
            record("has image", "u", "https://i"),
            record("", "u", ""),
            record("wanted", "u", ""),
        ];
        let n = requeue_missing_images(&pool, &bus, &records, &[" banned ".into()])
            .await
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(rx.recv().await, Some(Event::MissingImage(record("wanted", "u", ""))));
    }

    #[tokio::test]
    async fn links_come_from_matching_titles() {
        let pool = setup_pool().await;
        let a = seed(&pool, "a", 0, "https://m/a.png").await;
        seed(&pool, "b", 1, "https://m/b.png").await;

        let report = backfill_links(&pool, &[record("a", "https://e/a", "")])
            .await
            .unwrap();
        assert_eq!(
            report,
            BackfillReport {
                scanned: 2,
                updated: 1,
                skipped: 1
            }
        );
        let stored = db::find_article(&pool, &a).await.unwrap().unwrap();
        assert_eq!(stored.href.as_deref(), Some("https://e/a"));
    }

    #[tokio::test]
    async fn tags_follow_posted_order_and_keep_existing() {
        let pool = setup_pool().await;
        let late = seed(&pool, "late", 5, "i").await;
        let early = seed(&pool, "early", 1, "i").await;
        let mid = seed(&pool, "mid", 3, "i").await;
        db::update_article_tag_index(&pool, &mid, "keep").await.unwrap();

        let report = backfill_tags(&pool).await.unwrap();
        assert_eq!(report.updated, 2);
        let tag = |id: String| {
            let pool = pool.clone();
            async move { db::find_article(&pool, &id).await.unwrap().unwrap().tag_index }
        };
        assert_eq!(tag(early).await.as_deref(), Some("000001"));
        assert_eq!(tag(mid).await.as_deref(), Some("keep"));
        assert_eq!(tag(late).await.as_deref(), Some("000003"));
    }
}
