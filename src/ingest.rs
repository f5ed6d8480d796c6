//! Turns extracted records into persisted authors and articles.
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::db::{self, ArticleEntity, AuthorEntity, NewArticle, NewAuthor, Pool};
use crate::error::IngestError;
use crate::events::EventBus;
use crate::media::{sniff_content_type, MediaFetcher};
use crate::model::{Event, RawExtractedRecord, Topic};
use crate::storage::{new_asset_key, ObjectStore, StoredObject};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Created(ArticleEntity),
    /// An article with the same title already exists.
    Duplicate,
}

#[derive(Clone)]
pub struct IngestPipeline {
    pool: Pool,
    fetcher: Arc<dyn MediaFetcher>,
    store: Arc<dyn ObjectStore>,
    deadline: Duration,
}

impl IngestPipeline {
    pub fn new(
        pool: Pool,
        fetcher: Arc<dyn MediaFetcher>,
        store: Arc<dyn ObjectStore>,
        deadline: Duration,
    ) -> Self {
        Self {
            pool,
            fetcher,
            store,
            deadline,
        }
    }

    /// Decodes an event for the ingestion topic and ingests it.
    pub async fn handle(&self, event: Event) -> Result<IngestOutcome, IngestError> {
        let record = event.into_record(Topic::SaveScrapedArticle)?;
        self.ingest(&record).await
    }

    #[instrument(skip_all, fields(title = %record.title))]
    pub async fn ingest(&self, record: &RawExtractedRecord) -> Result<IngestOutcome, IngestError> {
        record.validate()?;

        if db::find_article_by_title(&self.pool, &record.title)
            .await?
            .is_some()
        {
            debug!("article already stored");
            return Ok(IngestOutcome::Duplicate);
        }

        let author = self.resolve_author(record).await?;
        let image = self.store_media(&record.image_url).await?;

        let article = db::create_article(
            &self.pool,
            &NewArticle {
                author_id: author.id,
                tag: record.tag.clone(),
                title: record.title.clone(),
                href: (!record.url.is_empty()).then(|| record.url.clone()),
                image_url: image.url,
                image_key: Some(image.key),
                posted_at: record.posted_at,
                read_duration: record.read_duration.clone(),
                summary: (!record.summary.is_empty()).then(|| record.summary.clone()),
            },
        )
        .await?;
        info!(id = %article.id, "article stored");
        Ok(IngestOutcome::Created(article))
    }

    async fn resolve_author(&self, record: &RawExtractedRecord) -> Result<AuthorEntity, IngestError> {
        if let Some(author) = db::find_author_by_name(&self.pool, &record.author_name).await? {
            return Ok(author);
        }
        let avatar = self.store_media(&record.author_avatar_url).await?;
        let author = db::create_author(
            &self.pool,
            &NewAuthor {
                name: record.author_name.clone(),
                avatar_url: avatar.url,
                avatar_key: Some(avatar.key),
                profile_url: (!record.author_page_url.is_empty())
                    .then(|| record.author_page_url.clone()),
            },
        )
        .await?;
        info!(author = %author.name, "author created");
        Ok(author)
    }

    /// Fetch, sniff and upload under one deadline.
    pub async fn store_media(&self, url: &str) -> Result<StoredObject, IngestError> {
        if url.trim().is_empty() {
            return Err(IngestError::Fetch {
                url: String::new(),
                message: "no media url".into(),
            });
        }
        let work = async {
            let bytes = self.fetcher.fetch(url).await?;
            let kind = sniff_content_type(&bytes).ok_or_else(|| IngestError::UnsupportedMedia {
                url: url.to_string(),
            })?;
            self.store
                .put(&new_asset_key(kind), bytes, kind.mime())
                .await
                .map_err(|e| IngestError::Upload(e.to_string()))
        };
        tokio::time::timeout(self.deadline, work)
            .await
            .map_err(|_| IngestError::DeadlineExceeded(self.deadline.as_secs()))?
    }

    /// Consumes events until every sender is gone. One bad record never stops the loop.
    pub async fn run(self, mut rx: UnboundedReceiver<Event>) {
        info!("ingestion consumer started");
        while let Some(event) = rx.recv().await {
            match self.handle(event).await {
                Ok(_) => {}
                Err(err) if err.is_validation() => debug!(%err, "record discarded"),
                Err(err) => warn!(%err, "record skipped"),
            }
        }
        info!("ingestion consumer stopped");
    }

    /// Subscribes to the ingestion topic and runs the consumer on its own task.
    pub fn spawn(self, bus: &EventBus) -> JoinHandle<()> {
        let rx = bus.subscribe(Topic::SaveScrapedArticle);
        tokio::spawn(self.run(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryObjectStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    #[derive(Default)]
    struct StaticFetcher {
        bodies: HashMap<String, Vec<u8>>,
        calls: Mutex<Vec<String>>,
    }

    impl StaticFetcher {
        fn with(mut self, url: &str, body: &[u8]) -> Self {
            self.bodies.insert(url.to_string(), body.to_vec());
            self
        }
    }

    #[async_trait]
    impl MediaFetcher for StaticFetcher {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>, IngestError> {
            self.calls.lock().unwrap().push(url.to_string());
            self.bodies.get(url).cloned().ok_or_else(|| IngestError::Fetch {
                url: url.to_string(),
                message: "404".into(),
            })
        }
    }

    async fn setup_pool() -> Pool {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn record(title: &str) -> RawExtractedRecord {
        RawExtractedRecord {
            title: title.into(),
            url: "https://example.com/p".into(),
            image_url: "https://cdn/img.png".into(),
            posted_at: Utc::now(),
            author_name: "alice".into(),
            author_page_url: "https://example.com/u/alice".into(),
            author_avatar_url: "https://cdn/alice.png".into(),
            summary: String::new(),
            tag: "bitcoin".into(),
            read_duration: "3 min".into(),
        }
    }

    fn pipeline(pool: Pool, fetcher: StaticFetcher, store: MemoryObjectStore) -> IngestPipeline {
        IngestPipeline::new(pool, Arc::new(fetcher), Arc::new(store), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn stores_author_image_and_article() {
        let pool = setup_pool().await;
        let store = MemoryObjectStore::default();
        let fetcher = StaticFetcher::default()
            .with("https://cdn/img.png", PNG)
            .with("https://cdn/alice.png", b"GIF89a....");
        let p = pipeline(pool.clone(), fetcher, store.clone());

        let IngestOutcome::Created(article) = p.ingest(&record("Hello")).await.unwrap() else {
            panic!("expected a new article");
        };
        let key = article.image_key.clone().unwrap();
        assert!(key.ends_with(".png"));
        assert_eq!(store.content_type(&key).as_deref(), Some("image/png"));
        assert_eq!(article.href.as_deref(), Some("https://example.com/p"));

        let author = db::find_author_by_name(&pool, "alice").await.unwrap().unwrap();
        assert_eq!(article.author_id, author.id);
        assert_eq!(
            store.content_type(author.avatar_key.as_deref().unwrap()).as_deref(),
            Some("image/gif")
        );
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn unsupported_image_aborts_record_only() {
        let pool = setup_pool().await;
        let fetcher = StaticFetcher::default()
            .with("https://cdn/img.png", b"<html>not an image</html>")
            .with("https://cdn/alice.png", PNG);
        let p = pipeline(pool.clone(), fetcher, MemoryObjectStore::default());

        let err = p.ingest(&record("Broken")).await.unwrap_err();
        assert!(matches!(err, IngestError::UnsupportedMedia { .. }));
        assert_eq!(db::count_articles(&pool).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn avatar_fetch_failure_skips_record() {
        let pool = setup_pool().await;
        let fetcher = StaticFetcher::default().with("https://cdn/img.png", PNG);
        let p = pipeline(pool.clone(), fetcher, MemoryObjectStore::default());

        let err = p.ingest(&record("No avatar")).await.unwrap_err();
        assert!(matches!(err, IngestError::Fetch { .. }));
        assert_eq!(db::count_authors(&pool).await.unwrap(), 0);
        assert_eq!(db::count_articles(&pool).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn wrong_topic_is_a_validation_failure() {
        let pool = setup_pool().await;
        let p = pipeline(pool, StaticFetcher::default(), MemoryObjectStore::default());
        let err = p
            .handle(Event::MissingImage(record("t")))
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    struct SlowFetcher;

    #[async_trait]
    impl MediaFetcher for SlowFetcher {
        async fn fetch(&self, _: &str) -> Result<Vec<u8>, IngestError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(PNG.to_vec())
        }
    }

    #[tokio::test]
    async fn media_deadline_is_enforced() {
        let pool = setup_pool().await;
        let p = IngestPipeline::new(
            pool,
            Arc::new(SlowFetcher),
            Arc::new(MemoryObjectStore::default()),
            Duration::from_millis(20),
        );
        let err = p.store_media("https://cdn/slow.png").await.unwrap_err();
        assert!(matches!(err, IngestError::DeadlineExceeded(_)));
    }
}
