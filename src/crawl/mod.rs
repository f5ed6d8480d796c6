//! Crawl controller: scroll the feed, verify media batch by batch, retry what is still
//! pending once scrolling is over, then extract records from the final page.
pub mod classify;
pub mod session;

pub use classify::{MediaClassifier, MediaState, PrefixClassifier};
pub use session::{FeedSession, ScriptedFeedSession};

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::config;
use crate::error::CrawlError;
use crate::extract::FieldExtractor;
use crate::model::RawExtractedRecord;
use crate::retry::{retry_until, RetryPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlSettings {
    pub max_scrolls: usize,
    pub max_articles: usize,
    pub batch_concurrency: usize,
    pub scroll_settle: Duration,
    pub item_settle: Duration,
    pub verify_delay: Duration,
    pub retry: RetryPolicy,
}

impl From<&config::Crawl> for CrawlSettings {
    fn from(c: &config::Crawl) -> Self {
        Self {
            max_scrolls: c.max_scrolls,
            max_articles: c.max_articles,
            batch_concurrency: c.batch_concurrency.max(1),
            scroll_settle: c.scroll_settle(),
            item_settle: c.item_settle(),
            verify_delay: c.verify_delay(),
            retry: RetryPolicy::new(c.retry_attempts, c.retry_delay()),
        }
    }
}

/// The items that appeared during one scroll iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchDescriptor {
    pub index: usize,
    pub items: Vec<usize>,
    pub loaded: usize,
    pub failed: usize,
    pub success: bool,
    /// Items still showing a placeholder.
    pub pending: Vec<usize>,
}

impl BatchDescriptor {
    fn new(index: usize, items: Vec<usize>) -> Self {
        Self {
            index,
            items,
            loaded: 0,
            failed: 0,
            success: false,
            pending: Vec::new(),
        }
    }

    fn settle(&mut self) {
        self.failed = self.pending.len();
        self.loaded = self.items.len() - self.failed;
        self.success = self.failed == 0;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediaStats {
    pub total: usize,
    pub loaded: usize,
    pub placeholder: usize,
}

impl MediaStats {
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.loaded as f64 / self.total as f64
    }
}

#[derive(Debug, Clone)]
pub struct CrawlOutcome {
    pub records: Vec<RawExtractedRecord>,
    /// Final state of every batch, in scroll order.
    pub batches: Vec<BatchDescriptor>,
    /// Indexes of batches that went through the retry phase.
    pub retried: Vec<usize>,
    pub scrolls: usize,
    /// `None` when the final media scan failed.
    pub media: Option<MediaStats>,
}

pub struct CrawlController {
    session: Arc<dyn FeedSession>,
    classifier: Arc<dyn MediaClassifier>,
    extractor: FieldExtractor,
    item_selector: String,
    settings: CrawlSettings,
}

impl CrawlController {
    pub fn new(
        session: Arc<dyn FeedSession>,
        classifier: Arc<dyn MediaClassifier>,
        extractor: FieldExtractor,
        item_selector: impl Into<String>,
        settings: CrawlSettings,
    ) -> Self {
        Self {
            session,
            classifier,
            extractor,
            item_selector: item_selector.into(),
            settings,
        }
    }

    /// Runs the whole crawl. The session is closed whether or not it succeeds.
    #[instrument(skip_all)]
    pub async fn run(&self) -> Result<CrawlOutcome, CrawlError> {
        let result = self.crawl().await;
        if let Err(err) = self.session.close().await {
            warn!(?err, "failed to close feed session");
        }
        if let Err(err) = &result {
            error!(?err, "crawl aborted");
        }
        result
    }

    async fn crawl(&self) -> Result<CrawlOutcome, CrawlError> {
        self.session.open().await?;
        sleep(self.settings.scroll_settle).await;

        let (batches, scrolls) = self.scroll_and_verify().await?;

        let mut retried = Vec::new();
        let mut finished = Vec::with_capacity(batches.len());
        for mut batch in batches {
            if !batch.success {
                retried.push(batch.index);
                self.retry_batch(&mut batch).await;
            }
            finished.push(batch);
        }

        let media = self.final_verification().await;

        let html = self.session.snapshot_html().await?;
        let records =
            self.extractor
                .extract_all(&html, &self.item_selector, self.settings.max_articles);
        info!(
            records = records.len(),
            scrolls,
            batches = finished.len(),
            retried = retried.len(),
            "crawl finished"
        );

        Ok(CrawlOutcome {
            records,
            batches: finished,
            retried,
            scrolls,
            media,
        })
    }

    /// Scroll loop. Each iteration that grows the feed spawns a verification task and moves
    /// on without waiting for it; all tasks are joined once scrolling stops.
    async fn scroll_and_verify(&self) -> Result<(Vec<BatchDescriptor>, usize), CrawlError> {
        let permits = Arc::new(Semaphore::new(self.settings.batch_concurrency));
        let mut verifying = JoinSet::new();
        let mut scrolls = 0;
        let mut batch_index = 0;
        // Last count read successfully; a failed read falls back to it.
        let mut known = 0;

        for iteration in 0..self.settings.max_scrolls {
            match self.session.item_count().await {
                Ok(count) => {
                    known = count;
                    if count >= self.settings.max_articles {
                        info!(items = count, "reached target item count; stop scrolling");
                        break;
                    }
                }
                Err(err) => warn!(iteration, ?err, "item count failed; scrolling anyway"),
            }
            let before = known;

            self.session.scroll_to_bottom().await?;
            scrolls += 1;
            sleep(self.settings.scroll_settle).await;

            let after = match self.session.item_count().await {
                Ok(count) => count,
                Err(err) => {
                    warn!(iteration, ?err, "item count after scroll failed");
                    continue;
                }
            };
            known = after;
            debug!(iteration, before, after, "scrolled");
            if after <= before {
                continue;
            }

            batch_index += 1;
            let batch = BatchDescriptor::new(batch_index, (before..after).collect());
            info!(batch = batch.index, first = before, last = after - 1, "verifying batch");
            let verifier = BatchVerifier {
                session: self.session.clone(),
                classifier: self.classifier.clone(),
                permits: permits.clone(),
                settings: self.settings,
            };
            verifying.spawn(async move { verifier.verify(batch).await });
        }

        let mut batches = Vec::new();
        while let Some(joined) = verifying.join_next().await {
            match joined {
                Ok(batch) => batches.push(batch),
                Err(err) => error!(?err, "batch verification task failed"),
            }
        }
        batches.sort_by_key(|b| b.index);
        Ok((batches, scrolls))
    }

    /// Bounded attempts per pending item. Exhausted items stay failed.
    async fn retry_batch(&self, batch: &mut BatchDescriptor) {
        info!(batch = batch.index, pending = batch.pending.len(), "retrying batch");
        let mut still_pending = Vec::new();
        for &idx in &batch.pending {
            let resolved = retry_until(self.settings.retry, |_| async move {
                if let Err(err) = self.session.focus_item(idx).await {
                    debug!(item = idx, ?err, "focus failed");
                }
                sleep(self.settings.item_settle).await;
                if self.check_item(idx).await {
                    return true;
                }
                if let Err(err) = self.session.force_reload(idx).await {
                    debug!(item = idx, ?err, "force reload failed");
                }
                false
            })
            .await;
            if !resolved {
                warn!(batch = batch.index, item = idx, "item media never loaded");
                still_pending.push(idx);
            }
        }
        batch.pending = still_pending;
        batch.settle();
        info!(
            batch = batch.index,
            loaded = batch.loaded,
            failed = batch.failed,
            "retry finished"
        );
    }

    async fn check_item(&self, idx: usize) -> bool {
        item_loaded(self.session.as_ref(), self.classifier.as_ref(), idx).await
    }

    /// Diagnostic only; never gates extraction.
    async fn final_verification(&self) -> Option<MediaStats> {
        let sources = match self.session.all_media_sources().await {
            Ok(sources) => sources,
            Err(err) => {
                warn!(?err, "final media verification failed");
                return None;
            }
        };
        let mut stats = MediaStats {
            total: sources.len(),
            ..MediaStats::default()
        };
        for src in &sources {
            match self.classifier.classify(src) {
                MediaState::Loaded => stats.loaded += 1,
                MediaState::Placeholder => stats.placeholder += 1,
                MediaState::Unknown => {}
            }
        }
        if stats.placeholder > 0 {
            warn!(
                total = stats.total,
                loaded = stats.loaded,
                placeholder = stats.placeholder,
                ratio = %format!("{:.1}%", stats.ratio() * 100.0),
                "some media still show placeholders"
            );
        } else {
            info!(total = stats.total, "all media loaded");
        }
        Some(stats)
    }
}

/// Owned state for one spawned batch verification.
struct BatchVerifier {
    session: Arc<dyn FeedSession>,
    classifier: Arc<dyn MediaClassifier>,
    permits: Arc<Semaphore>,
    settings: CrawlSettings,
}

impl BatchVerifier {
    async fn verify(self, mut batch: BatchDescriptor) -> BatchDescriptor {
        let pending = Mutex::new(Vec::new());
        stream::iter(batch.items.clone())
            .for_each_concurrent(self.settings.batch_concurrency, |idx| {
                let pending = &pending;
                let this = &self;
                async move {
                    let loaded = match this.permits.acquire().await {
                        Ok(_permit) => this.verify_item(idx).await,
                        Err(_) => false,
                    };
                    if !loaded {
                        pending.lock().await.push(idx);
                    }
                }
            })
            .await;

        let mut pending = pending.into_inner();
        pending.sort_unstable();
        batch.pending = pending;
        batch.settle();
        if batch.success {
            info!(batch = batch.index, loaded = batch.loaded, "batch fully loaded");
        } else {
            info!(
                batch = batch.index,
                loaded = batch.loaded,
                failed = batch.failed,
                "batch incomplete; queued for retry"
            );
        }
        batch
    }

    /// One settle window, one check. Browser errors count as a placeholder.
    async fn verify_item(&self, idx: usize) -> bool {
        if let Err(err) = self.session.focus_item(idx).await {
            debug!(item = idx, ?err, "focus failed");
            return false;
        }
        sleep(self.settings.item_settle).await;
        if let Err(err) = self.session.trigger_lazy_load(idx).await {
            debug!(item = idx, ?err, "lazy load trigger failed");
            return false;
        }
        retry_until(RetryPolicy::once(self.settings.verify_delay), |_| {
            item_loaded(self.session.as_ref(), self.classifier.as_ref(), idx)
        })
        .await
    }
}

async fn item_loaded(session: &dyn FeedSession, classifier: &dyn MediaClassifier, idx: usize) -> bool {
    match session.item_media_sources(idx).await {
        Ok(sources) => classifier.item_loaded(&sources),
        Err(err) => {
            debug!(item = idx, ?err, "media check failed");
            false
        }
    }
}

async fn sleep(d: Duration) {
    if !d.is_zero() {
        tokio::time::sleep(d).await;
    }
}
