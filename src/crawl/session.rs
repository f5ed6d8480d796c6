use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::browser::Browser;
use crate::config::Site;
use crate::error::BrowserError;

/// What the crawl controller needs from a live feed page.
#[async_trait]
pub trait FeedSession: Send + Sync {
    /// Loads the feed and waits until the page can be scrolled.
    async fn open(&self) -> Result<(), BrowserError>;

    async fn item_count(&self) -> Result<usize, BrowserError>;

    async fn scroll_to_bottom(&self) -> Result<(), BrowserError>;

    /// Scrolls the item at `index` into the viewport.
    async fn focus_item(&self, index: usize) -> Result<(), BrowserError>;

    /// Fires the signals lazy loaders listen for on the item's media.
    async fn trigger_lazy_load(&self, index: usize) -> Result<(), BrowserError>;

    /// A heavier nudge used by the retry phase.
    async fn force_reload(&self, index: usize) -> Result<(), BrowserError>;

    /// Current source of each media element in the item.
    async fn item_media_sources(&self, index: usize) -> Result<Vec<String>, BrowserError>;

    /// Current source of each media element across the whole feed.
    async fn all_media_sources(&self) -> Result<Vec<String>, BrowserError>;

    async fn snapshot_html(&self) -> Result<String, BrowserError>;

    async fn close(&self) -> Result<(), BrowserError>;
}

/// Drives a feed through injected scripts built from the configured selectors.
pub struct ScriptedFeedSession {
    browser: Box<dyn Browser>,
    feed_url: String,
    item_selector: String,
    media_selector: String,
    ready_timeout: Duration,
}

impl ScriptedFeedSession {
    pub fn new(browser: Box<dyn Browser>, site: &Site, ready_timeout: Duration) -> Self {
        Self {
            browser,
            feed_url: site.feed_url.clone(),
            item_selector: site.item_selector.clone(),
            media_selector: site.media_selector.clone(),
            ready_timeout,
        }
    }

    fn quoted(s: &str) -> String {
        Value::String(s.to_string()).to_string()
    }

    /// Expression evaluating to the item element at `index`, or undefined.
    fn item_expr(&self, index: usize) -> String {
        format!(
            "document.querySelectorAll({})[{}]",
            Self::quoted(&self.item_selector),
            index
        )
    }

    async fn run(&self, script: String) -> Result<Value, BrowserError> {
        debug!(script = %script, "evaluating");
        self.browser.evaluate(&script).await
    }
}

fn sources_from(value: Value) -> Result<Vec<String>, BrowserError> {
    match value {
        Value::Array(items) => Ok(items
            .into_iter()
            .map(|v| v.as_str().unwrap_or_default().to_string())
            .collect()),
        Value::Null => Ok(Vec::new()),
        other => Err(BrowserError::Evaluation(format!(
            "expected a list of sources, got {}",
            other
        ))),
    }
}

#[async_trait]
impl FeedSession for ScriptedFeedSession {
    async fn open(&self) -> Result<(), BrowserError> {
        self.browser.navigate(&self.feed_url).await?;
        self.browser.wait_visible("body", self.ready_timeout).await
    }

    async fn item_count(&self) -> Result<usize, BrowserError> {
        let script = format!(
            "document.querySelectorAll({}).length",
            Self::quoted(&self.item_selector)
        );
        let value = self.run(script).await?;
        value
            .as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| BrowserError::Evaluation(format!("item count was {}", value)))
    }

    async fn scroll_to_bottom(&self) -> Result<(), BrowserError> {
        self.run("window.scrollTo(0, document.body.scrollHeight)".into())
            .await
            .map(|_| ())
    }

    async fn focus_item(&self, index: usize) -> Result<(), BrowserError> {
        let script = format!(
            "(() => {{ const item = {}; if (item) item.scrollIntoView({{behavior: 'auto', block: 'center'}}); }})()",
            self.item_expr(index)
        );
        self.run(script).await.map(|_| ())
    }

    async fn trigger_lazy_load(&self, index: usize) -> Result<(), BrowserError> {
        let script = format!(
            "(() => {{ const item = {}; if (!item) return; \
             item.querySelectorAll({}).forEach(img => {{ \
               img.scrollIntoView({{behavior: 'auto', block: 'nearest'}}); \
               img.loading = 'eager'; \
               img.dispatchEvent(new Event('load')); }}); }})()",
            self.item_expr(index),
            Self::quoted(&self.media_selector)
        );
        self.run(script).await.map(|_| ())
    }

    async fn force_reload(&self, index: usize) -> Result<(), BrowserError> {
        let script = format!(
            "(() => {{ const item = {}; if (!item) return; \
             item.querySelectorAll({}).forEach(img => {{ \
               img.scrollIntoView({{behavior: 'auto', block: 'center'}}); \
               img.loading = 'eager'; \
               if (img.dataset && img.dataset.src) img.src = img.dataset.src; \
               img.dispatchEvent(new Event('load')); \
               img.dispatchEvent(new Event('scroll')); }}); \
             window.dispatchEvent(new Event('scroll')); \
             window.dispatchEvent(new Event('resize')); }})()",
            self.item_expr(index),
            Self::quoted(&self.media_selector)
        );
        self.run(script).await.map(|_| ())
    }

    async fn item_media_sources(&self, index: usize) -> Result<Vec<String>, BrowserError> {
        let script = format!(
            "(() => {{ const item = {}; if (!item) return []; \
             return Array.from(item.querySelectorAll({})).map(img => img.src || ''); }})()",
            self.item_expr(index),
            Self::quoted(&self.media_selector)
        );
        sources_from(self.run(script).await?)
    }

    async fn all_media_sources(&self) -> Result<Vec<String>, BrowserError> {
        let script = format!(
            "Array.from(document.querySelectorAll({})).flatMap(item => \
             Array.from(item.querySelectorAll({})).map(img => img.src || ''))",
            Self::quoted(&self.item_selector),
            Self::quoted(&self.media_selector)
        );
        sources_from(self.run(script).await?)
    }

    async fn snapshot_html(&self) -> Result<String, BrowserError> {
        self.browser.content().await
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.browser.close().await
    }
}
