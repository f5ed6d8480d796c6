//! Recovers a missing article image by revisiting the source page.
use anyhow::Context;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::browser::{Browser, BrowserLauncher};
use crate::config;
use crate::error::{BrowserError, RepairError};
use crate::events::EventBus;
use crate::model::{Event, RawExtractedRecord, Topic};

/// Pages with fewer words than this are short enough for a body-wide keyword scan.
const SHORT_PAGE_WORDS: usize = 100;

const STATUS_SCRIPT: &str = "(() => { const e = performance.getEntriesByType('navigation'); \
     return e.length > 0 ? (e[0].responseStatus || 200) : 200; })()";

#[derive(Debug, Clone)]
pub struct RepairSettings {
    pub page_timeout: Duration,
    pub affordance_selector: String,
    pub affordance_link_selector: String,
    pub affordance_timeout: Duration,
    pub not_found_url_patterns: Vec<Regex>,
    /// Lower-cased.
    pub not_found_keywords: Vec<String>,
}

impl RepairSettings {
    pub fn from_config(cfg: &config::Config) -> anyhow::Result<Self> {
        let patterns = cfg
            .repair
            .not_found_url_patterns
            .iter()
            .map(|p| Regex::new(p).with_context(|| format!("invalid url pattern {}", p)))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self {
            page_timeout: cfg.crawl.page_ready_timeout(),
            affordance_selector: cfg.repair.affordance_selector.clone(),
            affordance_link_selector: cfg.repair.affordance_link_selector.clone(),
            affordance_timeout: Duration::from_secs(cfg.repair.affordance_timeout_secs),
            not_found_url_patterns: patterns,
            not_found_keywords: cfg
                .repair
                .not_found_keywords
                .iter()
                .map(|k| k.to_lowercase())
                .collect(),
        })
    }
}

pub struct RepairWorker {
    launcher: Arc<dyn BrowserLauncher>,
    bus: EventBus,
    settings: RepairSettings,
}

impl RepairWorker {
    pub fn new(launcher: Arc<dyn BrowserLauncher>, bus: EventBus, settings: RepairSettings) -> Self {
        Self {
            launcher,
            bus,
            settings,
        }
    }

    /// Recovers the image URL and republishes the completed record for ingestion.
    #[instrument(skip_all, fields(title = %record.title))]
    pub async fn repair(&self, mut record: RawExtractedRecord) -> Result<RawExtractedRecord, RepairError> {
        record.validate()?;
        let image_url = self.recover_image(&record.url).await?;
        info!(image = %image_url, "image recovered");
        record.image_url = image_url;
        self.bus
            .publish(Topic::SaveScrapedArticle, Event::ScrapedArticle(record.clone()));
        Ok(record)
    }

    pub async fn handle(&self, event: Event) -> Result<RawExtractedRecord, RepairError> {
        let record = event.into_record(Topic::ScrapeSingleArticle)?;
        self.repair(record).await
    }

    /// Opens a dedicated browser for `url` and always tears it down.
    pub async fn recover_image(&self, url: &str) -> Result<String, RepairError> {
        if url.trim().is_empty() {
            return Err(BrowserError::Navigation {
                url: String::new(),
                message: "record has no source url".into(),
            }
            .into());
        }
        let browser = self.launcher.launch().await?;
        let result = self.inspect(browser.as_ref(), url).await;
        if let Err(err) = browser.close().await {
            warn!(?err, "failed to close repair browser");
        }
        result
    }

    async fn inspect(&self, browser: &dyn Browser, url: &str) -> Result<String, RepairError> {
        browser.navigate(url).await?;
        browser.wait_visible("body", self.settings.page_timeout).await?;

        let final_url = browser.current_url().await?;
        if final_url != url {
            debug!(from = url, to = %final_url, "redirected");
        }
        if let Some(p) = self
            .settings
            .not_found_url_patterns
            .iter()
            .find(|p| p.is_match(&final_url.to_lowercase()))
        {
            return Err(RepairError::NotFoundPage {
                reason: format!("redirected to {} (matches {})", final_url, p),
            });
        }

        if let Ok(status) = browser.evaluate(STATUS_SCRIPT).await {
            if let Some(code) = status.as_u64().filter(|c| *c >= 400) {
                return Err(RepairError::NotFoundPage {
                    reason: format!("status {}", code),
                });
            }
        }

        let title = browser.title().await?.to_lowercase();
        if let Some(k) = self.keyword_in(&title) {
            return Err(RepairError::NotFoundPage {
                reason: format!("title mentions `{}`", k),
            });
        }

        let html = browser.content().await?;
        if let Some(reason) = self.not_found_markup(&html) {
            return Err(RepairError::NotFoundPage { reason });
        }

        browser
            .wait_visible(&self.settings.affordance_selector, self.settings.affordance_timeout)
            .await
            .map_err(|err| match err {
                BrowserError::Timeout { .. } => RepairError::AffordanceMissing {
                    selector: self.settings.affordance_selector.clone(),
                },
                other => RepairError::Navigation(other),
            })?;

        // The affordance may render after the first snapshot.
        let html = browser.content().await?;
        self.affordance_target(&html, &final_url)
            .ok_or_else(|| RepairError::AffordanceMissing {
                selector: self.settings.affordance_link_selector.clone(),
            })
    }

    fn keyword_in(&self, text: &str) -> Option<&str> {
        self.settings
            .not_found_keywords
            .iter()
            .find(|k| text.contains(k.as_str()))
            .map(String::as_str)
    }

    /// Keyword in the top heading, keyword on a very short page, or an error-page marker.
    fn not_found_markup(&self, html: &str) -> Option<String> {
        let doc = Html::parse_document(html);
        let select_first = |css: &str| {
            Selector::parse(css)
                .ok()
                .and_then(|sel| doc.select(&sel).next().map(|el| el.text().collect::<String>()))
        };

        if let Some(heading) = select_first("h1, h2, h3") {
            if let Some(k) = self.keyword_in(&heading.to_lowercase()) {
                return Some(format!("heading mentions `{}`", k));
            }
        }
        let body = Selector::parse("body")
            .ok()
            .and_then(|sel| doc.select(&sel).next().map(visible_text));
        if let Some(body) = body {
            let body = body.to_lowercase();
            if body.split_whitespace().count() < SHORT_PAGE_WORDS {
                if let Some(k) = self.keyword_in(&body) {
                    return Some(format!("short page mentions `{}`", k));
                }
            }
        }
        select_first(".error-page, [class*='404'], [id*='404']")
            .map(|_| "error page marker present".to_string())
    }

    fn affordance_target(&self, html: &str, base: &str) -> Option<String> {
        let doc = Html::parse_document(html);
        let sel = Selector::parse(&self.settings.affordance_link_selector).ok()?;
        let href = doc
            .select(&sel)
            .find_map(|el| el.value().attr("href"))
            .map(str::trim)
            .filter(|h| !h.is_empty())?;
        match Url::parse(href) {
            Ok(u) => Some(u.to_string()),
            Err(_) => Url::parse(base).ok()?.join(href).ok().map(|u| u.to_string()),
        }
    }

    pub async fn run(self, mut rx: UnboundedReceiver<Event>) {
        info!("repair worker started");
        while let Some(event) = rx.recv().await {
            match self.handle(event).await {
                Ok(_) => {}
                Err(RepairError::Validation(err)) => debug!(%err, "repair request discarded"),
                Err(err) => warn!(%err, "repair failed"),
            }
        }
        info!("repair worker stopped");
    }

    pub fn spawn(self) -> JoinHandle<()> {
        let rx = self.bus.subscribe(Topic::ScrapeSingleArticle);
        tokio::spawn(self.run(rx))
    }
}

/// Rendered text of `el`, leaving out script and style contents.
fn visible_text(el: ElementRef<'_>) -> String {
    el.descendants()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let hidden = node
                .parent()
                .and_then(|p| p.value().as_element().map(|e| e.name()))
                .is_some_and(|name| matches!(name, "script" | "style" | "noscript" | "template"));
            (!hidden).then(|| &**text)
        })
        .collect::<Vec<_>>()
        .join(" ")
}
