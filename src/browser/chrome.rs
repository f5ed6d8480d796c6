//! Chromium driver on `chromiumoxide`.
use async_trait::async_trait;
use chromiumoxide::{Browser as Chromium, BrowserConfig, Page};
use futures::StreamExt;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{Browser, BrowserLauncher};
use crate::error::BrowserError;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct ChromeLauncher {
    user_agent: String,
}

impl ChromeLauncher {
    pub fn new(user_agent: &str) -> Self {
        Self {
            user_agent: user_agent.to_string(),
        }
    }
}

fn cdp_err(url: &str, err: impl std::fmt::Display) -> BrowserError {
    BrowserError::Navigation {
        url: url.to_string(),
        message: err.to_string(),
    }
}

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch(&self) -> Result<Box<dyn Browser>, BrowserError> {
        let config = BrowserConfig::builder()
            .arg(format!("--user-agent={}", self.user_agent))
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .build()
            .map_err(BrowserError::Unsupported)?;

        let (browser, mut handler) = Chromium::launch(config)
            .await
            .map_err(|e| cdp_err("about:blank", e))?;
        let events = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(%err, "chromium handler stopped");
                    break;
                }
            }
        });
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| cdp_err("about:blank", e))?;

        Ok(Box::new(ChromeSession {
            browser: Mutex::new(Some(browser)),
            page,
            events,
        }))
    }
}

pub struct ChromeSession {
    browser: Mutex<Option<Chromium>>,
    page: Page,
    events: JoinHandle<()>,
}

impl ChromeSession {
    async fn is_visible(&self, selector: &str) -> Result<bool, BrowserError> {
        let quoted = serde_json::to_string(selector)
            .map_err(|e| BrowserError::Evaluation(e.to_string()))?;
        let script = format!(
            "(() => {{ const el = document.querySelector({}); if (!el) return false; \
             const r = el.getBoundingClientRect(); return r.width > 0 || r.height > 0; }})()",
            quoted
        );
        Ok(self.evaluate(&script).await?.as_bool().unwrap_or(false))
    }
}

#[async_trait]
impl Browser for ChromeSession {
    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        self.page.goto(url).await.map_err(|e| cdp_err(url, e))?;
        Ok(())
    }

    async fn wait_visible(&self, selector: &str, timeout: Duration) -> Result<(), BrowserError> {
        let poll = async {
            loop {
                if self.is_visible(selector).await? {
                    return Ok(());
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        };
        match tokio::time::timeout(timeout, poll).await {
            Ok(res) => res,
            Err(_) => Err(BrowserError::Timeout {
                selector: selector.to_string(),
                waited_ms: timeout.as_millis() as u64,
            }),
        }
    }

    async fn evaluate(&self, script: &str) -> Result<Value, BrowserError> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| BrowserError::Evaluation(e.to_string()))?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn click(&self, selector: &str) -> Result<(), BrowserError> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| BrowserError::ElementNotFound(selector.to_string()))?;
        element
            .click()
            .await
            .map_err(|e| BrowserError::Evaluation(e.to_string()))?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        let url = self
            .page
            .url()
            .await
            .map_err(|e| BrowserError::Evaluation(e.to_string()))?;
        Ok(url.unwrap_or_default())
    }

    async fn title(&self) -> Result<String, BrowserError> {
        let title = self
            .page
            .get_title()
            .await
            .map_err(|e| BrowserError::Evaluation(e.to_string()))?;
        Ok(title.unwrap_or_default())
    }

    async fn content(&self) -> Result<String, BrowserError> {
        self.page
            .content()
            .await
            .map_err(|e| BrowserError::Evaluation(e.to_string()))
    }

    async fn close(&self) -> Result<(), BrowserError> {
        let Some(mut browser) = self.browser.lock().await.take() else {
            return Ok(());
        };
        if let Err(err) = self.page.clone().close().await {
            warn!(%err, "failed to close page");
        }
        if let Err(err) = browser.close().await {
            warn!(%err, "failed to close browser");
        }
        let _ = browser.wait().await;
        self.events.abort();
        Ok(())
    }
}
