//! Browser automation seam.
//!
//! The crawl controller and repair worker only talk to these traits; the Chromium driver
//! lives behind the `chrome` feature.
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::error::BrowserError;

#[cfg(feature = "chrome")]
pub mod chrome;

/// One page in one browser process.
#[async_trait]
pub trait Browser: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), BrowserError>;

    /// Resolves once `selector` matches a rendered element, or fails with
    /// [`BrowserError::Timeout`] after `timeout`.
    async fn wait_visible(&self, selector: &str, timeout: Duration) -> Result<(), BrowserError>;

    async fn evaluate(&self, script: &str) -> Result<Value, BrowserError>;

    async fn click(&self, selector: &str) -> Result<(), BrowserError>;

    /// URL after redirects.
    async fn current_url(&self) -> Result<String, BrowserError>;

    async fn title(&self) -> Result<String, BrowserError>;

    /// Outer HTML of the whole document.
    async fn content(&self) -> Result<String, BrowserError>;

    /// Tears the session down and releases the browser process.
    async fn close(&self) -> Result<(), BrowserError>;
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn Browser>, BrowserError>;
}

/// Launcher used when the binary was built without a browser driver.
#[derive(Debug, Clone, Default)]
pub struct UnavailableLauncher;

#[async_trait]
impl BrowserLauncher for UnavailableLauncher {
    async fn launch(&self) -> Result<Box<dyn Browser>, BrowserError> {
        Err(BrowserError::Unsupported(
            "rebuild with `--features chrome` to drive a real browser".into(),
        ))
    }
}

/// The best launcher this build supports.
pub fn default_launcher(user_agent: &str) -> Arc<dyn BrowserLauncher> {
    #[cfg(feature = "chrome")]
    {
        Arc::new(chrome::ChromeLauncher::new(user_agent))
    }
    #[cfg(not(feature = "chrome"))]
    {
        let _ = user_agent;
        Arc::new(UnavailableLauncher)
    }
}
