//! Page content retrieval with a layered fallback strategy.
//!
//! Direct HTTP GET first; on any non-success status or transport error the
//! page is rendered in a headless Chromium instance (with consent-dialog
//! dismissal) and the rendered DOM is read back. Both paths failing yields
//! `None` — the fetcher never errors to the orchestrator on its own.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::handler::Handler;
use chromiumoxide::Page;
use futures::StreamExt;
use metrics::counter;
use tracing::{debug, warn};

use crate::config::FetchConfig;

/// Seam the orchestrator drives. `Ok(None)` means every strategy was tried
/// and the page is simply unreachable; `Err` is reserved for unexpected
/// failures outside the fetcher's own fallback chain.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Option<String>>;
}

pub struct PageFetcher {
    http: reqwest::Client,
    cfg: FetchConfig,
}

impl PageFetcher {
    pub fn new(cfg: FetchConfig) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(&cfg.user_agent)
            .connect_timeout(Duration::from_secs(cfg.connect_timeout_secs))
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .expect("reqwest client");
        Self { http, cfg }
    }

    async fn fetch_direct(&self, url: &str) -> Result<String> {
        let resp = self.http.get(url).send().await.context("direct GET")?;
        if !resp.status().is_success() {
            anyhow::bail!("non-success status {}", resp.status());
        }
        resp.text().await.context("reading response body")
    }

    async fn launch_browser(&self) -> Result<(Browser, Handler)> {
        let b = &self.cfg.browser;
        if let Some(ws) = &b.remote_ws_url {
            return Browser::connect(ws.clone())
                .await
                .context("connecting to remote browser");
        }

        let mut builder = BrowserConfig::builder()
            .window_size(b.window_width, b.window_height)
            .arg(format!("--user-agent={}", self.cfg.user_agent));
        if let Some(path) = &b.binary_path {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(|e| anyhow::anyhow!(e))?;
        Browser::launch(config).await.context("launching browser")
    }

    async fn fetch_rendered(&self, url: &str) -> Result<String> {
        let (mut browser, mut handler) = self.launch_browser().await?;
        let driver = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let result = self.render_page(&browser, url).await;

        // The browser process is released on every exit path.
        if let Err(e) = browser.close().await {
            warn!(error = ?e, "browser close failed");
        }
        let _ = browser.wait().await;
        driver.abort();

        result
    }

    async fn render_page(&self, browser: &Browser, url: &str) -> Result<String> {
        let page = PageGuard::new(browser.new_page(url).await.context("opening page")?);
        tokio::time::sleep(Duration::from_millis(self.cfg.browser.settle_delay_ms)).await;
        dismiss_consent_overlays(page.page()).await;
        let html = page
            .page()
            .content()
            .await
            .context("reading rendered DOM")?;
        page.close().await;
        Ok(html)
    }
}

#[async_trait]
impl ContentFetcher for PageFetcher {
    async fn fetch(&self, url: &str) -> Result<Option<String>> {
        match self.fetch_direct(url).await {
            Ok(html) => return Ok(Some(html)),
            Err(e) => {
                debug!(error = ?e, url, "direct fetch failed, trying headless render");
                counter!("fetch_fallback_total").increment(1);
            }
        }
        match self.fetch_rendered(url).await {
            Ok(html) => Ok(Some(html)),
            Err(e) => {
                warn!(error = ?e, url, "headless render failed");
                counter!("fetch_failed_total").increment(1);
                Ok(None)
            }
        }
    }
}

/// Guard that closes the CDP page on every exit path. `Page` has no `Drop`
/// of its own; an unclosed page leaks a browser target.
struct PageGuard {
    page: Option<Page>,
    runtime: tokio::runtime::Handle,
}

impl PageGuard {
    fn new(page: Page) -> Self {
        Self {
            page: Some(page),
            runtime: tokio::runtime::Handle::current(),
        }
    }

    fn page(&self) -> &Page {
        self.page.as_ref().expect("page already closed")
    }

    async fn close(mut self) {
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                debug!(error = ?e, "page close failed");
            }
        }
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        if let Some(page) = self.page.take() {
            self.runtime.spawn(async move {
                let _ = page.close().await;
            });
        }
    }
}

/// Prioritized CSS heuristics for cookie/consent dialogs. First match that
/// clicks wins.
const CONSENT_SELECTORS: &[&str] = &[
    "#onetrust-accept-btn-handler",
    "button[id*='accept']",
    "button[class*='accept']",
    "button[id*='consent']",
    "button[class*='consent']",
    "button[id*='agree']",
    "[class*='cookie'] button",
];

/// Case-insensitive label scan, clicking the first visible and enabled
/// button-like element. Runs in the page because visibility is a layout
/// question.
const CONSENT_TEXT_CLICK: &str = r#"() => {
    const words = ["accept", "agree", "allow"];
    const nodes = document.querySelectorAll("button, [role='button'], input[type='submit'], a");
    for (const el of nodes) {
        const label = ((el.innerText || el.value || "") + "").toLowerCase();
        if (!words.some((w) => label.includes(w))) continue;
        const rect = el.getBoundingClientRect();
        if (rect.width === 0 || rect.height === 0 || el.disabled) continue;
        el.click();
        return true;
    }
    return false;
}"#;

async fn dismiss_consent_overlays(page: &Page) {
    for sel in CONSENT_SELECTORS {
        if let Ok(el) = page.find_element(*sel).await {
            if el.click().await.is_ok() {
                debug!(selector = sel, "dismissed consent overlay");
                return;
            }
        }
    }
    match page.evaluate_function(CONSENT_TEXT_CLICK).await {
        Ok(res) => {
            if res.value().and_then(|v| v.as_bool()).unwrap_or(false) {
                debug!("dismissed consent overlay via text match");
            }
        }
        Err(e) => debug!(error = ?e, "consent text scan failed"),
    }
}
