use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use quarry_core::error::AppError;
use quarry_core::traits::Fetcher;

use crate::fetcher::block_marker;

/// Scroll to the bottom so lazy-loaded sections render, then report the height.
const SCROLL_SCRIPT: &str = "window.scrollTo(0, document.body.scrollHeight); document.body.scrollHeight";

/// Headless-browser fetcher using Chromium via the Chrome DevTools Protocol.
///
/// Last rung of the ladder: renders JavaScript, scrolls to trigger lazy
/// content, and returns the rendered DOM. A single Chromium process is
/// shared across all clones; each fetch opens and closes its own tab.
///
/// # Example
///
/// ```rust,no_run
/// use quarry_client::BrowserFetcher;
/// use quarry_core::traits::Fetcher;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let fetcher = BrowserFetcher::new().await?;
/// let html = fetcher.fetch("https://example.com").await?;
/// println!("{}", &html[..200]);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct BrowserFetcher {
    browser: Arc<Browser>,
    timeout: Duration,
    settle: Duration,
}

impl BrowserFetcher {
    /// Launches a headless Chromium browser with a **45 s** page timeout.
    ///
    /// Requires a Chromium / Chrome binary reachable via `$PATH`, `CHROME_BIN`,
    /// or the default locations checked by `chromiumoxide`.
    pub async fn new() -> Result<Self, AppError> {
        Self::with_timeout(Duration::from_secs(45)).await
    }

    pub async fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        let mut builder = BrowserConfig::builder();
        builder = builder.no_sandbox().disable_default_args();

        // Snap-packaged Chromium exposes a wrapper that rejects standard
        // Chrome CLI flags, so prefer the real binary when one is found.
        if let Some(bin) = Self::find_chrome_binary() {
            tracing::info!("Using Chrome binary: {}", bin.display());
            builder = builder.chrome_executable(bin);
        }

        let config = builder
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--no-first-run")
            .arg("--window-size=1366,900")
            .build()
            .map_err(|e| AppError::Generic(format!("Browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::NotConfigured(format!("Failed to launch browser: {e}")))?;

        // The CDP handler must be polled continuously for the connection to work.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    tracing::warn!("Browser CDP handler error: {event:?}");
                    break;
                }
            }
        });

        Ok(Self {
            browser: Arc::new(browser),
            timeout,
            settle: Duration::from_millis(1500),
        })
    }

    /// How long to wait after scrolling for lazy content to arrive.
    pub fn with_settle_time(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    fn find_chrome_binary() -> Option<PathBuf> {
        let candidates: &[&str] = &[
            "/snap/chromium/current/usr/lib/chromium-browser/chrome",
            "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
        ];

        if let Ok(p) = std::env::var("CHROME_BIN") {
            let path = PathBuf::from(&p);
            if path.exists() {
                return Some(path);
            }
        }

        candidates.iter().map(PathBuf::from).find(|p| p.exists())
    }

    async fn render(&self, url: &str) -> Result<String, AppError> {
        let page = self
            .browser
            .new_page(url)
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to navigate to {url}: {e}")))?;

        let rendered = async {
            page.find_element("body")
                .await
                .map_err(|e| AppError::HttpError(format!("Page did not render body: {e}")))?;

            if let Err(e) = page.evaluate(SCROLL_SCRIPT).await {
                tracing::debug!(%url, error = %e, "Scroll script failed");
            }
            tokio::time::sleep(self.settle).await;

            page.content()
                .await
                .map_err(|e| AppError::HttpError(format!("Failed to read page content: {e}")))
        }
        .await;

        let _ = page.close().await;
        rendered
    }
}

impl Fetcher for BrowserFetcher {
    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        let html = match tokio::time::timeout(self.timeout, self.render(url)).await {
            Ok(inner) => inner?,
            Err(_) => return Err(AppError::Timeout(self.timeout.as_secs())),
        };

        if let Some(marker) = block_marker(&html) {
            return Err(AppError::Blocked(format!("'{marker}' page at {url}")));
        }
        Ok(html)
    }
}
