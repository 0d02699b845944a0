use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use futures::StreamExt as _;
use tokio::task::JoinHandle;

/// One browser tab, reduced to the operations the harvester needs.
#[async_trait]
pub trait PageSession: Send + Sync {
    async fn navigate(&self, url: &str, timeout: Duration) -> anyhow::Result<()>;

    /// Serialized DOM of the current document.
    async fn content(&self) -> anyhow::Result<String>;

    async fn evaluate(&self, script: &str) -> anyhow::Result<serde_json::Value>;

    async fn upload_file(&self, selector: &str, path: &Path) -> anyhow::Result<()>;

    /// `Ok(false)` when the selector did not match before `timeout`.
    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> anyhow::Result<bool>;

    async fn close(&self) -> anyhow::Result<()>;
}

#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn open_session(&self) -> anyhow::Result<Box<dyn PageSession>>;
}

/// Reads structured data out of a DOM snapshot.
pub trait Extractor {
    type Output;

    fn extract(&self, url: &str, document: &scraper::Html) -> Self::Output;
}

pub async fn evaluate_with<E: Extractor>(
    session: &dyn PageSession,
    url: &str,
    extractor: &E,
) -> anyhow::Result<E::Output> {
    let html = session.content().await.context("read page content")?;
    let document = scraper::Html::parse_document(&html);
    Ok(extractor.extract(url, &document))
}

#[derive(Debug, Clone, Default)]
pub struct ChromiumOptions {
    pub headless: bool,
    pub chrome_path: Option<PathBuf>,
}

pub struct ChromiumDriver {
    browser: Browser,
    handler_task: JoinHandle<()>,
}

impl ChromiumDriver {
    pub async fn launch(options: &ChromiumOptions) -> anyhow::Result<Self> {
        let mut builder = BrowserConfig::builder()
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--allow-file-access-from-files");
        if !options.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &options.chrome_path {
            builder = builder.chrome_executable(path);
        }
        let config = builder
            .build()
            .map_err(|err| anyhow::anyhow!("build browser config: {err}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("launch headless chrome")?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    tracing::debug!(?err, "browser handler event error");
                }
            }
        });

        Ok(Self {
            browser,
            handler_task,
        })
    }

    pub async fn shutdown(mut self) {
        if let Err(err) = self.browser.close().await {
            tracing::warn!(?err, "close browser");
        }
        let _ = self.browser.wait().await;
        self.handler_task.abort();
    }
}

#[async_trait]
impl BrowserDriver for ChromiumDriver {
    async fn open_session(&self) -> anyhow::Result<Box<dyn PageSession>> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .context("open browser tab")?;
        Ok(Box::new(ChromiumSession { page }))
    }
}

struct ChromiumSession {
    page: chromiumoxide::Page,
}

const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[async_trait]
impl PageSession for ChromiumSession {
    async fn navigate(&self, url: &str, timeout: Duration) -> anyhow::Result<()> {
        let navigation = async {
            self.page.goto(url).await?;
            self.page.wait_for_navigation().await?;
            Ok::<_, chromiumoxide::error::CdpError>(())
        };
        tokio::time::timeout(timeout, navigation)
            .await
            .map_err(|_| anyhow::anyhow!("navigation timed out after {timeout:?}: {url}"))?
            .with_context(|| format!("navigate: {url}"))
    }

    async fn content(&self) -> anyhow::Result<String> {
        self.page.content().await.context("read page html")
    }

    async fn evaluate(&self, script: &str) -> anyhow::Result<serde_json::Value> {
        let result = self.page.evaluate(script).await.context("evaluate script")?;
        Ok(result.into_value().unwrap_or(serde_json::Value::Null))
    }

    async fn upload_file(&self, selector: &str, path: &Path) -> anyhow::Result<()> {
        let path = std::fs::canonicalize(path)
            .with_context(|| format!("resolve upload path: {}", path.display()))?;
        let input = self
            .page
            .find_element(selector)
            .await
            .with_context(|| format!("find file input: {selector}"))?;

        let mut params = SetFileInputFilesParams::new(vec![path.to_string_lossy().to_string()]);
        params.backend_node_id = Some(input.backend_node_id);
        self.page
            .execute(params)
            .await
            .with_context(|| format!("set file input files: {selector}"))?;
        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> anyhow::Result<bool> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Ok(elements) = self.page.find_elements(selector).await
                && !elements.is_empty()
            {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(SELECTOR_POLL_INTERVAL).await;
        }
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.page.clone().close().await.context("close browser tab")
    }
}
