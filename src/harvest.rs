use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use chrono::Utc;

use crate::augment::{AugmentRequest, ImageAugmenter};
use crate::background::{BackgroundRemover, HttpRemover, Passthrough};
use crate::browser::{BrowserDriver, ChromiumDriver, ChromiumOptions};
use crate::cli::RunArgs;
use crate::config::{HarvestConfig, RemoverKind};
use crate::formats::RunSummary;
use crate::image_store;
use crate::record_store::RecordStore;
use crate::retry::RetryPolicy;
use crate::scrape::{PageScraper, ProductExtractor, ScrapeOutcome};

const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

pub async fn run(args: RunArgs) -> anyhow::Result<()> {
    let config = HarvestConfig::from_args(&args).context("load config")?;
    tracing::debug!(?config, "resolved config");

    for dir in [config.images_dir(), config.augmented_dir()] {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create output dir: {}", dir.display()))?;
    }

    let client = crate::background::http_client(HTTP_TIMEOUT)?;
    let mut urls = if config.pages.is_empty() {
        tracing::info!(sitemap = %config.sitemap_url, "fetch sitemap");
        crate::sitemap::fetch_urls(&client, &config.sitemap_url).await
    } else {
        config.pages.clone()
    };
    if let Some(max) = config.max_pages {
        urls.truncate(max);
    }
    if urls.is_empty() {
        tracing::warn!("no pages to process");
        return write_summary(&config, RunSummary::start(0));
    }

    let remover: Arc<dyn BackgroundRemover> = match config.background_remover {
        RemoverKind::None => Arc::new(Passthrough::new(client.clone())),
        RemoverKind::Http => Arc::new(HttpRemover::new(client.clone(), &config.remover_endpoint)?),
    };
    let augment_page_url = match (&config.augment_page_url, config.augment) {
        (_, false) => None,
        (Some(url), true) => Some(url.clone()),
        (None, true) => Some(crate::augment::install_bundled_page(&config.output_dir)?),
    };

    let chromium = Arc::new(
        ChromiumDriver::launch(&ChromiumOptions {
            headless: config.headless,
            chrome_path: config.chrome_path.clone(),
        })
        .await?,
    );
    let harvester = Harvester::new(
        config.clone(),
        Arc::clone(&chromium) as Arc<dyn BrowserDriver>,
        remover,
        augment_page_url,
    );

    let outcome = tokio::select! {
        result = harvester.run(&urls) => result,
        _ = tokio::signal::ctrl_c() => Err(anyhow::anyhow!("interrupted")),
    };

    drop(harvester);
    match Arc::try_unwrap(chromium) {
        Ok(chromium) => chromium.shutdown().await,
        Err(_) => tracing::warn!("browser still in use; skipping shutdown"),
    }

    let summary = outcome?;
    tracing::info!(
        pages = summary.pages_total,
        scraped = summary.pages_scraped,
        skipped = summary.pages_skipped,
        failed = summary.pages_failed,
        records = summary.records_appended,
        images = summary.images_saved,
        image_failures = summary.images_failed,
        variants = summary.variants_written,
        "run finished"
    );
    write_summary(&config, summary)
}

fn write_summary(config: &HarvestConfig, mut summary: RunSummary) -> anyhow::Result<()> {
    summary.finished_at.get_or_insert_with(Utc::now);
    let path = config.summary_path();
    let data = serde_json::to_vec_pretty(&summary).context("serialize run summary")?;
    std::fs::write(&path, data).with_context(|| format!("write run summary: {}", path.display()))
}

/// One scraping session over a list of pages; per-page and per-image failures
/// are logged and counted, never propagated.
pub struct Harvester {
    config: HarvestConfig,
    driver: Arc<dyn BrowserDriver>,
    remover: Arc<dyn BackgroundRemover>,
    scraper: PageScraper,
    augmenter: Option<ImageAugmenter>,
}

impl Harvester {
    pub fn new(
        config: HarvestConfig,
        driver: Arc<dyn BrowserDriver>,
        remover: Arc<dyn BackgroundRemover>,
        augment_page_url: Option<String>,
    ) -> Self {
        let store = Arc::new(RecordStore::open(config.records_path()));
        let scraper = PageScraper::new(
            ProductExtractor::new(config.category_label.clone()),
            store,
            config.retry_limit,
            config.navigation_timeout(),
        );
        let augmenter = augment_page_url.map(|page_url| {
            ImageAugmenter::new(
                Arc::clone(&driver),
                page_url,
                config.augmented_dir(),
                config.navigation_timeout(),
                config.poll_timeout(),
            )
            .with_poll_policy(RetryPolicy::new(
                config.retry_limit,
                crate::augment::POLL_BACKOFF,
            ))
        });

        Self {
            config,
            driver,
            remover,
            scraper,
            augmenter,
        }
    }

    pub async fn run(&self, urls: &[String]) -> anyhow::Result<RunSummary> {
        let mut summary = RunSummary::start(urls.len());
        let session = self
            .driver
            .open_session()
            .await
            .context("open scraping session")?;

        for (index, url) in urls.iter().enumerate() {
            tracing::info!(page = index + 1, total = urls.len(), url = %url, "processing page");
            let outcome = match self.scraper.scrape(session.as_ref(), url).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    summary.pages_failed += 1;
                    let err = anyhow::Error::new(err);
                    tracing::error!(url = %url, "page failed: {err:#}");
                    continue;
                }
            };

            let ScrapeOutcome::Product { product, record } = outcome else {
                summary.pages_skipped += 1;
                continue;
            };
            summary.pages_scraped += 1;
            if record.is_some() {
                summary.records_appended += 1;
            }

            let product_id = record.map(|r| r.id).or_else(|| product.product_id());
            let tasks = product.image_urls.iter().enumerate().map(|(image_index, image_url)| {
                self.process_image(image_index, image_url, &product.model, product_id.as_deref())
            });
            for (image_index, result) in futures::future::join_all(tasks).await.into_iter().enumerate() {
                match result {
                    Ok(variants) => {
                        summary.images_saved += 1;
                        summary.variants_written += variants;
                    }
                    Err(err) => {
                        summary.images_failed += 1;
                        tracing::error!(url = %url, image_index, "image failed: {err:#}");
                    }
                }
            }
        }

        if let Err(err) = session.close().await {
            tracing::debug!(?err, "close scraping session");
        }
        summary.finished_at = Some(Utc::now());
        Ok(summary)
    }

    /// Saves one image and returns the number of augmented variants written.
    async fn process_image(
        &self,
        image_index: usize,
        image_url: &str,
        model: &str,
        product_id: Option<&str>,
    ) -> anyhow::Result<usize> {
        let asset = image_store::image_asset(image_index, model, image_url)?;
        let image = self
            .remover
            .remove_background(&asset.url)
            .await
            .with_context(|| format!("fetch image {}", asset.url))?;
        let path: PathBuf =
            image_store::write_image(&self.config.images_dir(), &asset.file_name, &image.bytes)
                .await?;
        tracing::info!(path = %path.display(), "saved image");

        let Some(augmenter) = &self.augmenter else {
            return Ok(0);
        };
        let Some(label) = product_id else {
            tracing::warn!(path = %path.display(), "no product id; skipping augmentation");
            return Ok(0);
        };
        let written = augmenter
            .augment(AugmentRequest {
                source: &path,
                label,
                image_index,
            })
            .await?;
        Ok(written.len())
    }
}
