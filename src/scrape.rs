use std::sync::Arc;
use std::time::Duration;

use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::browser::{Extractor, PageSession, evaluate_with};
use crate::formats::ProductRecord;
use crate::image_store;
use crate::record_store::RecordStore;
use crate::retry::{RetryError, RetryPolicy, retry_with_backoff};

pub const DEFAULT_CATEGORY_LABEL: &str = "Capteurs";
pub const NAVIGATION_BACKOFF: Duration = Duration::from_secs(3);

#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("navigation retries exhausted after {attempts} attempts: {url}")]
    Exhausted {
        url: String,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error("read page {url}")]
    Session {
        url: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("append product record for {url}")]
    Store {
        url: String,
        #[source]
        source: anyhow::Error,
    },
}

/// CSS selectors for one storefront theme.
#[derive(Debug, Clone)]
pub struct ProductSelectors {
    pub breadcrumb: String,
    pub breadcrumb_position: usize,
    pub images: String,
    pub name: String,
    pub model: String,
    pub document_links: String,
    pub description: String,
}

impl Default for ProductSelectors {
    fn default() -> Self {
        Self {
            breadcrumb: ".breadcrumb.hidden-sm-down>ol>li>a>span".to_owned(),
            breadcrumb_position: 2,
            images: ".col-md-6 .thumb-container img".to_owned(),
            name: ".col-md-6 h1".to_owned(),
            model: ".col-md-6 .product-h2".to_owned(),
            document_links: ".col-md-6 a[href]".to_owned(),
            description: ".product-description".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScrapedProduct {
    pub image_urls: Vec<String>,
    pub name: Option<String>,
    pub model: String,
    pub datasheet: String,
    pub user_manual: String,
    pub description: Option<String>,
}

impl ScrapedProduct {
    /// Canonical product id: stem of the first image's file name, prefixed by
    /// the model when one is known.
    pub fn product_id(&self) -> Option<String> {
        let first = self.image_urls.first()?;
        let file_name = image_store::url_file_name(&image_store::full_size_url(first)).ok()?;
        let stem = match file_name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => file_name.as_str(),
        };
        let id = if self.model.trim().is_empty() {
            stem.to_owned()
        } else {
            format!("{}-{stem}", self.model)
        };
        Some(image_store::sanitize_segment(&id))
    }

    pub fn to_record(&self, link: &str) -> Option<ProductRecord> {
        let name = self.name.as_deref().filter(|n| !n.is_empty())?;
        let id = self.product_id()?;
        Some(ProductRecord {
            id,
            name: name.to_owned(),
            model: self.model.clone(),
            datasheet: self.datasheet.clone(),
            user_manual: self.user_manual.clone(),
            description: self.description.clone(),
            link: link.to_owned(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ProductExtractor {
    pub category_label: String,
    pub selectors: ProductSelectors,
}

impl ProductExtractor {
    pub fn new(category_label: impl Into<String>) -> Self {
        Self {
            category_label: category_label.into(),
            selectors: ProductSelectors::default(),
        }
    }

    fn in_category(&self, document: &Html) -> bool {
        let Some(selector) = parse_selector(&self.selectors.breadcrumb) else {
            return false;
        };
        document
            .select(&selector)
            .nth(self.selectors.breadcrumb_position)
            .is_some_and(|crumb| element_text(crumb) == self.category_label)
    }
}

impl Extractor for ProductExtractor {
    /// `None` when the page is outside the configured category.
    type Output = Option<ScrapedProduct>;

    fn extract(&self, url: &str, document: &Html) -> Self::Output {
        if !self.in_category(document) {
            return None;
        }
        let base = Url::parse(url).ok();

        let image_urls = select_all(document, &self.selectors.images)
            .filter_map(|img| img.value().attr("src"))
            .filter_map(|src| resolve(base.as_ref(), src))
            .collect();

        let mut datasheet = String::new();
        let mut user_manual = String::new();
        for link in select_all(document, &self.selectors.document_links) {
            let Some(href) = link.value().attr("href").and_then(|h| resolve(base.as_ref(), h))
            else {
                continue;
            };
            let text = element_text(link).to_lowercase();
            if datasheet.is_empty()
                && (text.contains("fiche technique") || text.contains("datasheet"))
            {
                datasheet = href;
            } else if user_manual.is_empty()
                && (text.contains("manuel") || text.contains("notice") || text.contains("manual"))
            {
                user_manual = href;
            }
        }

        Some(ScrapedProduct {
            image_urls,
            name: select_text(document, &self.selectors.name),
            model: select_text(document, &self.selectors.model).unwrap_or_default(),
            datasheet,
            user_manual,
            description: select_text(document, &self.selectors.description),
        })
    }
}

fn parse_selector(selector: &str) -> Option<Selector> {
    match Selector::parse(selector) {
        Ok(selector) => Some(selector),
        Err(err) => {
            tracing::warn!(selector, ?err, "invalid css selector");
            None
        }
    }
}

fn select_all<'a>(document: &'a Html, selector: &str) -> impl Iterator<Item = ElementRef<'a>> {
    let selector = parse_selector(selector);
    selector
        .into_iter()
        .flat_map(move |selector| document.select(&selector).collect::<Vec<_>>())
}

fn select_text(document: &Html, selector: &str) -> Option<String> {
    select_all(document, selector)
        .map(element_text)
        .find(|text| !text.is_empty())
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn resolve(base: Option<&Url>, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with("data:") {
        return None;
    }
    match Url::parse(href) {
        Ok(url) => Some(url.to_string()),
        Err(_) => base?.join(href).ok().map(|url| url.to_string()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScrapeOutcome {
    /// Outside the category filter.
    Skipped,
    Product {
        product: ScrapedProduct,
        record: Option<ProductRecord>,
    },
}

pub struct PageScraper {
    extractor: ProductExtractor,
    store: Arc<RecordStore>,
    navigation: RetryPolicy,
    navigation_timeout: Duration,
}

impl PageScraper {
    pub fn new(
        extractor: ProductExtractor,
        store: Arc<RecordStore>,
        retry_limit: u32,
        navigation_timeout: Duration,
    ) -> Self {
        Self {
            extractor,
            store,
            navigation: RetryPolicy::new(retry_limit, NAVIGATION_BACKOFF),
            navigation_timeout,
        }
    }

    pub async fn scrape(
        &self,
        session: &dyn PageSession,
        url: &str,
    ) -> Result<ScrapeOutcome, ScrapeError> {
        retry_with_backoff(
            self.navigation,
            |attempt| async move {
                tracing::debug!(url, attempt, "navigate");
                session.navigate(url, self.navigation_timeout).await
            },
            |_| true,
        )
        .await
        .map_err(|err| match err {
            RetryError::Exhausted { attempts, last } => ScrapeError::Exhausted {
                url: url.to_owned(),
                attempts,
                source: last,
            },
            RetryError::Fatal(source) => ScrapeError::Session {
                url: url.to_owned(),
                source,
            },
        })?;

        let extracted = evaluate_with(session, url, &self.extractor)
            .await
            .map_err(|source| ScrapeError::Session {
                url: url.to_owned(),
                source,
            })?;
        let Some(product) = extracted else {
            tracing::debug!(url, "outside category; skipping");
            return Ok(ScrapeOutcome::Skipped);
        };

        let record = product.to_record(url);
        if let Some(record) = &record {
            self.store
                .append(record)
                .await
                .map_err(|source| ScrapeError::Store {
                    url: url.to_owned(),
                    source,
                })?;
        }

        tracing::info!(
            url,
            images = product.image_urls.len(),
            recorded = record.is_some(),
            "scraped product page"
        );
        Ok(ScrapeOutcome::Product { product, record })
    }
}
