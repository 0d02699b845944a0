use std::collections::HashSet;
use std::io::Cursor;

use reqwest::header::{ACCEPT, USER_AGENT};
use sitemap::reader::{SiteMapEntity, SiteMapReader};

/// Child sitemaps followed from a sitemap index, across all levels.
const MAX_CHILD_SITEMAPS: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("GET {url}: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("GET {url} failed ({status})")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("parse sitemap {url}: {message}")]
    Parse { url: String, message: String },

    #[error("sitemap {url} lists no pages or child sitemaps")]
    Empty { url: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedSitemap {
    pub urls: Vec<String>,
    pub child_sitemaps: Vec<String>,
}

pub fn parse_sitemap(source_url: &str, xml: &str) -> Result<ParsedSitemap, FetchError> {
    let mut parsed = ParsedSitemap::default();
    for entity in SiteMapReader::new(Cursor::new(xml.as_bytes())) {
        match entity {
            SiteMapEntity::Url(entry) => {
                if let Some(loc) = entry.loc.get_url() {
                    parsed.urls.push(loc.to_string());
                }
            }
            SiteMapEntity::SiteMap(entry) => {
                if let Some(loc) = entry.loc.get_url() {
                    parsed.child_sitemaps.push(loc.to_string());
                }
            }
            SiteMapEntity::Err(err) => {
                return Err(FetchError::Parse {
                    url: source_url.to_owned(),
                    message: err.to_string(),
                });
            }
        }
    }
    if parsed.urls.is_empty() && parsed.child_sitemaps.is_empty() {
        return Err(FetchError::Empty {
            url: source_url.to_owned(),
        });
    }
    Ok(parsed)
}

/// Page URLs listed by the sitemap at `sitemap_url`, following sitemap
/// indexes. Failures are logged and yield whatever was collected so far.
pub async fn fetch_urls(client: &reqwest::Client, sitemap_url: &str) -> Vec<String> {
    let mut urls = Vec::new();
    let mut visited = HashSet::new();
    let mut pending = vec![sitemap_url.to_owned()];

    while let Some(current) = pending.pop() {
        if !visited.insert(current.clone()) {
            continue;
        }
        if visited.len() > MAX_CHILD_SITEMAPS + 1 {
            tracing::warn!(sitemap = %current, "too many child sitemaps; stopping");
            break;
        }

        match fetch_one(client, &current).await {
            Ok(parsed) => {
                tracing::debug!(
                    sitemap = %current,
                    urls = parsed.urls.len(),
                    children = parsed.child_sitemaps.len(),
                    "parsed sitemap"
                );
                urls.extend(parsed.urls);
                pending.extend(parsed.child_sitemaps.into_iter().rev());
            }
            Err(err) => {
                tracing::error!(error = %err, "error fetching or parsing sitemap");
            }
        }
    }

    let mut seen = HashSet::new();
    urls.retain(|url| seen.insert(url.clone()));
    urls
}

async fn fetch_one(client: &reqwest::Client, url: &str) -> Result<ParsedSitemap, FetchError> {
    let unreachable = |source| FetchError::Unreachable {
        url: url.to_owned(),
        source,
    };
    let response = client
        .get(url)
        .header(USER_AGENT, "imgharvest/0.1")
        .header(ACCEPT, "application/xml,text/xml;q=0.9,*/*;q=0.8")
        .send()
        .await
        .map_err(unreachable)?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            url: url.to_owned(),
            status,
        });
    }

    let body = response.text().await.map_err(unreachable)?;
    parse_sitemap(url, &body)
}
