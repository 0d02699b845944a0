use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use serde::Deserialize;
use url::Url;

use crate::cli::RunArgs;

pub const DEFAULT_SITEMAP_URL: &str = "https://www.alliantech.com/1_fr_0_sitemap.xml";
pub const DEFAULT_REMOVER_ENDPOINT: &str = "http://127.0.0.1:7000/api/remove";

pub const RECORDS_FILE: &str = "productsInfo.json";
pub const IMAGES_DIR: &str = "images";
pub const AUGMENTED_DIR: &str = "augmented_images";
pub const SUMMARY_FILE: &str = "run-summary.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum RemoverKind {
    /// Keep the original image.
    None,
    /// Call an HTTP background removal service.
    Http,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct HarvestConfig {
    pub sitemap_url: String,
    pub pages: Vec<String>,
    pub navigation_timeout_ms: u64,
    pub poll_timeout_ms: u64,
    pub retry_limit: u32,
    pub output_dir: PathBuf,
    pub category_label: String,
    pub augment_page_url: Option<String>,
    pub background_remover: RemoverKind,
    pub remover_endpoint: String,
    pub augment: bool,
    pub max_pages: Option<usize>,
    pub headless: bool,
    pub chrome_path: Option<PathBuf>,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            sitemap_url: DEFAULT_SITEMAP_URL.to_owned(),
            pages: Vec::new(),
            navigation_timeout_ms: 60_000,
            poll_timeout_ms: 5_000,
            retry_limit: 3,
            output_dir: PathBuf::from("."),
            category_label: crate::scrape::DEFAULT_CATEGORY_LABEL.to_owned(),
            augment_page_url: None,
            background_remover: RemoverKind::None,
            remover_endpoint: DEFAULT_REMOVER_ENDPOINT.to_owned(),
            augment: true,
            max_pages: None,
            headless: true,
            chrome_path: None,
        }
    }
}

impl HarvestConfig {
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(yaml).context("parse config yaml")
    }

    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("read config: {}", path.display()))?;
        Self::from_yaml(&yaml).with_context(|| format!("load config: {}", path.display()))
    }

    pub fn from_args(args: &RunArgs) -> anyhow::Result<Self> {
        let mut config = Self::load(args.config.as_deref().map(Path::new))?;
        config.apply_args(args);
        config.validate()?;
        Ok(config)
    }

    pub fn apply_args(&mut self, args: &RunArgs) {
        if let Some(url) = &args.sitemap_url {
            self.sitemap_url = url.clone();
        }
        if !args.urls.is_empty() {
            self.pages = args.urls.clone();
        }
        if let Some(out) = &args.out {
            self.output_dir = PathBuf::from(out);
        }
        if let Some(ms) = args.navigation_timeout_ms {
            self.navigation_timeout_ms = ms;
        }
        if let Some(ms) = args.poll_timeout_ms {
            self.poll_timeout_ms = ms;
        }
        if let Some(limit) = args.retry_limit {
            self.retry_limit = limit;
        }
        if let Some(label) = &args.category {
            self.category_label = label.clone();
        }
        if let Some(page) = &args.augment_page {
            self.augment_page_url = Some(page.clone());
        }
        if let Some(kind) = args.background_remover {
            self.background_remover = kind;
        }
        if let Some(endpoint) = &args.remover_endpoint {
            self.remover_endpoint = endpoint.clone();
        }
        if args.no_augment {
            self.augment = false;
        }
        if let Some(max) = args.max_pages {
            self.max_pages = Some(max);
        }
        if args.headful {
            self.headless = false;
        }
        if let Some(path) = &args.chrome_path {
            self.chrome_path = Some(PathBuf::from(path));
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.pages.is_empty() {
            require_http_url("sitemapUrl", &self.sitemap_url)?;
        }
        for page in &self.pages {
            require_http_url("page url", page)?;
        }
        if self.retry_limit == 0 {
            anyhow::bail!("retryLimit must be at least 1");
        }
        if self.navigation_timeout_ms == 0 || self.poll_timeout_ms == 0 {
            anyhow::bail!("timeouts must be greater than zero");
        }
        if self.background_remover == RemoverKind::Http {
            require_http_url("removerEndpoint", &self.remover_endpoint)?;
        }
        if let Some(page) = &self.augment_page_url {
            Url::parse(page).with_context(|| format!("parse augmentPageUrl: {page}"))?;
        }
        Ok(())
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn records_path(&self) -> PathBuf {
        self.output_dir.join(RECORDS_FILE)
    }

    pub fn images_dir(&self) -> PathBuf {
        self.output_dir.join(IMAGES_DIR)
    }

    pub fn augmented_dir(&self) -> PathBuf {
        self.output_dir.join(AUGMENTED_DIR)
    }

    pub fn summary_path(&self) -> PathBuf {
        self.output_dir.join(SUMMARY_FILE)
    }
}

fn require_http_url(name: &str, value: &str) -> anyhow::Result<()> {
    let url = Url::parse(value).with_context(|| format!("parse {name}: {value}"))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        anyhow::bail!("{name} must be http/https: {url}");
    }
    Ok(())
}
