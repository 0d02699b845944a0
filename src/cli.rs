use clap::{Args, Parser, Subcommand};

use crate::config::RemoverKind;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Scrape product pages, save their images and augment them.
    Run(RunArgs),
    /// Compare stored record ids with augmented-image folders.
    Check(CheckArgs),
    /// Print the page link of every stored record.
    Links(LinksArgs),
}

/// Flags left unset fall back to the `--config` file, then to built-in defaults.
#[derive(Debug, Args)]
pub struct RunArgs {
    /// YAML config file (camelCase keys, e.g. `sitemapUrl`, `retryLimit`).
    #[arg(long)]
    pub config: Option<String>,

    /// Sitemap listing candidate product pages.
    #[arg(long)]
    pub sitemap_url: Option<String>,

    /// Process these pages instead of the sitemap (repeatable).
    #[arg(long = "url")]
    pub urls: Vec<String>,

    /// Output directory for records, images and augmented images.
    #[arg(long)]
    pub out: Option<String>,

    /// Per-navigation timeout.
    #[arg(long)]
    pub navigation_timeout_ms: Option<u64>,

    /// How long one canvas poll waits for the augmentation page.
    #[arg(long)]
    pub poll_timeout_ms: Option<u64>,

    /// Attempts for page navigation and for canvas polling.
    #[arg(long)]
    pub retry_limit: Option<u32>,

    /// Breadcrumb label a page must carry to be scraped.
    #[arg(long)]
    pub category: Option<String>,

    /// Augmentation page URL (default: bundled page written to the output dir).
    #[arg(long)]
    pub augment_page: Option<String>,

    #[arg(long, value_enum)]
    pub background_remover: Option<RemoverKind>,

    /// Background removal service endpoint (used with `--background-remover http`).
    #[arg(long)]
    pub remover_endpoint: Option<String>,

    /// Save images without running them through the augmentation page.
    #[arg(long, default_value_t = false)]
    pub no_augment: bool,

    /// Maximum pages to process.
    #[arg(long)]
    pub max_pages: Option<usize>,

    /// Show the browser window.
    #[arg(long, default_value_t = false)]
    pub headful: bool,

    /// Chrome/Chromium executable (default: auto-detect).
    #[arg(long)]
    pub chrome_path: Option<String>,
}

#[derive(Debug, Args)]
pub struct CheckArgs {
    /// Record store (JSON array of product records).
    #[arg(long, default_value = "productsInfo.json")]
    pub records: String,

    /// Augmented images root; one subdirectory per product id.
    #[arg(long, default_value = "augmented_images")]
    pub augmented: String,

    /// Exit with failure when a folder is missing or an id is duplicated.
    #[arg(long, default_value_t = false)]
    pub strict: bool,
}

#[derive(Debug, Args)]
pub struct LinksArgs {
    /// Record store (JSON array of product records).
    #[arg(long, default_value = "productsInfo.json")]
    pub records: String,
}
