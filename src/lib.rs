#![forbid(unsafe_code)]

pub mod augment;
pub mod background;
pub mod browser;
pub mod check;
pub mod cli;
pub mod config;
pub mod formats;
pub mod harvest;
pub mod image_store;
pub mod links;
pub mod logging;
pub mod record_store;
pub mod retry;
pub mod scrape;
pub mod sitemap;
