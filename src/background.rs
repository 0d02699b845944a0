use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, USER_AGENT};
use url::Url;

use crate::formats::DataUrl;

const HTTP_USER_AGENT: &str = "imgharvest/0.1";

/// Produces the image behind `image_url`, background removed or not.
#[async_trait]
pub trait BackgroundRemover: Send + Sync {
    async fn remove_background(&self, image_url: &str) -> anyhow::Result<DataUrl>;
}

pub fn http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .context("build http client")
}

/// Downloads the image unchanged.
#[derive(Debug, Clone)]
pub struct Passthrough {
    client: reqwest::Client,
}

impl Passthrough {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BackgroundRemover for Passthrough {
    async fn remove_background(&self, image_url: &str) -> anyhow::Result<DataUrl> {
        download(&self.client, image_url, "image/*").await
    }
}

/// Background removal through an HTTP service that takes the source image URL
/// as a `url` query parameter and answers with a PNG (rembg's `/api/remove`).
#[derive(Debug, Clone)]
pub struct HttpRemover {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpRemover {
    pub fn new(client: reqwest::Client, endpoint: &str) -> anyhow::Result<Self> {
        let endpoint = Url::parse(endpoint)
            .with_context(|| format!("parse background remover endpoint: {endpoint}"))?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl BackgroundRemover for HttpRemover {
    async fn remove_background(&self, image_url: &str) -> anyhow::Result<DataUrl> {
        let mut request_url = self.endpoint.clone();
        request_url.query_pairs_mut().append_pair("url", image_url);

        let mut result = download(&self.client, request_url.as_str(), "image/png")
            .await
            .with_context(|| format!("remove background: {image_url}"))?;
        if !result.mime.starts_with("image/") {
            result.mime = "image/png".to_owned();
        }
        Ok(result)
    }
}

async fn download(client: &reqwest::Client, url: &str, accept: &str) -> anyhow::Result<DataUrl> {
    let response = client
        .get(url)
        .header(USER_AGENT, HTTP_USER_AGENT)
        .header(ACCEPT, accept)
        .send()
        .await
        .with_context(|| format!("GET {url}"))?;

    let status = response.status();
    if !status.is_success() {
        anyhow::bail!("GET {url} failed ({status})");
    }

    let mime = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "application/octet-stream".to_owned());
    let bytes = response
        .bytes()
        .await
        .with_context(|| format!("read body: {url}"))?;
    if bytes.is_empty() {
        anyhow::bail!("GET {url} returned an empty body");
    }

    Ok(DataUrl::new(mime, bytes.to_vec()))
}
