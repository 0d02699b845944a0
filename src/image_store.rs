use std::path::{Path, PathBuf};

use anyhow::Context as _;
use url::Url;

use crate::formats::ImageAsset;

/// Thumbnail URLs carry a `home` size token; the full-size variant uses
/// `large` in the same position.
pub fn full_size_url(url: &str) -> String {
    url.replacen("home", "large", 1)
}

/// Last path segment of an image URL, without query or fragment.
pub fn url_file_name(url: &str) -> anyhow::Result<String> {
    let parsed = Url::parse(url).with_context(|| format!("parse image url: {url}"))?;
    let name = parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
        .ok_or_else(|| anyhow::anyhow!("image url has no file name: {url}"))?;
    Ok(sanitize_segment(name))
}

/// `{index}-{model}-{filename}`, or `{index}-{filename}` without a model.
pub fn image_file_name(index: usize, model: &str, file_name: &str) -> String {
    let model = sanitize_segment(model);
    if model.is_empty() {
        format!("{index}-{file_name}")
    } else {
        format!("{index}-{model}-{file_name}")
    }
}

pub fn image_asset(index: usize, model: &str, url: &str) -> anyhow::Result<ImageAsset> {
    let url = full_size_url(url);
    let file_name = image_file_name(index, model, &url_file_name(&url)?);
    Ok(ImageAsset {
        index,
        url,
        file_name,
    })
}

/// Maps an arbitrary label onto one safe path segment.
pub fn sanitize_segment(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.trim().chars() {
        match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => out.push('_'),
            ch if ch.is_whitespace() || ch.is_control() => out.push('_'),
            ch => out.push(ch),
        }
    }
    if out.chars().all(|ch| ch == '.') {
        return out.replace('.', "_");
    }
    out
}

pub async fn write_image(dir: &Path, file_name: &str, bytes: &[u8]) -> anyhow::Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("create image dir: {}", dir.display()))?;
    let path = dir.join(file_name);
    tokio::fs::write(&path, bytes)
        .await
        .with_context(|| format!("write image: {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_size_url_rewrites_first_size_token() {
        assert_eq!(
            full_size_url("https://shop.example/123-home_default/as2100.jpg"),
            "https://shop.example/123-large_default/as2100.jpg"
        );
        assert_eq!(
            full_size_url("https://shop.example/img/as2100.jpg"),
            "https://shop.example/img/as2100.jpg"
        );
    }

    #[test]
    fn image_file_name_includes_model_when_present() {
        assert_eq!(image_file_name(0, "AS2100", "a.jpg"), "0-AS2100-a.jpg");
        assert_eq!(image_file_name(2, "", "a.jpg"), "2-a.jpg");
        assert_eq!(image_file_name(1, "AS 21/00", "a.jpg"), "1-AS_21_00-a.jpg");
    }

    #[test]
    fn image_asset_uses_full_size_url() {
        let asset = image_asset(
            1,
            "AS2100",
            "https://shop.example/9-home_default/capteur.jpg?v=2",
        )
        .unwrap();
        assert_eq!(asset.url, "https://shop.example/9-large_default/capteur.jpg?v=2");
        assert_eq!(asset.file_name, "1-AS2100-capteur.jpg");
    }

    #[test]
    fn url_without_file_name_is_rejected() {
        assert!(url_file_name("https://shop.example/").is_err());
    }

    #[test]
    fn sanitize_rejects_dot_segments() {
        assert_eq!(sanitize_segment(".."), "__");
        assert_eq!(sanitize_segment("a.b"), "a.b");
    }
}
