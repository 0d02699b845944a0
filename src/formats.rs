use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRecord {
    pub id: String,
    pub name: String,
    pub model: String,
    #[serde(default)]
    pub datasheet: String,
    #[serde(default)]
    pub user_manual: String,
    pub description: Option<String>,
    pub link: String,
}

/// Only the `id` of a stored record; used where the rest of the document may
/// be incomplete or written by an older tool.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordId {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAsset {
    pub index: usize,
    pub url: String,
    pub file_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasCapture {
    pub index: usize,
    pub label: String,
    pub data_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsistencyReport {
    pub missing_folders: Vec<String>,
    pub duplicate_ids: Vec<String>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.missing_folders.is_empty() && self.duplicate_ids.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub pages_total: usize,
    pub pages_scraped: usize,
    pub pages_skipped: usize,
    pub pages_failed: usize,
    pub records_appended: usize,
    pub images_saved: usize,
    pub images_failed: usize,
    pub variants_written: usize,
}

impl RunSummary {
    pub fn start(pages_total: usize) -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            pages_total,
            pages_scraped: 0,
            pages_skipped: 0,
            pages_failed: 0,
            records_appended: 0,
            images_saved: 0,
            images_failed: 0,
            variants_written: 0,
        }
    }
}

/// A `data:<mime>;base64,<payload>` URL with its payload decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUrl {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl DataUrl {
    pub fn new(mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime: mime.into(),
            bytes,
        }
    }

    pub fn parse(input: &str) -> anyhow::Result<Self> {
        let rest = input
            .trim()
            .strip_prefix("data:")
            .ok_or_else(|| anyhow::anyhow!("data url must start with 'data:'"))?;
        let (meta, payload) = rest
            .split_once(',')
            .ok_or_else(|| anyhow::anyhow!("data url has no payload separator"))?;
        let mime = meta
            .strip_suffix(";base64")
            .ok_or_else(|| anyhow::anyhow!("data url must be base64 encoded: {meta}"))?;
        let mime = if mime.is_empty() {
            "text/plain".to_owned()
        } else {
            mime.to_owned()
        };

        let bytes = STANDARD
            .decode(payload)
            .map_err(|err| anyhow::anyhow!("decode data url payload: {err}"))?;
        Ok(Self { mime, bytes })
    }
}

impl fmt::Display for DataUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "data:{};base64,{}", self.mime, STANDARD.encode(&self.bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_record_uses_camel_case_keys() {
        let record = ProductRecord {
            id: "AS2100-as2100".to_owned(),
            name: "Capteur AS2100".to_owned(),
            model: "AS2100".to_owned(),
            datasheet: String::new(),
            user_manual: "https://example.com/manual.pdf".to_owned(),
            description: None,
            link: "https://example.com/p".to_owned(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["userManual"], "https://example.com/manual.pdf");
        assert_eq!(json["datasheet"], "");
        assert!(json["description"].is_null());
    }

    #[test]
    fn data_url_parses_png_payload() {
        let url = DataUrl::parse("data:image/png;base64,iVBORw0K").unwrap();
        assert_eq!(url.mime, "image/png");
        assert_eq!(&url.bytes[..4], &[0x89, b'P', b'N', b'G']);
        assert_eq!(url.to_string(), "data:image/png;base64,iVBORw0K");
    }

    #[test]
    fn data_url_rejects_non_base64() {
        let err = DataUrl::parse("data:text/plain,hello").unwrap_err();
        assert!(err.to_string().contains("base64"));
        assert!(DataUrl::parse("https://example.com/a.png").is_err());
    }
}
