use std::path::{Path, PathBuf};

use anyhow::Context as _;
use tokio::fs;
use tokio::sync::Mutex;

use crate::formats::{ProductRecord, RecordId};

/// JSON array of [`ProductRecord`]s on disk.
///
/// Appends are serialized through an in-process lock and persisted by writing a
/// temp file next to the store and renaming it over the original.
#[derive(Debug)]
pub struct RecordStore {
    path: PathBuf,
    append_lock: Mutex<()>,
}

impl RecordStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            append_lock: Mutex::new(()),
        }
    }

    pub async fn append(&self, record: &ProductRecord) -> anyhow::Result<usize> {
        let _guard = self.append_lock.lock().await;

        let mut records: Vec<serde_json::Value> = read_json_array(&self.path)
            .await
            .with_context(|| format!("read record store: {}", self.path.display()))?;
        records.push(serde_json::to_value(record).context("serialize product record")?);
        write_json_atomic(&self.path, &records)
            .await
            .with_context(|| format!("write record store: {}", self.path.display()))?;

        tracing::debug!(id = %record.id, total = records.len(), "appended product record");
        Ok(records.len())
    }

    pub async fn load(&self) -> anyhow::Result<Vec<ProductRecord>> {
        read_json_array(&self.path)
            .await
            .with_context(|| format!("read record store: {}", self.path.display()))
    }

    pub async fn load_ids(&self) -> anyhow::Result<Vec<String>> {
        let ids: Vec<RecordId> = read_json_array(&self.path)
            .await
            .with_context(|| format!("read record store: {}", self.path.display()))?;
        Ok(ids.into_iter().map(|record| record.id).collect())
    }
}

async fn read_json_array<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    serde_json::from_slice(&bytes).context("parse json array")
}

async fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("create parent dir: {}", parent.display()))?;
    }

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    let data = serde_json::to_vec_pretty(value).context("serialize json")?;
    fs::write(&tmp_path, &data)
        .await
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn record(id: &str) -> ProductRecord {
        ProductRecord {
            id: id.to_owned(),
            name: format!("Product {id}"),
            model: String::new(),
            datasheet: String::new(),
            user_manual: String::new(),
            description: Some("desc".to_owned()),
            link: format!("https://example.com/{id}.html"),
        }
    }

    #[tokio::test]
    async fn sequential_appends_keep_order() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let store = RecordStore::open(temp.path().join("productsInfo.json"));
        assert!(store.load().await?.is_empty());

        let appended: Vec<ProductRecord> = (0..5).map(|i| record(&format!("p{i}"))).collect();
        for (i, r) in appended.iter().enumerate() {
            assert_eq!(store.append(r).await?, i + 1);
        }

        assert_eq!(store.load().await?, appended);
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_appends_are_not_lost() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let store = Arc::new(RecordStore::open(temp.path().join("records.json")));

        let tasks = (0..16).map(|i| {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.append(&record(&format!("c{i}"))).await })
        });
        for result in futures::future::join_all(tasks).await {
            result??;
        }

        let mut ids = store.load_ids().await?;
        ids.sort();
        let mut expected: Vec<String> = (0..16).map(|i| format!("c{i}")).collect();
        expected.sort();
        assert_eq!(ids, expected);
        Ok(())
    }

    #[tokio::test]
    async fn load_ids_tolerates_partial_records() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let path = temp.path().join("records.json");
        std::fs::write(&path, r#"[{"id":"a"},{"id":"b","name":"B"}]"#)?;

        let store = RecordStore::open(&path);
        assert_eq!(store.load_ids().await?, vec!["a", "b"]);
        Ok(())
    }

    #[tokio::test]
    async fn append_preserves_unknown_fields_of_existing_entries() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let path = temp.path().join("records.json");
        std::fs::write(&path, r#"[{"id":"legacy","extra":1}]"#)?;

        let store = RecordStore::open(&path);
        store.append(&record("new")).await?;

        let raw: serde_json::Value = serde_json::from_slice(&std::fs::read(&path)?)?;
        assert_eq!(raw[0]["extra"], 1);
        assert_eq!(raw[1]["id"], "new");
        Ok(())
    }
}
