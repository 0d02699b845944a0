use std::io::Write as _;
use std::path::Path;

use anyhow::Context as _;
use serde::Deserialize;

use crate::cli::LinksArgs;

#[derive(Debug, Deserialize)]
struct RecordLink {
    #[serde(default)]
    link: Option<String>,
}

/// Non-empty `link` values of the stored records, in store order.
pub fn read_links(records: &Path) -> anyhow::Result<Vec<String>> {
    let data = std::fs::read(records)
        .with_context(|| format!("read record store: {}", records.display()))?;
    let entries: Vec<RecordLink> =
        serde_json::from_slice(&data).context("parse record store json")?;
    Ok(entries
        .into_iter()
        .filter_map(|entry| entry.link)
        .filter(|link| !link.is_empty())
        .collect())
}

pub fn run(args: LinksArgs) -> anyhow::Result<()> {
    let links = read_links(Path::new(&args.records))?;
    tracing::debug!(count = links.len(), "read record links");

    let mut stdout = std::io::stdout().lock();
    for link in links {
        writeln!(stdout, "{link}").context("write link")?;
    }
    stdout.flush().context("flush links")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_records_without_links() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let path = temp.path().join("records.json");
        std::fs::write(
            &path,
            r#"[{"id":"a","link":"https://shop.example/a.html"},{"id":"b"},{"id":"c","link":""}]"#,
        )?;
        assert_eq!(read_links(&path)?, vec!["https://shop.example/a.html"]);
        Ok(())
    }

    #[test]
    fn missing_store_is_an_error() {
        assert!(read_links(Path::new("/nonexistent/records.json")).is_err());
    }
}
