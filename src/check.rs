use std::collections::{HashMap, HashSet};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::cli::CheckArgs;
use crate::formats::ConsistencyReport;
use crate::record_store::RecordStore;

/// Record ids without an output folder, deduplicated, in record order.
pub fn missing_folders(ids: &[String], folders: &HashSet<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.iter()
        .filter(|id| !folders.contains(id.as_str()))
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}

/// Ids occurring more than once, each reported once, in order of their
/// second occurrence.
pub fn duplicate_ids(ids: &[String]) -> Vec<String> {
    let mut first_index: HashMap<&str, usize> = HashMap::new();
    let mut reported = HashSet::new();
    let mut duplicates = Vec::new();
    for (index, id) in ids.iter().enumerate() {
        let first = *first_index.entry(id.as_str()).or_insert(index);
        if first != index && reported.insert(id.as_str()) {
            duplicates.push(id.clone());
        }
    }
    duplicates
}

pub fn build_report(ids: &[String], folders: &HashSet<String>) -> ConsistencyReport {
    ConsistencyReport {
        missing_folders: missing_folders(ids, folders),
        duplicate_ids: duplicate_ids(ids),
    }
}

/// Names of the immediate subdirectories of `root`.
pub fn list_output_folders(root: &Path) -> anyhow::Result<HashSet<String>> {
    let mut folders = HashSet::new();
    for entry in std::fs::read_dir(root)
        .with_context(|| format!("read augmented images dir: {}", root.display()))?
    {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            folders.insert(entry.file_name().to_string_lossy().to_string());
        }
    }
    Ok(folders)
}

pub async fn check(records: &Path, augmented: &Path) -> anyhow::Result<ConsistencyReport> {
    let ids = RecordStore::open(records)
        .load_ids()
        .await
        .context("load record ids")?;
    let folders = list_output_folders(augmented)?;
    tracing::debug!(records = ids.len(), folders = folders.len(), "checking consistency");
    Ok(build_report(&ids, &folders))
}

pub fn write_report(out: &mut impl std::io::Write, report: &ConsistencyReport) -> std::io::Result<()> {
    if report.missing_folders.is_empty() {
        writeln!(out, "All product folders are present.")?;
    } else {
        writeln!(out, "Missing product folders for IDs:")?;
        for id in &report.missing_folders {
            writeln!(out, "{id}")?;
        }
    }

    if report.duplicate_ids.is_empty() {
        writeln!(out, "No duplicate product IDs found.")?;
    } else {
        writeln!(out, "Duplicate product IDs found:")?;
        for id in &report.duplicate_ids {
            writeln!(out, "{id}")?;
        }
    }
    Ok(())
}

pub async fn run(args: CheckArgs) -> anyhow::Result<()> {
    let records = PathBuf::from(&args.records);
    let augmented = PathBuf::from(&args.augmented);
    let report = check(&records, &augmented).await?;

    let mut stdout = std::io::stdout().lock();
    write_report(&mut stdout, &report).context("write report")?;
    stdout.flush().context("flush report")?;

    if args.strict && !report.is_consistent() {
        anyhow::bail!(
            "inconsistent outputs: {} missing folder(s), {} duplicate id(s)",
            report.missing_folders.len(),
            report.duplicate_ids.len()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| (*v).to_owned()).collect()
    }

    fn folders(values: &[&str]) -> HashSet<String> {
        values.iter().map(|v| (*v).to_owned()).collect()
    }

    #[test]
    fn missing_record_folder_is_reported() {
        let report = build_report(&ids(&["a", "b"]), &folders(&["a"]));
        assert_eq!(report.missing_folders, vec!["b"]);
        assert!(report.duplicate_ids.is_empty());
        assert!(!report.is_consistent());
    }

    #[test]
    fn repeated_id_is_reported_once() {
        let report = build_report(&ids(&["x", "y", "x"]), &folders(&["x", "y"]));
        assert_eq!(report.duplicate_ids, vec!["x"]);
        assert!(report.missing_folders.is_empty());

        assert_eq!(duplicate_ids(&ids(&["x", "x", "x", "y", "y"])), vec!["x", "y"]);
    }

    #[test]
    fn missing_is_empty_iff_every_id_has_a_folder() {
        let all = ids(&["a", "b", "c"]);
        assert!(missing_folders(&all, &folders(&["a", "b", "c", "extra"])).is_empty());
        assert_eq!(missing_folders(&all, &folders(&[])), all);
        assert_eq!(missing_folders(&ids(&["z", "z"]), &folders(&[])), vec!["z"]);
    }

    #[test]
    fn duplicates_match_counts_regardless_of_order() {
        let sequences = [
            ids(&["a", "b", "a", "c", "b", "d"]),
            ids(&["d", "b", "c", "a", "b", "a"]),
            ids(&[]),
            ids(&["solo"]),
        ];
        for sequence in sequences {
            let mut counts: HashMap<&str, usize> = HashMap::new();
            for id in &sequence {
                *counts.entry(id.as_str()).or_default() += 1;
            }
            let expected: HashSet<String> = counts
                .into_iter()
                .filter(|(_, n)| *n > 1)
                .map(|(id, _)| id.to_owned())
                .collect();
            let actual: HashSet<String> = duplicate_ids(&sequence).into_iter().collect();
            assert_eq!(actual, expected);
        }
    }

    #[test]
    fn report_text_lists_both_sets() {
        let report = ConsistencyReport {
            missing_folders: ids(&["b"]),
            duplicate_ids: Vec::new(),
        };
        let mut out = Vec::new();
        write_report(&mut out, &report).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Missing product folders for IDs:\nb\nNo duplicate product IDs found.\n"
        );
    }

    #[tokio::test]
    async fn check_reads_records_and_immediate_subdirectories() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let records = temp.path().join("productsInfo.txt");
        std::fs::write(&records, r#"[{"id":"a"},{"id":"b"},{"id":"a"}]"#)?;
        let augmented = temp.path().join("augmented_images");
        std::fs::create_dir_all(augmented.join("a").join("nested"))?;
        std::fs::create_dir_all(augmented.join("other"))?;
        std::fs::write(augmented.join("b"), b"not a folder")?;

        let report = check(&records, &augmented).await?;
        assert_eq!(report.missing_folders, vec!["b"]);
        assert_eq!(report.duplicate_ids, vec!["a"]);

        let before = std::fs::read_to_string(&records)?;
        assert_eq!(before, r#"[{"id":"a"},{"id":"b"},{"id":"a"}]"#);
        Ok(())
    }

    #[tokio::test]
    async fn missing_augmented_root_is_an_error() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let records = temp.path().join("records.json");
        std::fs::write(&records, "[]")?;
        assert!(check(&records, &temp.path().join("absent")).await.is_err());
        Ok(())
    }
}
