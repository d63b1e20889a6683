use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use time::OffsetDateTime;

use crate::error::ScanResult;
use crate::model::{Dataset, DatasetSummary, PriceRecord};
use crate::time::next_generated_at;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StoredDataset<'a> {
    #[serde(with = "time::serde::rfc3339")]
    generated_at: OffsetDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<&'a str>,
    summary: DatasetSummary,
    records: &'a [PriceRecord],
}

/// The single JSON file the dashboard reads. Writes go through a temp file in
/// the same directory and an atomic rename, so readers see either the old or
/// the new document.
#[derive(Debug, Clone)]
pub struct DatasetStore {
    path: PathBuf,
    source: Option<String>,
}

impl DatasetStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            source: None,
        }
    }

    /// Records where the prices came from in the written document.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the current dataset; a missing file is an empty dataset.
    pub fn load(&self) -> ScanResult<Dataset> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::info!(
                    target: "store",
                    path = %self.path.display(),
                    "no existing dataset; starting empty"
                );
                return Ok(Dataset::empty());
            }
            Err(err) => return Err(err.into()),
        };
        let dataset: Dataset = serde_json::from_str(&raw)?;
        tracing::info!(
            target: "store",
            path = %self.path.display(),
            records = dataset.len(),
            "loaded existing dataset"
        );
        Ok(dataset)
    }

    /// Stamps `generatedAt` and atomically replaces the file. On error the
    /// dataset, including its stamp, is left as it was.
    pub fn write(&self, dataset: &mut Dataset, now: OffsetDateTime) -> ScanResult<()> {
        let generated_at = next_generated_at(dataset.generated_at, now);
        let doc = StoredDataset {
            generated_at,
            source: self.source.as_deref(),
            summary: DatasetSummary::from_records(&dataset.records),
            records: &dataset.records,
        };
        let mut bytes = serde_json::to_vec_pretty(&doc)?;
        bytes.push(b'\n');

        let staged = self.stage(&bytes)?;
        staged.commit()?;
        dataset.generated_at = Some(generated_at);

        tracing::info!(
            target: "store",
            path = %self.path.display(),
            records = dataset.len(),
            bytes = bytes.len(),
            "dataset written"
        );
        Ok(())
    }

    /// Writes and syncs the temp file without touching the target.
    pub fn stage(&self, bytes: &[u8]) -> io::Result<StagedWrite> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let file_name = self
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("dataset.json");
        let staged = StagedWrite {
            tmp_path: dir.join(format!(".{file_name}.tmp-{}", std::process::id())),
            target: self.path.clone(),
            committed: false,
        };

        let mut file = File::create(&staged.tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        Ok(staged)
    }
}

/// A fully written temp file waiting to replace the target. Dropping it
/// without `commit` removes the temp file.
#[derive(Debug)]
pub struct StagedWrite {
    tmp_path: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl StagedWrite {
    pub fn tmp_path(&self) -> &Path {
        &self.tmp_path
    }

    pub fn commit(mut self) -> io::Result<()> {
        fs::rename(&self.tmp_path, &self.target)?;
        self.committed = true;
        if let Some(dir) = self.target.parent().filter(|d| !d.as_os_str().is_empty()) {
            // Persist the rename itself; not all platforms allow syncing a directory.
            if let Ok(handle) = File::open(dir) {
                let _ = handle.sync_all();
            }
        }
        Ok(())
    }
}

impl Drop for StagedWrite {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.tmp_path);
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::fs;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    pub fn temp_dir(prefix: &str) -> PathBuf {
        let mut dir = std::env::temp_dir();
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        dir.push(format!("{prefix}_{}_{}", std::process::id(), nanos));
        fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }
}

#[cfg(test)]
mod tests {
    use super::testing::temp_dir;
    use super::*;
    use crate::error::ScanError;
    use crate::model::fixtures::record;
    use crate::model::OsType;
    use time::macros::datetime;

    fn sample() -> Dataset {
        Dataset {
            generated_at: None,
            records: vec![record("D2s_v3", "eastus", OsType::Linux, false, 0.096)],
        }
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = temp_dir("store_missing");
        let store = DatasetStore::new(dir.join("prices.json"));
        let ds = store.load().unwrap();
        assert!(ds.is_empty());
        assert!(ds.generated_at.is_none());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn write_then_load_and_document_shape() {
        let dir = temp_dir("store_roundtrip");
        let path = dir.join("data").join("prices.json");
        let store = DatasetStore::new(&path).with_source("https://prices.example/api");
        let now = datetime!(2026-03-01 12:00 UTC);

        let mut ds = sample();
        store.write(&mut ds, now).unwrap();
        assert_eq!(ds.generated_at, Some(now));

        let doc: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["generatedAt"], "2026-03-01T12:00:00Z");
        assert_eq!(doc["source"], "https://prices.example/api");
        assert_eq!(doc["summary"]["count"], 1);
        assert_eq!(doc["records"][0]["pricePerHour"], 0.096);

        let loaded = store.load().unwrap();
        assert_eq!(loaded, ds);

        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn generated_at_is_monotonic() {
        let dir = temp_dir("store_monotonic");
        let store = DatasetStore::new(dir.join("prices.json"));
        let later = datetime!(2026-03-02 00:00 UTC);
        let earlier = datetime!(2026-03-01 00:00 UTC);

        let mut ds = sample();
        ds.generated_at = Some(later);
        store.write(&mut ds, earlier).unwrap();
        assert_eq!(ds.generated_at, Some(later));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn uncommitted_stage_leaves_previous_file_intact() {
        let dir = temp_dir("store_interrupted");
        let path = dir.join("prices.json");
        let store = DatasetStore::new(&path);
        let mut ds = sample();
        store.write(&mut ds, datetime!(2026-03-01 00:00 UTC)).unwrap();
        let before = fs::read_to_string(&path).unwrap();

        let staged = store.stage(b"{\"generatedAt\": \"trunc").unwrap();
        let tmp = staged.tmp_path().to_path_buf();
        assert!(tmp.exists());
        // Simulated crash between staging and rename.
        drop(staged);

        assert!(!tmp.exists());
        let after = fs::read_to_string(&path).unwrap();
        assert_eq!(before, after);
        let reloaded = store.load().unwrap();
        assert_eq!(reloaded.records, ds.records);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn failed_write_keeps_dataset_and_file() {
        let dir = temp_dir("store_failure");
        let blocker = dir.join("not_a_dir");
        fs::write(&blocker, b"file").unwrap();
        let store = DatasetStore::new(blocker.join("prices.json"));

        let mut ds = sample();
        let err = store
            .write(&mut ds, datetime!(2026-03-01 00:00 UTC))
            .unwrap_err();
        assert!(matches!(err, ScanError::Io(_)));
        assert!(ds.generated_at.is_none());
        assert_eq!(ds.records.len(), 1);
        assert_eq!(fs::read(&blocker).unwrap(), b"file");
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = temp_dir("store_corrupt");
        let path = dir.join("prices.json");
        fs::write(&path, b"{not json").unwrap();
        let err = DatasetStore::new(&path).load().unwrap_err();
        assert!(matches!(err, ScanError::Json(_)));
        let _ = fs::remove_dir_all(dir);
    }
}
