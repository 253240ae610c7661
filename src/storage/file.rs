//! Partitioned CSV storage
//!
//! Records are sharded into one CSV file per distinct combination of the
//! partition (`vectorize_by`) field values. Reads can be restricted to the files
//! of specific partition values without opening the others.

use super::partition::{self, PartitionKey, FILE_EXTENSION};
use super::traits::SchemaStorage;
use crate::error::{EtlError, EtlResult};
use crate::params::Parameters;
use crate::schema::{Batch, Filters, Row, SchemaRecord};
use serde_json::Value;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use walkdir::WalkDir;

/// Default configuration section for file storage
pub const DEFAULT_SECTION: &str = "CsvStorage";

/// Configuration keys read by [`PartitionedFileStorage::configure_from_params`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStorageKeys {
    pub path: String,
    pub prefix: String,
}

impl Default for FileStorageKeys {
    fn default() -> Self {
        Self {
            path: "CsvPath".to_string(),
            prefix: "CsvPrefix".to_string(),
        }
    }
}

/// Where partition files live and how they are named
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStorageConfig {
    /// Base directory scanned on read and written into on write
    pub path: PathBuf,
    /// Prefix of every partition file name
    pub prefix: String,
}

impl FileStorageConfig {
    pub fn new(path: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            prefix: prefix.into(),
        }
    }

    pub fn from_params(params: &Parameters, section: &str, keys: &FileStorageKeys) -> EtlResult<Self> {
        let path = params.require(section, &keys.path)?;
        let prefix = params.require(section, &keys.prefix)?;
        Ok(Self::new(path, prefix))
    }
}

/// CSV storage sharded by partition field values
///
/// Null and the empty string share the empty cell, so an `Option<String>`
/// holding `Some("")` reads back as `None`.
pub struct PartitionedFileStorage<T> {
    vectorize_by: Vec<String>,
    config: Mutex<Option<FileStorageConfig>>,
    _schema: PhantomData<fn() -> T>,
}

impl<T: SchemaRecord> PartitionedFileStorage<T> {
    /// Create an unconfigured storage partitioned by `vectorize_by`
    ///
    /// The field list is fixed for the lifetime of the instance.
    pub fn new<I, S>(vectorize_by: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            vectorize_by: vectorize_by.into_iter().map(Into::into).collect(),
            config: Mutex::new(None),
            _schema: PhantomData,
        }
    }

    /// Create and configure in one step
    pub fn with_config<I, S>(vectorize_by: I, config: FileStorageConfig) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            vectorize_by: vectorize_by.into_iter().map(Into::into).collect(),
            config: Mutex::new(Some(config)),
            _schema: PhantomData,
        }
    }

    pub fn vectorize_by(&self) -> &[String] {
        &self.vectorize_by
    }

    pub fn configure(&self, config: FileStorageConfig) -> EtlResult<()> {
        tracing::debug!(
            path = %config.path.display(),
            prefix = %config.prefix,
            "file storage configured"
        );
        *self.config.lock()? = Some(config);
        Ok(())
    }

    /// Configure from a parameter section using the default key names
    pub fn configure_from_params(&self, params: &Parameters, section: &str) -> EtlResult<()> {
        self.configure_from_params_with_keys(params, section, &FileStorageKeys::default())
    }

    pub fn configure_from_params_with_keys(
        &self,
        params: &Parameters,
        section: &str,
        keys: &FileStorageKeys,
    ) -> EtlResult<()> {
        self.configure(FileStorageConfig::from_params(params, section, keys)?)
    }

    pub fn is_configured(&self) -> bool {
        self.config.lock().map(|c| c.is_some()).unwrap_or(false)
    }

    fn get_config(&self) -> EtlResult<FileStorageConfig> {
        self.config.lock()?.clone().ok_or_else(|| {
            EtlError::NotConfigured("File storage has no base path; call configure first".to_string())
        })
    }

    /// Path of the file a row belongs to
    pub fn file_path_for(&self, row: &Row) -> EtlResult<PathBuf> {
        let config = self.get_config()?;
        let key = partition::partition_key(row, &self.vectorize_by)?;
        Ok(self.path_for_key(&config, &key))
    }

    fn path_for_key(&self, config: &FileStorageConfig, key: &[String]) -> PathBuf {
        config
            .path
            .join(partition::file_name(&config.prefix, &self.vectorize_by, key))
    }

    /// Group rows by partition key, keeping first-seen group order
    fn group_rows(&self, rows: Vec<Row>) -> EtlResult<Vec<(PartitionKey, Vec<Row>)>> {
        let mut groups: Vec<(PartitionKey, Vec<Row>)> = Vec::new();
        let mut index: HashMap<PartitionKey, usize> = HashMap::new();

        for row in rows {
            let key = partition::partition_key(&row, &self.vectorize_by)?;
            match index.get(&key) {
                Some(&i) => groups[i].1.push(row),
                None => {
                    index.insert(key.clone(), groups.len());
                    groups.push((key, vec![row]));
                }
            }
        }

        Ok(groups)
    }

    /// Whether a file's partition key satisfies the filters
    fn matches(&self, key: &[String], filters: Option<&Filters>) -> bool {
        let Some(filters) = filters else {
            return true;
        };
        self.vectorize_by
            .iter()
            .zip(key)
            .all(|(field, value)| match filters.get(field) {
                Some(wanted) => partition::filter_text(wanted).as_deref() == Some(value.as_str()),
                None => true,
            })
    }

    /// Partition files under the base directory that match the filters, sorted by path
    pub fn matching_files(&self, filters: Option<&Filters>) -> EtlResult<Vec<PathBuf>> {
        let config = self.get_config()?;
        if !config.path.exists() {
            return Ok(Vec::new());
        }

        if let Some(filters) = filters {
            for field in filters.keys() {
                if !self.vectorize_by.contains(field) {
                    tracing::debug!(field = %field, "ignoring filter on non-partition field");
                }
            }
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&config.path) {
            let entry = entry.map_err(|e| {
                EtlError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(FILE_EXTENSION) {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            match partition::parse_file_name(name, &config.prefix, &self.vectorize_by) {
                Some(key) if self.matches(&key, filters) => files.push(path.to_path_buf()),
                Some(_) => {}
                None => tracing::debug!(file = %path.display(), "skipping non-partition file"),
            }
        }

        files.sort();
        Ok(files)
    }

    fn write_group(&self, path: &Path, rows: &[Row]) -> EtlResult<()> {
        let mut header: Vec<&String> = Vec::new();
        for row in rows {
            for key in row.keys() {
                if !header.contains(&key) {
                    header.push(key);
                }
            }
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(header.iter().map(|h| h.as_str()))?;
        for row in rows {
            writer.write_record(header.iter().map(|h| cell_text(row.get(h.as_str()))))?;
        }
        writer.flush()?;

        tracing::debug!(file = %path.display(), rows = rows.len(), "partition file written");
        Ok(())
    }

    fn read_file(&self, path: &Path, out: &mut Vec<T>) -> EtlResult<()> {
        let mut reader = csv::Reader::from_path(path)?;
        let before = out.len();
        for (line, record) in reader.deserialize::<T>().enumerate() {
            let record = record.map_err(|e| {
                EtlError::Validation(format!(
                    "{} row {}: {}",
                    path.display(),
                    line + 1,
                    e
                ))
            })?;
            out.push(record);
        }
        tracing::debug!(file = %path.display(), rows = out.len() - before, "partition file read");
        Ok(())
    }
}

impl<T: SchemaRecord> SchemaStorage<T> for PartitionedFileStorage<T> {
    fn write(&self, data: Option<Batch<T>>) -> EtlResult<()> {
        let config = self.get_config()?;
        let Some(batch) = data else {
            return Ok(());
        };
        if batch.is_empty() {
            return Ok(());
        }

        let groups = self.group_rows(batch.into_rows()?)?;
        for (key, rows) in &groups {
            self.write_group(&self.path_for_key(&config, key), rows)
                .map_err(|e| match e {
                    EtlError::Io(_) | EtlError::Csv(_) => EtlError::WriteFailure(e.to_string()),
                    other => other,
                })?;
        }
        Ok(())
    }

    fn read(&self, filters: Option<&Filters>) -> EtlResult<Vec<T>> {
        let mut records = Vec::new();
        for path in self.matching_files(filters)? {
            self.read_file(&path, &mut records)?;
        }
        Ok(records)
    }
}

fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TabularView;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Bar {
        symbol: String,
        venue: String,
        close: f64,
        volume: u64,
        note: Option<String>,
    }

    fn bar(symbol: &str, venue: &str, close: f64, volume: u64) -> Bar {
        Bar {
            symbol: symbol.to_string(),
            venue: venue.to_string(),
            close,
            volume,
            note: None,
        }
    }

    fn storage(dir: &TempDir) -> PartitionedFileStorage<Bar> {
        PartitionedFileStorage::with_config(
            ["symbol", "venue"],
            FileStorageConfig::new(dir.path(), "bars"),
        )
    }

    fn filters(pairs: &[(&str, Value)]) -> Filters {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_write_creates_one_file_per_partition() {
        let temp_dir = TempDir::new().unwrap();
        let storage = storage(&temp_dir);

        storage
            .write(Some(
                vec![
                    bar("ES", "CME", 1.0, 10),
                    bar("ES", "CME", 2.0, 20),
                    bar("NQ", "CME", 3.0, 30),
                ]
                .into(),
            ))
            .unwrap();

        assert!(temp_dir.path().join("bars_symbol_ES_venue_CME.csv").exists());
        assert!(temp_dir.path().join("bars_symbol_NQ_venue_CME.csv").exists());

        let content =
            std::fs::read_to_string(temp_dir.path().join("bars_symbol_ES_venue_CME.csv")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "symbol,venue,close,volume,note");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_roundtrip_without_filters() {
        let temp_dir = TempDir::new().unwrap();
        let storage = storage(&temp_dir);
        let mut original = vec![
            bar("ES", "CME", 4500.25, 10),
            bar("NQ", "CME", 15000.5, 3),
            bar("ES", "EUREX", 4501.0, 7),
        ];
        original[1].note = Some("halted, resumed".to_string());

        storage.write(Some(original.clone().into())).unwrap();
        let mut loaded = storage.read(None).unwrap();

        assert_eq!(loaded.len(), original.len());
        loaded.sort_by(|a, b| a.close.partial_cmp(&b.close).unwrap());
        original.sort_by(|a, b| a.close.partial_cmp(&b.close).unwrap());
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_filtered_read_selects_partition() {
        let temp_dir = TempDir::new().unwrap();
        let storage = storage(&temp_dir);
        storage
            .write(Some(
                vec![
                    bar("ES", "CME", 1.0, 1),
                    bar("ESM", "CME", 2.0, 2),
                    bar("NQ", "CME", 3.0, 3),
                ]
                .into(),
            ))
            .unwrap();

        let loaded = storage
            .read(Some(&filters(&[("symbol", json!("ES"))])))
            .unwrap();
        assert_eq!(loaded, vec![bar("ES", "CME", 1.0, 1)]);
    }

    #[test]
    fn test_filter_on_non_partition_field_is_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let storage = storage(&temp_dir);
        storage
            .write(Some(vec![bar("ES", "CME", 1.0, 1), bar("NQ", "CME", 2.0, 2)].into()))
            .unwrap();

        let loaded = storage
            .read(Some(&filters(&[("volume", json!(1))])))
            .unwrap();
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn test_values_containing_delimiters_stay_separate() {
        let temp_dir = TempDir::new().unwrap();
        let storage = storage(&temp_dir);
        storage
            .write(Some(
                vec![bar("ES_venue_X", "CME", 1.0, 1), bar("ES", "CME", 2.0, 2)].into(),
            ))
            .unwrap();

        let loaded = storage
            .read(Some(&filters(&[("symbol", json!("ES"))])))
            .unwrap();
        assert_eq!(loaded, vec![bar("ES", "CME", 2.0, 2)]);
    }

    #[test]
    fn test_rewrite_overwrites_partition_file() {
        let temp_dir = TempDir::new().unwrap();
        let storage = storage(&temp_dir);
        storage
            .write(Some(vec![bar("ES", "CME", 1.0, 1), bar("ES", "CME", 2.0, 2)].into()))
            .unwrap();
        storage
            .write(Some(vec![bar("ES", "CME", 9.0, 9)].into()))
            .unwrap();

        assert_eq!(storage.read(None).unwrap(), vec![bar("ES", "CME", 9.0, 9)]);
    }

    #[test]
    fn test_none_and_empty_writes_are_noops() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("nested");
        let storage: PartitionedFileStorage<Bar> =
            PartitionedFileStorage::with_config(["symbol"], FileStorageConfig::new(&root, "bars"));

        storage.write(None).unwrap();
        storage.write(Some(Vec::<Bar>::new().into())).unwrap();
        storage.write(Some(TabularView::default().into())).unwrap();

        assert!(!root.exists());
    }

    #[test]
    fn test_non_finite_float_fails_before_any_file_is_written() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("nested");
        let storage: PartitionedFileStorage<Bar> =
            PartitionedFileStorage::with_config(["symbol"], FileStorageConfig::new(&root, "bars"));

        let result = storage.write(Some(
            vec![bar("ES", "CME", 1.0, 1), bar("NQ", "CME", f64::NAN, 2)].into(),
        ));
        assert!(matches!(result, Err(EtlError::Validation(msg)) if msg.contains("'close'")));
        assert!(!root.exists());

        storage
            .write(Some(vec![bar("ES", "CME", f64::MAX, 1)].into()))
            .unwrap();
        assert_eq!(storage.read(None).unwrap(), vec![bar("ES", "CME", f64::MAX, 1)]);
    }

    #[test]
    fn test_empty_string_reads_back_as_none() {
        let temp_dir = TempDir::new().unwrap();
        let storage = storage(&temp_dir);
        let mut original = bar("ES", "CME", 1.0, 1);
        original.note = Some(String::new());

        storage.write(Some(vec![original].into())).unwrap();
        let loaded = storage.read(None).unwrap();
        assert_eq!(loaded, vec![bar("ES", "CME", 1.0, 1)]);
        assert_eq!(loaded[0].note, None);
    }

    #[test]
    fn test_unconfigured_storage() {
        let storage: PartitionedFileStorage<Bar> = PartitionedFileStorage::new(["symbol"]);
        assert!(!storage.is_configured());
        assert!(matches!(
            storage.write(Some(vec![bar("ES", "CME", 1.0, 1)].into())),
            Err(EtlError::NotConfigured(_))
        ));
        assert!(matches!(storage.read(None), Err(EtlError::NotConfigured(_))));
    }

    #[test]
    fn test_missing_root_reads_empty() {
        let temp_dir = TempDir::new().unwrap();
        let storage: PartitionedFileStorage<Bar> = PartitionedFileStorage::with_config(
            ["symbol"],
            FileStorageConfig::new(temp_dir.path().join("absent"), "bars"),
        );
        assert!(storage.read(None).unwrap().is_empty());
    }

    #[test]
    fn test_missing_partition_value_fails_write() {
        let temp_dir = TempDir::new().unwrap();
        let storage = storage(&temp_dir);

        let mut row = Row::new();
        row.insert("symbol".to_string(), json!("ES"));
        row.insert("close".to_string(), json!(1.0));
        let table = TabularView::from_rows(vec![row]);

        let result = storage.write(Some(table.into()));
        assert!(matches!(
            result,
            Err(EtlError::MissingPartitionField { field }) if field == "venue"
        ));
    }

    #[test]
    fn test_invalid_row_fails_whole_read() {
        let temp_dir = TempDir::new().unwrap();
        let storage = storage(&temp_dir);
        storage
            .write(Some(vec![bar("ES", "CME", 1.0, 1)].into()))
            .unwrap();
        std::fs::write(
            temp_dir.path().join("bars_symbol_NQ_venue_CME.csv"),
            "symbol,venue,close,volume,note\nNQ,CME,abc,1,\n",
        )
        .unwrap();

        assert!(matches!(storage.read(None), Err(EtlError::Validation(_))));
    }

    #[test]
    fn test_read_scans_subdirectories_and_skips_foreign_files() {
        let temp_dir = TempDir::new().unwrap();
        let storage = storage(&temp_dir);
        storage
            .write(Some(vec![bar("ES", "CME", 1.0, 1)].into()))
            .unwrap();

        let sub = temp_dir.path().join("archive");
        std::fs::create_dir_all(&sub).unwrap();
        std::fs::write(
            sub.join("bars_symbol_NQ_venue_CME.csv"),
            "symbol,venue,close,volume,note\nNQ,CME,2.0,2,\n",
        )
        .unwrap();
        std::fs::write(temp_dir.path().join("notes.csv"), "garbage\n").unwrap();

        let loaded = storage.read(None).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(storage.matching_files(None).unwrap().len(), 2);
    }

    #[test]
    fn test_tabular_batch_write() {
        let temp_dir = TempDir::new().unwrap();
        let storage = storage(&temp_dir);
        let table = TabularView::from_records(&[bar("ES", "CME", 1.0, 1)]).unwrap();

        storage.write(Some(Batch::Table(table))).unwrap();
        assert_eq!(storage.read(None).unwrap(), vec![bar("ES", "CME", 1.0, 1)]);
    }

    #[test]
    fn test_file_path_for() {
        let temp_dir = TempDir::new().unwrap();
        let storage = storage(&temp_dir);
        let row = bar("ES", "CME", 1.0, 1).to_row().unwrap();

        assert_eq!(
            storage.file_path_for(&row).unwrap(),
            temp_dir.path().join("bars_symbol_ES_venue_CME.csv")
        );
    }

    #[test]
    fn test_configure_from_params() {
        let temp_dir = TempDir::new().unwrap();
        let mut params = Parameters::new();
        params.set(DEFAULT_SECTION, "CsvPath", temp_dir.path().to_string_lossy());
        params.set(DEFAULT_SECTION, "CsvPrefix", "bars");

        let storage: PartitionedFileStorage<Bar> = PartitionedFileStorage::new(["symbol"]);
        storage.configure_from_params(&params, DEFAULT_SECTION).unwrap();
        assert!(storage.is_configured());

        let incomplete = Parameters::new();
        let other: PartitionedFileStorage<Bar> = PartitionedFileStorage::new(["symbol"]);
        assert!(matches!(
            other.configure_from_params(&incomplete, DEFAULT_SECTION),
            Err(EtlError::Configuration(_))
        ));
    }

    #[test]
    fn test_unpartitioned_storage_uses_single_file() {
        let temp_dir = TempDir::new().unwrap();
        let storage: PartitionedFileStorage<Bar> = PartitionedFileStorage::with_config(
            Vec::<String>::new(),
            FileStorageConfig::new(temp_dir.path(), "all"),
        );
        storage
            .write(Some(vec![bar("ES", "CME", 1.0, 1), bar("NQ", "CBOT", 2.0, 2)].into()))
            .unwrap();

        assert!(temp_dir.path().join("all.csv").exists());
        assert_eq!(storage.read(None).unwrap().len(), 2);
    }
}
