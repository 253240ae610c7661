//! Storage factory for creating configured storage instances
//!
//! Lets callers pick the backend from configuration instead of code, so a
//! pipeline can move from CSV partitions to a database table by editing its
//! parameter file.

use super::file::{FileStorageConfig, PartitionedFileStorage};
use super::table::{TableStorage, TableStorageConfig};
use super::traits::SchemaStorage;
use crate::error::{EtlError, EtlResult};
use crate::params::Parameters;
use crate::schema::SchemaRecord;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Key naming the backend inside a storage section
pub const STORAGE_TYPE_KEY: &str = "StorageType";

/// Available storage backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    File,
    Table,
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageKind::File => write!(f, "file"),
            StorageKind::Table => write!(f, "table"),
        }
    }
}

impl FromStr for StorageKind {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" | "csv" => Ok(StorageKind::File),
            "table" | "db" => Ok(StorageKind::Table),
            other => Err(EtlError::Configuration(format!(
                "Unknown storage type '{}' (expected 'file' or 'table')",
                other
            ))),
        }
    }
}

/// Builds storage instances behind the [`SchemaStorage`] capability
pub struct StorageFactory;

impl StorageFactory {
    /// Create a configured partitioned file storage
    pub fn create_file_storage<T, I, S>(
        vectorize_by: I,
        config: FileStorageConfig,
    ) -> Arc<dyn SchemaStorage<T>>
    where
        T: SchemaRecord + 'static,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::new(PartitionedFileStorage::with_config(vectorize_by, config))
    }

    /// Create a configured table storage
    pub fn create_table_storage<T>(config: &TableStorageConfig) -> EtlResult<Arc<dyn SchemaStorage<T>>>
    where
        T: SchemaRecord + 'static,
    {
        let storage = TableStorage::new();
        storage.configure(config)?;
        Ok(Arc::new(storage))
    }

    /// Create the backend named by `StorageType` in `section`
    ///
    /// The same section carries the backend's own keys (`CsvPath`/`CsvPrefix` or
    /// the `Db*` keys). `vectorize_by` only applies to file storage.
    pub fn from_params<T>(
        params: &Parameters,
        section: &str,
        vectorize_by: &[&str],
    ) -> EtlResult<Arc<dyn SchemaStorage<T>>>
    where
        T: SchemaRecord + 'static,
    {
        let kind: StorageKind = params.require(section, STORAGE_TYPE_KEY)?.parse()?;
        tracing::debug!(section = %section, kind = %kind, "creating storage from parameters");

        match kind {
            StorageKind::File => {
                let storage = PartitionedFileStorage::new(vectorize_by.iter().copied());
                storage.configure_from_params(params, section)?;
                Ok(Arc::new(storage))
            }
            StorageKind::Table => {
                let storage = TableStorage::new();
                storage.configure_from_params(params, section)?;
                Ok(Arc::new(storage))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Fill {
        venue: String,
        qty: i64,
    }

    fn fill(venue: &str, qty: i64) -> Fill {
        Fill {
            venue: venue.to_string(),
            qty,
        }
    }

    #[test]
    fn test_storage_kind_parse() {
        assert_eq!("file".parse::<StorageKind>().unwrap(), StorageKind::File);
        assert_eq!(" TABLE ".parse::<StorageKind>().unwrap(), StorageKind::Table);
        assert!(matches!(
            "ftp".parse::<StorageKind>(),
            Err(EtlError::Configuration(_))
        ));
        assert_eq!(StorageKind::File.to_string(), "file");
    }

    #[test]
    fn test_from_params_file_backend() {
        let temp_dir = TempDir::new().unwrap();
        let mut params = Parameters::new();
        params.set("Output", STORAGE_TYPE_KEY, "file");
        params.set("Output", "CsvPath", temp_dir.path().to_string_lossy());
        params.set("Output", "CsvPrefix", "fills");

        let storage = StorageFactory::from_params::<Fill>(&params, "Output", &["venue"]).unwrap();
        storage
            .write(Some(vec![fill("CME", 1), fill("ICE", 2)].into()))
            .unwrap();

        assert!(temp_dir.path().join("fills_venue_CME.csv").exists());
        assert_eq!(storage.read_all().unwrap().len(), 2);
    }

    #[test]
    fn test_from_params_table_backend() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("fills.db");
        Connection::open(&db_path)
            .unwrap()
            .execute("CREATE TABLE fills (venue TEXT, qty INTEGER)", [])
            .unwrap();

        let mut params = Parameters::new();
        params.set("Output", STORAGE_TYPE_KEY, "table");
        params.set("Output", "DbType", "Sqlite");
        params.set("Output", "DbName", db_path.to_string_lossy());
        params.set("Output", "DbTable", "fills");

        let storage = StorageFactory::from_params::<Fill>(&params, "Output", &[]).unwrap();
        storage.write(Some(vec![fill("CME", 5)].into())).unwrap();
        assert_eq!(storage.read_all().unwrap(), vec![fill("CME", 5)]);
    }

    #[test]
    fn test_from_params_missing_type() {
        let params = Parameters::new();
        let result = StorageFactory::from_params::<Fill>(&params, "Output", &[]);
        assert!(matches!(result, Err(EtlError::Configuration(_))));
    }

    #[test]
    fn test_create_file_storage() {
        let temp_dir = TempDir::new().unwrap();
        let storage: Arc<dyn SchemaStorage<Fill>> = StorageFactory::create_file_storage(
            ["venue"],
            FileStorageConfig::new(temp_dir.path(), "fills"),
        );
        storage.write(Some(vec![fill("CME", 1)].into())).unwrap();
        assert_eq!(storage.read(None).unwrap(), vec![fill("CME", 1)]);
    }
}
