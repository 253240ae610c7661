//! Schema-typed storage backends
//!
//! - `traits`: the [`SchemaStorage`] capability shared by all backends
//! - `partition`: partition keys and their injective file names
//! - `file`: records sharded into one CSV file per partition
//! - `table`: records as rows of one SQLite table
//! - `factory`: backend selection from parameters

pub mod factory;
pub mod file;
pub mod partition;
pub mod table;
pub mod traits;

pub use factory::{StorageFactory, StorageKind};
pub use file::{FileStorageConfig, FileStorageKeys, PartitionedFileStorage};
pub use table::{ColumnInfo, DbType, SelectQuery, TableStorage, TableStorageConfig, TableStorageKeys};
pub use traits::SchemaStorage;
