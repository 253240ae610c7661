//! Storage trait definitions
//!
//! [`SchemaStorage`] is the capability every backend exposes to pipeline stages.
//! Implementations decide where records live (partitioned CSV files, a relational
//! table, ...) but share the write/read/tabular contract.

use crate::error::{EtlError, EtlResult};
use crate::schema::{Batch, Filters, SchemaRecord, TabularView};

/// Schema-typed storage for records of type `T`
pub trait SchemaStorage<T: SchemaRecord>: Send + Sync {
    /// Persist a batch of records or an already-tabular batch
    ///
    /// `None` or an empty batch is a no-op. Fails with [`EtlError::NotConfigured`]
    /// before setup has completed.
    fn write(&self, data: Option<Batch<T>>) -> EtlResult<()>;

    /// Read records back, optionally restricted to field/value pairs
    ///
    /// Filter keys that are not meaningful for the backend are ignored. An empty
    /// backing medium yields an empty vector. A persisted row that does not coerce
    /// into `T` fails the whole call with [`EtlError::Validation`].
    fn read(&self, filters: Option<&Filters>) -> EtlResult<Vec<T>>;

    /// Convert records into a row/column table
    fn to_tabular_view(&self, data: Option<&[T]>) -> EtlResult<TabularView> {
        let data = data.ok_or_else(|| {
            EtlError::CallerContract("No data provided to convert to a tabular view".to_string())
        })?;
        TabularView::from_records(data)
    }

    /// Read everything stored
    fn read_all(&self) -> EtlResult<Vec<T>> {
        self.read(None)
    }
}
