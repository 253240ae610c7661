//! Schema records and the tabular shapes storage works with
//!
//! A schema record is any serde type that serializes to a flat mapping of field
//! name to value and can be rebuilt from one. Construction from a mapping is where
//! validation happens: a missing required field or a value of the wrong shape
//! fails with [`EtlError::Validation`].

use crate::error::{EtlError, EtlResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Field name -> value mapping of one record, in field declaration order
pub type Row = Map<String, Value>;

/// Field name -> required value, used by selective reads
pub type Filters = BTreeMap<String, Value>;

/// A typed record with mapping-based construction and serialization
pub trait SchemaRecord: Serialize + DeserializeOwned {
    /// Serialize into a field name -> value mapping
    ///
    /// Non-finite floats are rejected: JSON has no representation for them and
    /// they would be stored as null.
    fn to_row(&self) -> EtlResult<Row> {
        match serde_json::to_value(self) {
            Ok(Value::Object(row)) => {
                reject_non_finite(self, &row)?;
                Ok(row)
            }
            Ok(other) => Err(EtlError::Validation(format!(
                "Record does not serialize to a field mapping (got {})",
                json_kind(&other)
            ))),
            Err(e) => Err(EtlError::Validation(format!(
                "Record could not be serialized: {}",
                e
            ))),
        }
    }

    /// Construct and validate a record from a field name -> value mapping
    fn from_row(row: Row) -> EtlResult<Self> {
        serde_json::from_value(Value::Object(row))
            .map_err(|e| EtlError::Validation(format!("Row does not match record schema: {}", e)))
    }
}

impl<T: Serialize + DeserializeOwned> SchemaRecord for T {}

/// Row/column table built from records or handed directly to storage
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TabularView {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl TabularView {
    /// Build a table from explicit columns and positional rows
    ///
    /// Every row must have exactly one value per column.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> EtlResult<Self> {
        if let Some((index, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != columns.len())
        {
            return Err(EtlError::CallerContract(format!(
                "Row {} has {} values but the table has {} columns",
                index,
                row.len(),
                columns.len()
            )));
        }
        Ok(Self { columns, rows })
    }

    /// Build a table from mappings; columns are the union of keys in first-seen order
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for row in &rows {
            for key in row.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }

        let rows = rows
            .into_iter()
            .map(|mut row| {
                columns
                    .iter()
                    .map(|c| row.remove(c).unwrap_or(Value::Null))
                    .collect()
            })
            .collect();

        Self { columns, rows }
    }

    pub fn from_records<T: SchemaRecord>(records: &[T]) -> EtlResult<Self> {
        let rows = records
            .iter()
            .map(SchemaRecord::to_row)
            .collect::<EtlResult<Vec<_>>>()?;
        Ok(Self::from_rows(rows))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of one column, top to bottom
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let index = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().map(|row| &row[index]).collect())
    }

    /// Convert back into one mapping per row
    pub fn into_rows(self) -> Vec<Row> {
        let columns = self.columns;
        self.rows
            .into_iter()
            .map(|values| columns.iter().cloned().zip(values).collect())
            .collect()
    }

    /// Rebuild typed records from the table
    pub fn to_records<T: SchemaRecord>(&self) -> EtlResult<Vec<T>> {
        self.clone().into_rows().into_iter().map(T::from_row).collect()
    }
}

/// Input accepted by [`crate::storage::SchemaStorage::write`]
#[derive(Debug, Clone)]
pub enum Batch<T> {
    Records(Vec<T>),
    Table(TabularView),
}

impl<T: SchemaRecord> Batch<T> {
    pub fn len(&self) -> usize {
        match self {
            Batch::Records(records) => records.len(),
            Batch::Table(table) => table.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flatten the batch into field mappings
    pub fn into_rows(self) -> EtlResult<Vec<Row>> {
        match self {
            Batch::Records(records) => records.iter().map(SchemaRecord::to_row).collect(),
            Batch::Table(table) => Ok(table.into_rows()),
        }
    }
}

impl<T> From<Vec<T>> for Batch<T> {
    fn from(records: Vec<T>) -> Self {
        Batch::Records(records)
    }
}

impl<T> From<TabularView> for Batch<T> {
    fn from(table: TabularView) -> Self {
        Batch::Table(table)
    }
}

/// Textual form of a scalar value as used in partition keys and CSV cells
///
/// Returns `None` for null, arrays and objects.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

// serde_json maps NaN and infinities to null; toml keeps them as floats, so
// null fields are cross-checked against the toml form of the record.
fn reject_non_finite<T: Serialize + ?Sized>(record: &T, row: &Row) -> EtlResult<()> {
    if !row.values().any(Value::is_null) {
        return Ok(());
    }
    let Ok(toml::Value::Table(table)) = toml::Value::try_from(record) else {
        return Ok(());
    };
    for (field, value) in row {
        if !value.is_null() {
            continue;
        }
        if let Some(toml::Value::Float(f)) = table.get(field) {
            if !f.is_finite() {
                return Err(EtlError::Validation(format!(
                    "Field '{}' holds a non-finite float ({})",
                    field, f
                )));
            }
        }
    }
    Ok(())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Quote {
        symbol: String,
        price: f64,
        size: u32,
    }

    fn quote(symbol: &str, price: f64, size: u32) -> Quote {
        Quote {
            symbol: symbol.to_string(),
            price,
            size,
        }
    }

    #[test]
    fn test_to_row_keeps_field_order() {
        let row = quote("ES", 4500.25, 3).to_row().unwrap();
        let keys: Vec<&String> = row.keys().collect();
        assert_eq!(keys, vec!["symbol", "price", "size"]);
        assert_eq!(row["size"], json!(3));
    }

    #[test]
    fn test_from_row_validates() {
        let mut row = Row::new();
        row.insert("symbol".to_string(), json!("ES"));
        row.insert("price".to_string(), json!("not a number"));
        row.insert("size".to_string(), json!(1));

        let result = Quote::from_row(row);
        assert!(matches!(result, Err(EtlError::Validation(_))));
    }

    #[test]
    fn test_from_row_missing_field() {
        let mut row = Row::new();
        row.insert("symbol".to_string(), json!("ES"));

        assert!(matches!(
            Quote::from_row(row),
            Err(EtlError::Validation(_))
        ));
    }

    #[test]
    fn test_non_finite_floats_are_rejected() {
        for price in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = quote("ES", price, 1).to_row().unwrap_err();
            assert!(
                matches!(&err, EtlError::Validation(msg) if msg.contains("'price'")),
                "unexpected error: {}",
                err
            );
        }

        let batch: Batch<Quote> = vec![quote("ES", 1.0, 1), quote("NQ", f64::NAN, 2)].into();
        assert!(matches!(batch.into_rows(), Err(EtlError::Validation(_))));
    }

    #[test]
    fn test_none_fields_are_not_mistaken_for_nan() {
        #[derive(Debug, Serialize, Deserialize)]
        struct Tick {
            symbol: String,
            bid: Option<f64>,
        }

        let row = Tick {
            symbol: "ES".to_string(),
            bid: None,
        }
        .to_row()
        .unwrap();
        assert_eq!(row["bid"], Value::Null);

        let err = Tick {
            symbol: "ES".to_string(),
            bid: Some(f64::NAN),
        }
        .to_row();
        assert!(matches!(err, Err(EtlError::Validation(_))));
    }

    #[test]
    fn test_non_mapping_record_is_rejected() {
        let result = 42u32.to_row();
        assert!(matches!(result, Err(EtlError::Validation(_))));
    }

    #[test]
    fn test_tabular_view_from_records() {
        let records = vec![quote("ES", 1.5, 2), quote("NQ", 2.5, 4)];
        let table = TabularView::from_records(&records).unwrap();

        assert_eq!(table.columns(), &["symbol", "price", "size"]);
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.column("symbol").unwrap(),
            vec![&json!("ES"), &json!("NQ")]
        );
        assert_eq!(table.to_records::<Quote>().unwrap(), records);
    }

    #[test]
    fn test_from_rows_fills_missing_keys_with_null() {
        let mut first = Row::new();
        first.insert("a".to_string(), json!(1));
        let mut second = Row::new();
        second.insert("b".to_string(), json!(2));

        let table = TabularView::from_rows(vec![first, second]);
        assert_eq!(table.columns(), &["a", "b"]);
        assert_eq!(table.rows()[0], vec![json!(1), Value::Null]);
        assert_eq!(table.rows()[1], vec![Value::Null, json!(2)]);
    }

    #[test]
    fn test_new_rejects_ragged_rows() {
        let result = TabularView::new(
            vec!["a".to_string(), "b".to_string()],
            vec![vec![json!(1)]],
        );
        assert!(matches!(result, Err(EtlError::CallerContract(_))));
    }

    #[test]
    fn test_batch_len_and_rows() {
        let batch: Batch<Quote> = vec![quote("ES", 1.0, 1)].into();
        assert_eq!(batch.len(), 1);
        let rows = batch.into_rows().unwrap();
        assert_eq!(rows[0]["symbol"], json!("ES"));

        let empty: Batch<Quote> = TabularView::default().into();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_scalar_text() {
        assert_eq!(scalar_text(&json!("x")), Some("x".to_string()));
        assert_eq!(scalar_text(&json!(12)), Some("12".to_string()));
        assert_eq!(scalar_text(&json!(true)), Some("true".to_string()));
        assert_eq!(scalar_text(&Value::Null), None);
        assert_eq!(scalar_text(&json!([1])), None);
    }
}
