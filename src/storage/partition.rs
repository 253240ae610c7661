//! Partition keys and their file names
//!
//! A partition file is named `<prefix>_<field1>_<value1>_..._<fieldN>_<valueN>.csv`.
//! Values are percent-encoded so they never contain `_` (or characters that are
//! unsafe in file names); with the field list fixed per storage instance this makes
//! the value tuple -> file name mapping injective and reversible.

use crate::error::{EtlError, EtlResult};
use crate::schema::{scalar_text, Row};
use serde_json::Value;

pub const FILE_EXTENSION: &str = "csv";

/// Ordered partition-field values of one record, in textual form
pub type PartitionKey = Vec<String>;

/// Extract the partition key of a row
///
/// Fails with [`EtlError::MissingPartitionField`] when a field is absent, null or
/// not a scalar.
pub fn partition_key(row: &Row, fields: &[String]) -> EtlResult<PartitionKey> {
    fields
        .iter()
        .map(|field| {
            row.get(field)
                .and_then(scalar_text)
                .ok_or_else(|| EtlError::MissingPartitionField {
                    field: field.clone(),
                })
        })
        .collect()
}

/// Textual form of a filter value, compared against decoded partition values
pub fn filter_text(value: &Value) -> Option<String> {
    scalar_text(value)
}

/// Build the file name of a partition
pub fn file_name(prefix: &str, fields: &[String], key: &[String]) -> String {
    let mut name = String::from(prefix);
    for (field, value) in fields.iter().zip(key) {
        name.push('_');
        name.push_str(field);
        name.push('_');
        name.push_str(&encode_value(value));
    }
    name.push('.');
    name.push_str(FILE_EXTENSION);
    name
}

/// Recover the partition key from a file name written by [`file_name`]
///
/// Returns `None` if the name was not produced for this prefix and field list.
pub fn parse_file_name(name: &str, prefix: &str, fields: &[String]) -> Option<PartitionKey> {
    let stem = name.strip_suffix(FILE_EXTENSION)?.strip_suffix('.')?;
    let mut rest = stem.strip_prefix(prefix)?;
    let mut key = Vec::with_capacity(fields.len());

    for field in fields {
        rest = rest.strip_prefix('_')?.strip_prefix(field.as_str())?.strip_prefix('_')?;
        let end = rest.find('_').unwrap_or(rest.len());
        key.push(decode_value(&rest[..end])?);
        rest = &rest[end..];
    }

    rest.is_empty().then_some(key)
}

fn needs_escape(byte: u8) -> bool {
    byte.is_ascii_control()
        || matches!(
            byte,
            b'%' | b'_'
                | b'/'
                | b'\\'
                | b'.'
                | b':'
                | b'*'
                | b'?'
                | b'"'
                | b'<'
                | b'>'
                | b'|'
                | b' '
        )
}

/// Percent-encode the bytes of a partition value that cannot appear in a file name segment
pub fn encode_value(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for ch in value.chars() {
        if ch.is_ascii() && needs_escape(ch as u8) {
            encoded.push_str(&format!("%{:02X}", ch as u8));
        } else {
            encoded.push(ch);
        }
    }
    encoded
}

/// Inverse of [`encode_value`]; `None` on a malformed escape
pub fn decode_value(encoded: &str) -> Option<String> {
    let bytes = encoded.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = encoded.get(i + 1..i + 3)?;
            decoded.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }

    String::from_utf8(decoded).ok()
}
