//! Sectioned run parameters
//!
//! Parameters are a two-level map, section -> key -> textual value, loaded from a
//! TOML file whose top-level tables are the sections:
//!
//! ```toml
//! [CsvStorage]
//! CsvPath = "/data/bars"
//! CsvPrefix = "bars"
//!
//! [DbStorage]
//! DbType = "Sqlite"
//! DbName = "/data/bars.db"
//! DbTable = "bars"
//! ```

use crate::error::{EtlError, EtlResult};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

/// Key/value pairs of one section
pub type Section = BTreeMap<String, String>;

/// Caller-owned configuration handed to a pipeline run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parameters {
    sections: BTreeMap<String, Section>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse parameters from TOML text
    pub fn from_toml_str(content: &str) -> EtlResult<Self> {
        let table: toml::Table = content.parse()?;
        let mut params = Self::new();

        for (section_name, value) in table {
            let toml::Value::Table(entries) = value else {
                return Err(EtlError::Configuration(format!(
                    "Top-level key '{}' is not a section",
                    section_name
                )));
            };

            let section = params.sections.entry(section_name.clone()).or_default();
            for (key, value) in entries {
                let text = scalar_text(&value).ok_or_else(|| {
                    EtlError::Configuration(format!(
                        "Value of '{}.{}' must be a scalar",
                        section_name, key
                    ))
                })?;
                section.insert(key, text);
            }
        }

        Ok(params)
    }

    /// Load parameters from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> EtlResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            EtlError::Configuration(format!(
                "Cannot read configuration file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn has_section(&self, section: &str) -> bool {
        self.sections.contains_key(section)
    }

    pub fn section(&self, section: &str) -> Option<&Section> {
        self.sections.get(section)
    }

    pub fn section_names(&self) -> Vec<&str> {
        self.sections.keys().map(String::as_str).collect()
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|s| s.get(key))
            .map(String::as_str)
    }

    /// Get a value or fail with a configuration error naming the section and key
    pub fn require(&self, section: &str, key: &str) -> EtlResult<&str> {
        let entries = self.sections.get(section).ok_or_else(|| {
            EtlError::Configuration(format!("Section '{}' not found", section))
        })?;
        entries.get(key).map(String::as_str).ok_or_else(|| {
            EtlError::Configuration(format!(
                "Key '{}' missing from section '{}'",
                key, section
            ))
        })
    }

    /// Parse an optional value into `V`
    pub fn get_parsed<V>(&self, section: &str, key: &str) -> EtlResult<Option<V>>
    where
        V: FromStr,
        V::Err: std::fmt::Display,
    {
        match self.get(section, key) {
            Some(raw) => raw.trim().parse::<V>().map(Some).map_err(|e| {
                EtlError::Configuration(format!(
                    "Invalid value '{}' for '{}.{}': {}",
                    raw, section, key, e
                ))
            }),
            None => Ok(None),
        }
    }

    pub fn set(
        &mut self,
        section: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.sections
            .entry(section.into())
            .or_default()
            .insert(key.into(), value.into());
    }
}

fn scalar_text(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        toml::Value::Boolean(b) => Some(b.to_string()),
        toml::Value::Datetime(dt) => Some(dt.to_string()),
        toml::Value::Array(_) | toml::Value::Table(_) => None,
    }
}
