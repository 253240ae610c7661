//! Relational table storage
//!
//! Persists records as rows of one pre-existing SQLite table. The table's
//! columns are reflected at setup; nothing here creates or alters schema.

use super::traits::SchemaStorage;
use crate::error::{EtlError, EtlResult};
use crate::params::Parameters;
use crate::schema::{Batch, Filters, Row, SchemaRecord};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use serde_json::{Number, Value};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::Mutex;

/// Default configuration section for table storage
pub const DEFAULT_SECTION: &str = "DbStorage";

/// Configuration keys read by [`TableStorage::configure_from_params`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableStorageKeys {
    pub db_type: String,
    pub host: String,
    pub port: String,
    pub user: String,
    pub password: String,
    pub database: String,
    pub table: String,
}

impl Default for TableStorageKeys {
    fn default() -> Self {
        Self {
            db_type: "DbType".to_string(),
            host: "DbHost".to_string(),
            port: "DbPort".to_string(),
            user: "DbUser".to_string(),
            password: "DbPassword".to_string(),
            database: "DbName".to_string(),
            table: "DbTable".to_string(),
        }
    }
}

/// Supported database engines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbType {
    Sqlite,
}

impl fmt::Display for DbType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbType::Sqlite => write!(f, "Sqlite"),
        }
    }
}

impl FromStr for DbType {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(DbType::Sqlite),
            other => Err(EtlError::Configuration(format!(
                "Unsupported database type '{}'",
                other
            ))),
        }
    }
}

/// Connection settings and target table
#[derive(Clone, PartialEq, Eq)]
pub struct TableStorageConfig {
    pub db_type: DbType,
    /// Database file path, or `:memory:`
    pub database: String,
    pub table: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl TableStorageConfig {
    pub fn sqlite(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            db_type: DbType::Sqlite,
            database: database.into(),
            table: table.into(),
            host: None,
            port: None,
            user: None,
            password: None,
        }
    }

    pub fn from_params(params: &Parameters, section: &str, keys: &TableStorageKeys) -> EtlResult<Self> {
        let db_type: DbType = params.require(section, &keys.db_type)?.parse()?;
        let database = params.require(section, &keys.database)?.to_string();
        let table = params.require(section, &keys.table)?.to_string();

        Ok(Self {
            db_type,
            database,
            table,
            host: params.get(section, &keys.host).map(str::to_string),
            port: params.get_parsed(section, &keys.port)?,
            user: params.get(section, &keys.user).map(str::to_string),
            password: params.get(section, &keys.password).map(str::to_string),
        })
    }

    /// Connection string without the password
    pub fn connection_description(&self) -> String {
        let mut description = format!("{}://", self.db_type.to_string().to_lowercase());
        if let Some(user) = &self.user {
            description.push_str(user);
            description.push('@');
        }
        if let Some(host) = &self.host {
            description.push_str(host);
            if let Some(port) = self.port {
                description.push_str(&format!(":{}", port));
            }
            description.push('/');
        }
        description.push_str(&self.database);
        description
    }
}

impl fmt::Debug for TableStorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableStorageConfig")
            .field("db_type", &self.db_type)
            .field("database", &self.database)
            .field("table", &self.table)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// A reflected table column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub decl_type: String,
}

impl ColumnInfo {
    fn is_bool(&self) -> bool {
        self.decl_type.to_ascii_uppercase().starts_with("BOOL")
    }
}

/// SQL text and positional parameters of a filtered read
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

struct TableHandle {
    conn: Connection,
    table: String,
    columns: Vec<ColumnInfo>,
}

impl TableHandle {
    fn open(conn: Connection, table: String) -> EtlResult<Self> {
        let columns = reflect_columns(&conn, &table)?;
        if columns.is_empty() {
            return Err(EtlError::Configuration(format!(
                "Table '{}' does not exist in the database",
                table
            )));
        }
        Ok(Self {
            conn,
            table,
            columns,
        })
    }

    fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    fn build_select(&self, filters: Option<&Filters>, predicate: Option<&str>) -> EtlResult<SelectQuery> {
        let mut clauses = Vec::new();
        let mut params = Vec::new();

        for (field, value) in filters.into_iter().flatten() {
            if !self.has_column(field) {
                tracing::debug!(table = %self.table, field = %field, "ignoring filter on unknown column");
                continue;
            }
            let param = json_to_sql(value).ok_or_else(|| {
                EtlError::CallerContract(format!(
                    "Filter value {} for '{}' is outside the SQLite integer range",
                    value, field
                ))
            })?;
            params.push(param);
            clauses.push(format!("{} = ?{}", quote_ident(field), params.len()));
        }
        if let Some(predicate) = predicate.map(str::trim).filter(|p| !p.is_empty()) {
            clauses.push(format!("({})", predicate));
        }

        let mut sql = format!("SELECT * FROM {}", quote_ident(&self.table));
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        Ok(SelectQuery { sql, params })
    }

    fn insert_rows(&mut self, rows: &[Row]) -> EtlResult<usize> {
        let TableHandle {
            conn,
            table,
            columns,
        } = self;

        let tx = conn.transaction()?;
        for row in rows {
            if let Some(unknown) = row.keys().find(|k| !columns.iter().any(|c| &c.name == *k)) {
                return Err(EtlError::WriteFailure(format!(
                    "Column '{}' does not exist in table '{}'",
                    unknown, table
                )));
            }

            let names: Vec<String> = row.keys().map(|k| quote_ident(k)).collect();
            let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote_ident(table),
                names.join(", "),
                placeholders.join(", ")
            );

            let mut values = Vec::with_capacity(row.len());
            for (name, value) in row {
                values.push(json_to_sql(value).ok_or_else(|| {
                    EtlError::WriteFailure(format!(
                        "Value {} for column '{}' is outside the SQLite integer range",
                        value, name
                    ))
                })?);
            }

            let mut stmt = tx.prepare_cached(&sql)?;
            stmt.execute(params_from_iter(values))?;
        }
        tx.commit()?;
        Ok(rows.len())
    }

    fn select_rows(&mut self, query: &SelectQuery) -> EtlResult<Vec<Row>> {
        let TableHandle { conn, columns, .. } = self;

        let tx = conn.transaction()?;
        let mut out = Vec::new();
        {
            let mut stmt = tx.prepare(&query.sql)?;
            let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
            let bools: Vec<bool> = names
                .iter()
                .map(|n| columns.iter().any(|c| &c.name == n && c.is_bool()))
                .collect();

            let mut rows = stmt.query(params_from_iter(query.params.iter()))?;
            while let Some(row) = rows.next()? {
                let mut record = Row::new();
                for (i, name) in names.iter().enumerate() {
                    record.insert(name.clone(), sql_to_json(row.get_ref(i)?, bools[i]));
                }
                out.push(record);
            }
        }
        tx.commit()?;
        Ok(out)
    }
}

/// Record storage backed by one relational table
pub struct TableStorage<T> {
    state: Mutex<Option<TableHandle>>,
    _schema: PhantomData<fn() -> T>,
}

impl<T: SchemaRecord> Default for TableStorage<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: SchemaRecord> TableStorage<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(None),
            _schema: PhantomData,
        }
    }

    /// Open the database and reflect the target table
    pub fn configure(&self, config: &TableStorageConfig) -> EtlResult<()> {
        let conn = match config.db_type {
            DbType::Sqlite => Connection::open(&config.database)?,
        };
        tracing::info!(
            connection = %config.connection_description(),
            table = %config.table,
            "connecting table storage"
        );
        self.configure_with_connection(conn, &config.table)
    }

    /// Configure from a parameter section using the default key names
    pub fn configure_from_params(&self, params: &Parameters, section: &str) -> EtlResult<()> {
        self.configure_from_params_with_keys(params, section, &TableStorageKeys::default())
    }

    pub fn configure_from_params_with_keys(
        &self,
        params: &Parameters,
        section: &str,
        keys: &TableStorageKeys,
    ) -> EtlResult<()> {
        self.configure(&TableStorageConfig::from_params(params, section, keys)?)
    }

    /// Use an already-open connection
    pub fn configure_with_connection(&self, conn: Connection, table: &str) -> EtlResult<()> {
        let handle = TableHandle::open(conn, table.to_string())?;
        tracing::debug!(
            table = %handle.table,
            columns = handle.columns.len(),
            "table reflected"
        );
        *self.state.lock()? = Some(handle);
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        self.state.lock().map(|s| s.is_some()).unwrap_or(false)
    }

    /// Reflected columns of the target table
    pub fn columns(&self) -> EtlResult<Vec<ColumnInfo>> {
        let state = self.state.lock()?;
        let handle = state.as_ref().ok_or_else(not_configured)?;
        Ok(handle.columns.clone())
    }

    /// The query [`read_where`](Self::read_where) would run
    pub fn build_select(&self, filters: Option<&Filters>, predicate: Option<&str>) -> EtlResult<SelectQuery> {
        let state = self.state.lock()?;
        let handle = state.as_ref().ok_or_else(not_configured)?;
        handle.build_select(filters, predicate)
    }

    /// Read rows matching equality filters and an optional raw SQL predicate
    pub fn read_where(&self, filters: Option<&Filters>, predicate: Option<&str>) -> EtlResult<Vec<T>> {
        let mut state = self.state.lock()?;
        let handle = state.as_mut().ok_or_else(not_configured)?;

        let query = handle.build_select(filters, predicate)?;
        let rows = handle.select_rows(&query)?;
        tracing::debug!(table = %handle.table, rows = rows.len(), "rows selected");

        rows.into_iter().map(T::from_row).collect()
    }
}

impl<T: SchemaRecord> SchemaStorage<T> for TableStorage<T> {
    fn write(&self, data: Option<Batch<T>>) -> EtlResult<()> {
        let mut state = self.state.lock()?;
        let handle = state.as_mut().ok_or_else(not_configured)?;

        let Some(batch) = data else {
            return Ok(());
        };
        if batch.is_empty() {
            return Ok(());
        }

        let rows = batch.into_rows()?;
        let inserted = handle.insert_rows(&rows).map_err(|e| match e {
            EtlError::WriteFailure(_) => e,
            other => EtlError::WriteFailure(other.to_string()),
        })?;
        tracing::debug!(table = %handle.table, rows = inserted, "rows inserted");
        Ok(())
    }

    fn read(&self, filters: Option<&Filters>) -> EtlResult<Vec<T>> {
        self.read_where(filters, None)
    }
}

fn not_configured() -> EtlError {
    EtlError::NotConfigured("Table storage has no connection; call configure first".to_string())
}

fn reflect_columns(conn: &Connection, table: &str) -> EtlResult<Vec<ColumnInfo>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let columns = stmt
        .query_map([], |row| {
            Ok(ColumnInfo {
                name: row.get(1)?,
                decl_type: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(columns)
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `None` for integers SQLite cannot store exactly (above `i64::MAX`)
fn json_to_sql(value: &Value) -> Option<SqlValue> {
    let sql = match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => SqlValue::Integer(i),
            _ if n.is_u64() => return None,
            (None, Some(f)) => SqlValue::Real(f),
            (None, None) => return None,
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        nested => SqlValue::Text(nested.to_string()),
    };
    Some(sql)
}

fn sql_to_json(value: ValueRef<'_>, as_bool: bool) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) if as_bool => Value::Bool(i != 0),
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
    }
}
