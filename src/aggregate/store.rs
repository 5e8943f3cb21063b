//! Read access to per-plate single-cell measurement stores.

use crate::data::format::format_value;
use crate::error::{ProfilingError, Result};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};

/// Scheme prefix of single-cell store connection strings.
pub const SQLITE_SCHEME: &str = "sqlite:///";

/// One cell of a store table.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl StoreValue {
    /// Value as a join key; whole reals compare equal to integers.
    pub fn as_key(&self) -> String {
        match self {
            StoreValue::Null => String::new(),
            StoreValue::Integer(i) => i.to_string(),
            StoreValue::Real(r) if r.fract() == 0.0 && r.is_finite() => (*r as i64).to_string(),
            StoreValue::Real(r) => r.to_string(),
            StoreValue::Text(s) => s.clone(),
        }
    }

    /// Value as a measurement; anything non-numeric is missing.
    pub fn as_f64(&self) -> f64 {
        match self {
            StoreValue::Null => f64::NAN,
            StoreValue::Integer(i) => *i as f64,
            StoreValue::Real(r) => *r,
            StoreValue::Text(s) => s.trim().parse().unwrap_or(f64::NAN),
        }
    }

    /// Value as metadata text.
    pub fn as_text(&self) -> String {
        match self {
            StoreValue::Real(r) => format_value(*r, None),
            other => other.as_key(),
        }
    }
}

/// A whole table loaded from a store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<StoreValue>>,
}

impl StoreTable {
    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| ProfilingError::MissingColumn(name.to_string()))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }
}

/// Source of image and compartment tables for one plate.
pub trait SingleCellStore {
    /// Load every column and row of `table`.
    fn load_table(&self, table: &str) -> Result<StoreTable>;
}

/// A CellProfiler SQLite export opened read-only.
pub struct SqliteStore {
    conn: Connection,
    path: PathBuf,
}

impl SqliteStore {
    /// Open a store from a `sqlite:///<path>` connection string.
    pub fn open(connection: &str) -> Result<Self> {
        let path = connection.strip_prefix(SQLITE_SCHEME).ok_or_else(|| {
            ProfilingError::InvalidParameter(format!(
                "Connection string '{}' does not start with {}",
                connection, SQLITE_SCHEME
            ))
        })?;
        Self::open_path(Path::new(path))
    }

    /// Open a store file directly.
    pub fn open_path(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(ProfilingError::MissingArtifact(path.to_path_buf()));
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SingleCellStore for SqliteStore {
    fn load_table(&self, table: &str) -> Result<StoreTable> {
        let sql = format!("SELECT * FROM \"{}\"", table.replace('"', "\"\""));
        let mut stmt = self.conn.prepare(&sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let n_cols = columns.len();

        let mut rows = Vec::new();
        let mut cursor = stmt.query([])?;
        while let Some(row) = cursor.next()? {
            let mut values = Vec::with_capacity(n_cols);
            for i in 0..n_cols {
                values.push(match row.get_ref(i)? {
                    ValueRef::Null => StoreValue::Null,
                    ValueRef::Integer(v) => StoreValue::Integer(v),
                    ValueRef::Real(v) => StoreValue::Real(v),
                    ValueRef::Text(t) => StoreValue::Text(String::from_utf8_lossy(t).into_owned()),
                    ValueRef::Blob(_) => StoreValue::Null,
                });
            }
            rows.push(values);
        }

        Ok(StoreTable { columns, rows })
    }
}
