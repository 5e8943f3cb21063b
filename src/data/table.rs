//! Plain string tables for platemaps, load-data files and QC summaries.

use crate::data::format::Compression;
use crate::data::io::{finish_csv, open_reader, open_writer};
use crate::error::{ProfilingError, Result};
use std::collections::HashMap;
use std::path::Path;

/// A header plus rows of raw string fields.
///
/// Used wherever values are joined or counted rather than computed on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    /// Create a table, checking every row has one field per column.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self> {
        if let Some(bad) = rows.iter().position(|r| r.len() != columns.len()) {
            return Err(ProfilingError::InvalidParameter(format!(
                "Row {} has {} fields, expected {}",
                bad,
                rows[bad].len(),
                columns.len()
            )));
        }
        Ok(Self { columns, rows })
    }

    /// Read a delimited file (gzip detected automatically).
    pub fn from_path(path: &Path, delimiter: u8) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(false)
            .from_reader(open_reader(path)?);

        let columns: Vec<String> = reader.headers()?.iter().map(String::from).collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(record.iter().map(String::from).collect());
        }

        Self::new(columns, rows)
    }

    /// Write the table as a delimited file.
    pub fn to_path(&self, path: &Path, delimiter: u8, compression: Compression) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .from_writer(open_writer(path, compression)?);

        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        finish_csv(writer)
    }

    #[inline]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[inline]
    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    #[inline]
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    /// Index of a column by name.
    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| ProfilingError::MissingColumn(name.to_string()))
    }

    /// All values of a column, in row order.
    pub fn column(&self, name: &str) -> Result<Vec<&str>> {
        let idx = self.column_index(name)?;
        Ok(self.rows.iter().map(|r| r[idx].as_str()).collect())
    }

    /// Rows whose `column` equals `value`.
    pub fn filter_eq(&self, column: &str, value: &str) -> Result<Vec<&[String]>> {
        let idx = self.column_index(column)?;
        Ok(self
            .rows
            .iter()
            .filter(|r| r[idx] == value)
            .map(Vec::as_slice)
            .collect())
    }

    /// Rename columns with `f`.
    pub fn rename_columns<F: Fn(&str) -> String>(&mut self, f: F) {
        for c in &mut self.columns {
            *c = f(c);
        }
    }

    /// Append a row.
    pub fn push_row(&mut self, row: Vec<String>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(ProfilingError::InvalidParameter(format!(
                "Row has {} fields, expected {}",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    /// Keep only rows for which `keep` returns true.
    pub fn retain_rows<F: FnMut(&[String]) -> bool>(&mut self, mut keep: F) {
        self.rows.retain(|r| keep(r));
    }

    /// Build a lookup from the values of `column` to row indices.
    ///
    /// Fails on a repeated key; `source_name` names the table in the error.
    pub fn unique_index(&self, column: &str, source_name: &str) -> Result<HashMap<String, usize>> {
        let idx = self.column_index(column)?;
        let mut index = HashMap::with_capacity(self.rows.len());
        for (i, row) in self.rows.iter().enumerate() {
            if index.insert(row[idx].clone(), i).is_some() {
                return Err(ProfilingError::DuplicateKey {
                    key: row[idx].clone(),
                    source_name: source_name.to_string(),
                });
            }
        }
        Ok(index)
    }
}
