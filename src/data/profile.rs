//! Well-level profiles: metadata columns plus a numeric feature matrix.

use crate::data::format::{format_value, parse_value, OutputOptions};
use crate::data::io::{finish_csv, open_reader, open_writer};
use crate::error::{ProfilingError, Result};
use nalgebra::DMatrix;
use std::collections::HashMap;
use std::path::Path;

/// Prefix marking identifier columns.
pub const METADATA_PREFIX: &str = "Metadata_";

/// Whether a column name denotes metadata rather than a measurement.
///
/// Covers both cleaned (`Metadata_Well`) and raw CellProfiler
/// (`Image_Metadata_Well`) spellings.
pub fn is_metadata_column(name: &str) -> bool {
    name.starts_with(METADATA_PREFIX) || name.contains("_Metadata_")
}

/// A profile table: one row per well (or site).
///
/// Metadata values are kept as the raw strings read from disk so they are
/// written back unchanged. Measurements live in a rows × features matrix
/// with NaN for missing values.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    metadata_names: Vec<String>,
    /// Row-major metadata values (rows × metadata columns).
    metadata: Vec<Vec<String>>,
    feature_names: Vec<String>,
    features: DMatrix<f64>,
}

impl Profile {
    /// Create a profile, checking the dimensions agree.
    pub fn new(
        metadata_names: Vec<String>,
        metadata: Vec<Vec<String>>,
        feature_names: Vec<String>,
        features: DMatrix<f64>,
    ) -> Result<Self> {
        let n_rows = features.nrows();
        if metadata.len() != n_rows {
            return Err(ProfilingError::InvalidParameter(format!(
                "Metadata has {} rows but features have {}",
                metadata.len(),
                n_rows
            )));
        }
        if features.ncols() != feature_names.len() {
            return Err(ProfilingError::InvalidParameter(format!(
                "Feature matrix has {} columns but {} names were given",
                features.ncols(),
                feature_names.len()
            )));
        }
        if let Some(row) = metadata.iter().find(|r| r.len() != metadata_names.len()) {
            return Err(ProfilingError::InvalidParameter(format!(
                "Metadata row has {} fields, expected {}",
                row.len(),
                metadata_names.len()
            )));
        }
        Ok(Self {
            metadata_names,
            metadata,
            feature_names,
            features,
        })
    }

    /// Load a profile from a CSV file (gzip detected automatically).
    ///
    /// Metadata columns are recognised by name; every other column must
    /// hold numbers or empty/NA values.
    pub fn from_csv(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new().from_reader(open_reader(path)?);
        let headers: Vec<String> = reader.headers()?.iter().map(String::from).collect();

        let (meta_idx, feat_idx): (Vec<usize>, Vec<usize>) =
            (0..headers.len()).partition(|&i| is_metadata_column(&headers[i]));

        let mut metadata = Vec::new();
        let mut values: Vec<f64> = Vec::new();
        for (row, record) in reader.records().enumerate() {
            let record = record?;
            metadata.push(meta_idx.iter().map(|&i| record[i].to_string()).collect());
            for &i in &feat_idx {
                let v = parse_value(&record[i]).ok_or_else(|| ProfilingError::InvalidValue {
                    value: record[i].to_string(),
                    column: headers[i].clone(),
                    row,
                })?;
                values.push(v);
            }
        }

        let n_rows = metadata.len();
        let features = DMatrix::from_row_slice(n_rows, feat_idx.len(), &values);
        Self::new(
            meta_idx.iter().map(|&i| headers[i].clone()).collect(),
            metadata,
            feat_idx.iter().map(|&i| headers[i].clone()).collect(),
            features,
        )
    }

    /// Write the profile as CSV: metadata columns first, then features.
    pub fn to_csv(&self, path: &Path, options: &OutputOptions) -> Result<()> {
        let mut writer = csv::Writer::from_writer(open_writer(path, options.compression)?);

        writer.write_record(self.metadata_names.iter().chain(&self.feature_names))?;
        let float_format = options.float_format.as_ref();
        for (row, meta) in self.metadata.iter().enumerate() {
            let mut record: Vec<String> = meta.clone();
            record.extend(
                self.features
                    .row(row)
                    .iter()
                    .map(|&v| format_value(v, float_format)),
            );
            writer.write_record(&record)?;
        }
        finish_csv(writer)
    }

    #[inline]
    pub fn n_rows(&self) -> usize {
        self.features.nrows()
    }

    #[inline]
    pub fn n_features(&self) -> usize {
        self.features.ncols()
    }

    #[inline]
    pub fn metadata_names(&self) -> &[String] {
        &self.metadata_names
    }

    #[inline]
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    #[inline]
    pub fn features(&self) -> &DMatrix<f64> {
        &self.features
    }

    /// Metadata values of one row.
    #[inline]
    pub fn metadata_row(&self, row: usize) -> &[String] {
        &self.metadata[row]
    }

    pub fn has_metadata(&self, name: &str) -> bool {
        self.metadata_names.iter().any(|m| m == name)
    }

    /// Index of a metadata column.
    pub fn metadata_index(&self, name: &str) -> Result<usize> {
        self.metadata_names
            .iter()
            .position(|m| m == name)
            .ok_or_else(|| ProfilingError::MissingColumn(name.to_string()))
    }

    /// All values of a metadata column, in row order.
    pub fn metadata_column(&self, name: &str) -> Result<Vec<&str>> {
        let idx = self.metadata_index(name)?;
        Ok(self.metadata.iter().map(|r| r[idx].as_str()).collect())
    }

    /// Index of a feature column.
    pub fn feature_index(&self, name: &str) -> Result<usize> {
        self.feature_names
            .iter()
            .position(|f| f == name)
            .ok_or_else(|| ProfilingError::MissingColumn(name.to_string()))
    }

    /// Values of one feature column.
    pub fn feature_column(&self, idx: usize) -> Vec<f64> {
        self.features.column(idx).iter().copied().collect()
    }

    /// Rename metadata columns with `f`.
    pub fn rename_metadata<F: Fn(&str) -> String>(&mut self, f: F) {
        for name in &mut self.metadata_names {
            *name = f(name);
        }
    }

    /// Add a metadata column with one value per row.
    ///
    /// `front` places it before the existing metadata columns.
    pub fn insert_metadata(&mut self, name: &str, values: Vec<String>, front: bool) -> Result<()> {
        if values.len() != self.n_rows() {
            return Err(ProfilingError::InvalidParameter(format!(
                "Column '{}' has {} values for {} rows",
                name,
                values.len(),
                self.n_rows()
            )));
        }
        if self.has_metadata(name) {
            return Err(ProfilingError::InvalidParameter(format!(
                "Metadata column '{}' already exists",
                name
            )));
        }
        if front {
            self.metadata_names.insert(0, name.to_string());
            for (row, v) in self.metadata.iter_mut().zip(values) {
                row.insert(0, v);
            }
        } else {
            self.metadata_names.push(name.to_string());
            for (row, v) in self.metadata.iter_mut().zip(values) {
                row.push(v);
            }
        }
        Ok(())
    }

    /// Remove a metadata column; a missing column is an error.
    pub fn drop_metadata(&mut self, name: &str) -> Result<()> {
        let idx = self.metadata_index(name)?;
        self.metadata_names.remove(idx);
        for row in &mut self.metadata {
            row.remove(idx);
        }
        Ok(())
    }

    /// Reorder metadata columns; names not listed keep their relative order
    /// after the listed ones.
    pub fn reorder_metadata(&mut self, leading: &[String]) {
        let mut order: Vec<usize> = leading
            .iter()
            .filter_map(|n| self.metadata_names.iter().position(|m| m == n))
            .collect();
        for i in 0..self.metadata_names.len() {
            if !order.contains(&i) {
                order.push(i);
            }
        }
        self.metadata_names = order.iter().map(|&i| self.metadata_names[i].clone()).collect();
        for row in &mut self.metadata {
            *row = order.iter().map(|&i| row[i].clone()).collect();
        }
    }

    /// A new profile with only the given rows, in the given order.
    pub fn select_rows(&self, rows: &[usize]) -> Profile {
        let metadata = rows.iter().map(|&r| self.metadata[r].clone()).collect();
        let features = self.features.select_rows(rows.iter());
        Profile {
            metadata_names: self.metadata_names.clone(),
            metadata,
            feature_names: self.feature_names.clone(),
            features,
        }
    }

    /// A new profile restricted to the named features, in the given order.
    pub fn select_features(&self, names: &[String]) -> Result<Profile> {
        let idx = names
            .iter()
            .map(|n| self.feature_index(n))
            .collect::<Result<Vec<_>>>()?;
        Ok(Profile {
            metadata_names: self.metadata_names.clone(),
            metadata: self.metadata.clone(),
            feature_names: names.to_vec(),
            features: self.features.select_columns(idx.iter()),
        })
    }

    /// A new profile without the named features; unknown names are ignored.
    pub fn drop_features(&self, names: &[String]) -> Profile {
        let keep: Vec<String> = self
            .feature_names
            .iter()
            .filter(|f| !names.contains(f))
            .cloned()
            .collect();
        // Every kept name exists by construction.
        let idx: Vec<usize> = keep
            .iter()
            .filter_map(|n| self.feature_names.iter().position(|f| f == n))
            .collect();
        Profile {
            metadata_names: self.metadata_names.clone(),
            metadata: self.metadata.clone(),
            feature_names: keep,
            features: self.features.select_columns(idx.iter()),
        }
    }

    /// Replace the feature block, keeping metadata.
    pub fn with_features(&self, names: Vec<String>, features: DMatrix<f64>) -> Result<Profile> {
        Profile::new(
            self.metadata_names.clone(),
            self.metadata.clone(),
            names,
            features,
        )
    }

    /// Stack profiles vertically.
    ///
    /// Columns are the union of all inputs in first-seen order; cells absent
    /// from an input are empty (metadata) or NaN (features).
    pub fn concat(profiles: &[Profile]) -> Result<Profile> {
        if profiles.is_empty() {
            return Err(ProfilingError::EmptyData(
                "No profiles to concatenate".to_string(),
            ));
        }

        let mut metadata_names: Vec<String> = Vec::new();
        let mut feature_names: Vec<String> = Vec::new();
        for p in profiles {
            for m in &p.metadata_names {
                if !metadata_names.contains(m) {
                    metadata_names.push(m.clone());
                }
            }
            for f in &p.feature_names {
                if !feature_names.contains(f) {
                    feature_names.push(f.clone());
                }
            }
        }
        let meta_pos: HashMap<&str, usize> = metadata_names
            .iter()
            .enumerate()
            .map(|(i, m)| (m.as_str(), i))
            .collect();
        let feat_pos: HashMap<&str, usize> = feature_names
            .iter()
            .enumerate()
            .map(|(i, f)| (f.as_str(), i))
            .collect();

        let n_rows: usize = profiles.iter().map(Profile::n_rows).sum();
        let mut metadata = Vec::with_capacity(n_rows);
        let mut features = DMatrix::from_element(n_rows, feature_names.len(), f64::NAN);

        let mut offset = 0;
        for p in profiles {
            for r in 0..p.n_rows() {
                let mut row = vec![String::new(); metadata_names.len()];
                for (j, name) in p.metadata_names.iter().enumerate() {
                    row[meta_pos[name.as_str()]] = p.metadata[r][j].clone();
                }
                metadata.push(row);
                for (j, name) in p.feature_names.iter().enumerate() {
                    features[(offset + r, feat_pos[name.as_str()])] = p.features[(r, j)];
                }
            }
            offset += p.n_rows();
        }

        Profile::new(metadata_names, metadata, feature_names, features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::format::{Compression, FloatFormat};
    use tempfile::TempDir;

    fn plate(name: &str, wells: &[&str], offset: f64) -> Profile {
        let metadata = wells
            .iter()
            .map(|w| vec![name.to_string(), w.to_string()])
            .collect();
        let values: Vec<f64> = (0..wells.len() * 2).map(|i| i as f64 + offset).collect();
        Profile::new(
            vec!["Metadata_Plate".into(), "Metadata_Well".into()],
            metadata,
            vec!["Cells_A".into(), "Cells_B".into()],
            DMatrix::from_row_slice(wells.len(), 2, &values),
        )
        .unwrap()
    }

    #[test]
    fn test_metadata_detection() {
        assert!(is_metadata_column("Metadata_Well"));
        assert!(is_metadata_column("Image_Metadata_Plate"));
        assert!(!is_metadata_column("Cells_AreaShape_Area"));
    }

    #[test]
    fn test_csv_roundtrip_preserves_metadata_text() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("p.csv.gz");
        let mut p = plate("P1", &["A01", "A02"], 0.5);
        p.insert_metadata("Metadata_Dose", vec!["0.10".into(), "1e-3".into()], false)
            .unwrap();

        let options = OutputOptions {
            compression: Compression::Gzip,
            float_format: Some(FloatFormat::parse("%.5g").unwrap()),
        };
        p.to_csv(&path, &options).unwrap();
        let back = Profile::from_csv(&path).unwrap();

        assert_eq!(back.metadata_column("Metadata_Dose").unwrap(), vec!["0.10", "1e-3"]);
        assert_eq!(back.feature_names(), p.feature_names());
        assert_eq!(back.features(), p.features());
    }

    #[test]
    fn test_nan_written_as_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nan.csv");
        let p = Profile::new(
            vec!["Metadata_Well".into()],
            vec![vec!["A01".into()]],
            vec!["Cells_X".into()],
            DMatrix::from_element(1, 1, f64::NAN),
        )
        .unwrap();
        p.to_csv(&path, &OutputOptions::default()).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "Metadata_Well,Cells_X\nA01,\n"
        );
        assert!(Profile::from_csv(&path).unwrap().features()[(0, 0)].is_nan());
    }

    #[test]
    fn test_non_numeric_feature_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "Metadata_Well,Cells_X\nA01,abc\n").unwrap();
        assert!(matches!(
            Profile::from_csv(&path),
            Err(ProfilingError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_concat_unions_columns() {
        let a = plate("P1", &["A01"], 0.0);
        let b = plate("P2", &["B01", "B02"], 10.0)
            .select_features(&["Cells_B".to_string()])
            .unwrap();
        let c = Profile::concat(&[a, b]).unwrap();

        assert_eq!(c.n_rows(), 3);
        assert_eq!(c.feature_names(), &["Cells_A".to_string(), "Cells_B".to_string()]);
        assert!(c.features()[(1, 0)].is_nan());
        assert_eq!(c.features()[(1, 1)], 11.0);
        assert_eq!(c.metadata_column("Metadata_Plate").unwrap(), vec!["P1", "P2", "P2"]);
    }

    #[test]
    fn test_select_and_reorder() {
        let mut p = plate("P1", &["A01", "A02", "A03"], 0.0);
        let sub = p.select_rows(&[2, 0]);
        assert_eq!(sub.metadata_column("Metadata_Well").unwrap(), vec!["A03", "A01"]);
        assert_eq!(sub.features()[(0, 0)], 4.0);

        p.reorder_metadata(&["Metadata_Well".to_string()]);
        assert_eq!(p.metadata_names()[0], "Metadata_Well");
        assert_eq!(p.metadata_row(0), &["A01".to_string(), "P1".to_string()]);

        let dropped = p.drop_features(&["Cells_A".to_string()]);
        assert_eq!(dropped.feature_names(), &["Cells_B".to_string()]);
    }
}
