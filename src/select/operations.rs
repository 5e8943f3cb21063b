//! Individual feature-selection operations.
//!
//! Each operation inspects the feature matrix and returns the names it
//! would exclude; the caller drops the union.

use crate::data::Profile;
use crate::error::{ProfilingError, Result};
use crate::stats::pearson;
use std::collections::{HashMap, HashSet};
use std::path::Path;

const BUILTIN_BLOCKLIST: &str = include_str!("blocklist.txt");
const BLOCKLIST_HEADER: &str = "blocklist";

fn column_values(profile: &Profile, feature: &str) -> Result<Vec<f64>> {
    Ok(profile.feature_column(profile.feature_index(feature)?))
}

/// Features with near-zero variance.
///
/// A feature is excluded when it has a single distinct value, when the
/// second most common value is rarer than `freq_cut` times the most common,
/// or when distinct values make up less than `unique_cut` of the rows.
pub fn variance_threshold(
    profile: &Profile,
    features: &[String],
    freq_cut: f64,
    unique_cut: f64,
) -> Result<Vec<String>> {
    if !(0.0..=1.0).contains(&freq_cut) || !(0.0..=1.0).contains(&unique_cut) {
        return Err(ProfilingError::InvalidParameter(
            "freq_cut and unique_cut must be between 0 and 1".to_string(),
        ));
    }
    let n = profile.n_rows() as f64;
    let mut excluded = Vec::new();

    for feature in features {
        let mut counts: HashMap<u64, usize> = HashMap::new();
        for v in column_values(profile, feature)? {
            if !v.is_nan() {
                // +0.0 folds -0.0 onto 0.0
                *counts.entry((v + 0.0).to_bits()).or_default() += 1;
            }
        }
        let mut freq: Vec<usize> = counts.values().copied().collect();
        freq.sort_unstable_by(|a, b| b.cmp(a));

        let low_frequency = match freq.as_slice() {
            [first, second, ..] => (*second as f64 / *first as f64) < freq_cut,
            _ => true,
        };
        let low_unique = (counts.len() as f64 / n) < unique_cut;
        if low_frequency || low_unique {
            excluded.push(feature.clone());
        }
    }
    Ok(excluded)
}

/// Features highly correlated with another feature.
///
/// For each pair with |r| above `threshold`, the member with the larger
/// total absolute correlation to all features is excluded.
pub fn correlation_threshold(
    profile: &Profile,
    features: &[String],
    threshold: f64,
) -> Result<Vec<String>> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(ProfilingError::InvalidParameter(
            "Correlation threshold must be between 0 and 1".to_string(),
        ));
    }
    let columns = features
        .iter()
        .map(|f| column_values(profile, f))
        .collect::<Result<Vec<_>>>()?;
    let k = columns.len();

    let mut abs_corr = vec![vec![f64::NAN; k]; k];
    for i in 0..k {
        for j in (i + 1)..k {
            let r = pearson(&columns[i], &columns[j]).abs();
            abs_corr[i][j] = r;
            abs_corr[j][i] = r;
        }
    }

    let totals: Vec<f64> = abs_corr
        .iter()
        .map(|row| row.iter().filter(|v| !v.is_nan()).sum())
        .collect();
    let mut order: Vec<usize> = (0..k).collect();
    order.sort_by(|&a, &b| totals[a].total_cmp(&totals[b]).then(a.cmp(&b)));
    let mut rank = vec![0usize; k];
    for (position, &feature) in order.iter().enumerate() {
        rank[feature] = position;
    }

    let mut excluded: Vec<usize> = Vec::new();
    for i in 0..k {
        for j in (i + 1)..k {
            if abs_corr[i][j] > threshold {
                let drop = if rank[i] > rank[j] { i } else { j };
                if !excluded.contains(&drop) {
                    excluded.push(drop);
                }
            }
        }
    }
    excluded.sort_unstable();
    Ok(excluded.into_iter().map(|i| features[i].clone()).collect())
}

/// Features whose fraction of missing values exceeds `cutoff`.
pub fn drop_na_columns(profile: &Profile, features: &[String], cutoff: f64) -> Result<Vec<String>> {
    if !(0.0..=1.0).contains(&cutoff) {
        return Err(ProfilingError::InvalidParameter(
            "NA cutoff must be between 0 and 1".to_string(),
        ));
    }
    let n = profile.n_rows() as f64;
    let mut excluded = Vec::new();
    for feature in features {
        let missing = column_values(profile, feature)?
            .iter()
            .filter(|v| v.is_nan())
            .count();
        if missing as f64 / n > cutoff {
            excluded.push(feature.clone());
        }
    }
    Ok(excluded)
}

/// Parse a blocklist: one feature per line, optional `blocklist` header.
pub fn parse_blocklist(text: &str) -> HashSet<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && *l != BLOCKLIST_HEADER && !l.starts_with('#'))
        .map(String::from)
        .collect()
}

/// Load a blocklist file, or the built-in list when `path` is `None`.
pub fn load_blocklist(path: Option<&Path>) -> Result<HashSet<String>> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    ProfilingError::MissingArtifact(path.to_path_buf())
                }
                _ => ProfilingError::Io(e),
            })?;
            Ok(parse_blocklist(&text))
        }
        None => Ok(parse_blocklist(BUILTIN_BLOCKLIST)),
    }
}

/// Features that appear on the blocklist.
pub fn blocklist(features: &[String], blocked: &HashSet<String>) -> Vec<String> {
    features
        .iter()
        .filter(|f| blocked.contains(*f))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DMatrix;

    fn profile(columns: &[(&str, Vec<f64>)]) -> (Profile, Vec<String>) {
        let n = columns[0].1.len();
        let names: Vec<String> = columns.iter().map(|(c, _)| c.to_string()).collect();
        let matrix = DMatrix::from_fn(n, columns.len(), |r, c| columns[c].1[r]);
        let profile = Profile::new(
            vec!["Metadata_Well".into()],
            (0..n).map(|i| vec![format!("W{}", i)]).collect(),
            names.clone(),
            matrix,
        )
        .unwrap();
        (profile, names)
    }

    #[test]
    fn test_variance_threshold() {
        let (p, names) = profile(&[
            ("Cells_const", vec![1.0; 20]),
            ("Cells_rare", {
                let mut v = vec![0.0; 20];
                v[0] = 1.0;
                v
            }),
            ("Cells_ok", (0..20).map(|i| i as f64).collect()),
        ]);
        let excluded = variance_threshold(&p, &names, 0.1, 0.01).unwrap();
        assert_eq!(excluded, vec!["Cells_const", "Cells_rare"]);
    }

    #[test]
    fn test_correlation_threshold_drops_most_connected() {
        let x: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|v| 2.0 * v + 1.0).collect();
        let z: Vec<f64> = x.iter().map(|v| v * 3.0 - 0.5).collect();
        let w: Vec<f64> = vec![1.0, -1.0, 1.0, -1.0, 1.0, -1.0, 1.0, -1.0, 1.0, -1.0];
        let (p, names) = profile(&[
            ("Cells_x", x),
            ("Cells_y", y),
            ("Cells_z", z),
            ("Cells_w", w),
        ]);
        let excluded = correlation_threshold(&p, &names, 0.9).unwrap();
        // x, y, z are perfectly collinear; only one of them survives.
        assert_eq!(excluded.len(), 2);
        assert!(!excluded.contains(&"Cells_w".to_string()));
    }

    #[test]
    fn test_drop_na_columns() {
        let (p, names) = profile(&[
            ("Cells_a", vec![1.0, f64::NAN, 3.0, 4.0]),
            ("Cells_b", vec![1.0, 2.0, 3.0, 4.0]),
        ]);
        assert_eq!(drop_na_columns(&p, &names, 0.05).unwrap(), vec!["Cells_a"]);
        assert!(drop_na_columns(&p, &names, 0.5).unwrap().is_empty());
    }

    #[test]
    fn test_blocklist() {
        let builtin = load_blocklist(None).unwrap();
        assert!(builtin.contains("Cells_Correlation_Manders_AGP_DNA"));
        assert!(!builtin.contains(BLOCKLIST_HEADER));

        let custom = parse_blocklist("blocklist\nCells_a\n\n# note\n");
        let features = vec!["Cells_a".to_string(), "Cells_b".to_string()];
        assert_eq!(blocklist(&features, &custom), vec!["Cells_a"]);
    }
}
