//! Normalization of well-level profiles.
//!
//! Statistics are estimated on a subset of rows (all wells, or e.g. the
//! negative controls) and applied to every row:
//!
//! - **standardize**: `(x - mean) / std`
//! - **robustize**: `(x - median) / IQR`
//! - **mad_robustize**: `(x - median) / (MAD + epsilon)`, MAD scaled to the normal

mod samples;

pub use samples::SampleSelection;

use crate::config::NormalizeMethod;
use crate::data::Profile;
use crate::error::{ProfilingError, Result};
use crate::stats::{nan_mad_normal, nan_mean, nan_median, nan_percentile, nan_std};
use nalgebra::DMatrix;
use std::collections::BTreeMap;
use tracing::debug;

/// Parameters of one normalization.
#[derive(Debug, Clone)]
pub struct NormalizeRequest<'a> {
    pub features: &'a [String],
    pub samples: &'a SampleSelection,
    pub method: NormalizeMethod,
    /// Added to the MAD by `mad_robustize`.
    pub epsilon: f64,
}

/// Location and scale of one feature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scaling {
    pub center: f64,
    pub scale: f64,
}

impl Scaling {
    /// Estimate location and scale from `values` (NaN ignored).
    ///
    /// A zero spread is replaced by 1 for `standardize` and `robustize` so a
    /// constant feature is only centred.
    pub fn estimate(values: &[f64], method: NormalizeMethod, epsilon: f64) -> Self {
        match method {
            NormalizeMethod::Standardize => Self {
                center: nan_mean(values),
                scale: non_zero(nan_std(values)),
            },
            NormalizeMethod::Robustize => Self {
                center: nan_median(values),
                scale: non_zero(nan_percentile(values, 75.0) - nan_percentile(values, 25.0)),
            },
            NormalizeMethod::MadRobustize => Self {
                center: nan_median(values),
                scale: nan_mad_normal(values) + epsilon,
            },
        }
    }

    #[inline]
    pub fn apply(&self, value: f64) -> f64 {
        (value - self.center) / self.scale
    }
}

fn non_zero(scale: f64) -> f64 {
    if scale == 0.0 {
        1.0
    } else {
        scale
    }
}

/// Normalize `features` of a profile; other measurement columns are dropped.
///
/// Statistics come from the rows chosen by `samples` only.
pub fn normalize(profile: &Profile, request: &NormalizeRequest<'_>) -> Result<Profile> {
    let selected = request.samples.select(profile)?;
    let all_rows: Vec<usize> = (0..profile.n_rows()).collect();
    let profile = profile.select_features(request.features)?;
    let normalized = scale_rows(&profile, &all_rows, &selected, request)?;
    profile.with_features(profile.feature_names().to_vec(), normalized)
}

/// Normalize each partition of `subgroup` independently.
///
/// Every partition needs at least one selected row. Row order is kept.
pub fn normalize_by_subgroup(
    profile: &Profile,
    subgroup: &str,
    request: &NormalizeRequest<'_>,
) -> Result<Profile> {
    let selected = request.samples.select(profile)?;
    let profile = profile.select_features(request.features)?;

    let mut partitions: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (row, value) in profile.metadata_column(subgroup)?.into_iter().enumerate() {
        partitions.entry(value).or_default().push(row);
    }

    let mut normalized = DMatrix::from_element(profile.n_rows(), profile.n_features(), f64::NAN);
    for (value, rows) in &partitions {
        let reference: Vec<usize> = rows
            .iter()
            .copied()
            .filter(|r| selected.binary_search(r).is_ok())
            .collect();
        if reference.is_empty() {
            return Err(ProfilingError::EmptyData(format!(
                "Subgroup {} = '{}' has no rows matching the sample selection",
                subgroup, value
            )));
        }
        let block = scale_rows(&profile, rows, &reference, request)?;
        for (i, &row) in rows.iter().enumerate() {
            normalized.set_row(row, &block.row(i));
        }
    }
    debug!(subgroup, partitions = partitions.len(), "normalized by subgroup");

    profile.with_features(profile.feature_names().to_vec(), normalized)
}

/// Scale `rows` of every feature with statistics from `reference` rows.
fn scale_rows(
    profile: &Profile,
    rows: &[usize],
    reference: &[usize],
    request: &NormalizeRequest<'_>,
) -> Result<DMatrix<f64>> {
    if reference.is_empty() {
        return Err(ProfilingError::EmptyData(
            "No rows match the normalization sample selection".to_string(),
        ));
    }
    let features = profile.features();
    let mut out = DMatrix::from_element(rows.len(), features.ncols(), f64::NAN);
    let mut values = Vec::with_capacity(reference.len());

    for j in 0..features.ncols() {
        values.clear();
        values.extend(reference.iter().map(|&r| features[(r, j)]));
        let scaling = Scaling::estimate(&values, request.method, request.epsilon);
        for (i, &r) in rows.iter().enumerate() {
            out[(i, j)] = scaling.apply(features[(r, j)]);
        }
    }
    debug!(
        rows = rows.len(),
        reference = reference.len(),
        features = features.ncols(),
        "normalized block"
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn profile() -> Profile {
        Profile::new(
            vec!["Metadata_Well".into(), "Metadata_control_type".into(), "Metadata_group".into()],
            vec![
                vec!["A01".into(), "negcon".into(), "g1".into()],
                vec!["A02".into(), "".into(), "g1".into()],
                vec!["A03".into(), "negcon".into(), "g2".into()],
                vec!["A04".into(), "".into(), "g2".into()],
            ],
            vec!["Cells_A".into(), "Cells_B".into(), "Other_C".into()],
            DMatrix::from_row_slice(
                4,
                3,
                &[
                    1.0, 5.0, 0.0, //
                    3.0, 5.0, 0.0, //
                    5.0, 5.0, 0.0, //
                    7.0, 5.0, 0.0,
                ],
            ),
        )
        .unwrap()
    }

    fn features() -> Vec<String> {
        vec!["Cells_A".into(), "Cells_B".into()]
    }

    #[test]
    fn test_standardize_all_samples() {
        let features = features();
        let samples = SampleSelection::all();
        let req = NormalizeRequest {
            features: &features,
            samples: &samples,
            method: NormalizeMethod::Standardize,
            epsilon: 0.0,
        };
        let out = normalize(&profile(), &req).unwrap();

        assert_eq!(out.feature_names(), &["Cells_A", "Cells_B"]);
        // mean 4, population std sqrt(5)
        assert_relative_eq!(out.features()[(0, 0)], -3.0 / 5f64.sqrt(), epsilon = 1e-12);
        // constant feature is centred only
        assert_relative_eq!(out.features()[(2, 1)], 0.0);
        assert_eq!(out.metadata_names(), profile().metadata_names());
    }

    #[test]
    fn test_negcon_statistics_applied_to_all_rows() {
        let features = features();
        let samples = SampleSelection::parse("Metadata_control_type == 'negcon'").unwrap();
        let req = NormalizeRequest {
            features: &features,
            samples: &samples,
            method: NormalizeMethod::Robustize,
            epsilon: 0.0,
        };
        let out = normalize(&profile(), &req).unwrap();
        // negcon values 1 and 5: median 3, IQR 2
        assert_relative_eq!(out.features()[(3, 0)], 2.0, epsilon = 1e-12);
        assert_relative_eq!(out.features()[(0, 0)], -1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_mad_robustize_epsilon() {
        let s = Scaling::estimate(&[1.0, 1.0, 1.0], NormalizeMethod::MadRobustize, 1e-18);
        assert_relative_eq!(s.center, 1.0);
        assert_eq!(s.scale, 1e-18);

        let s = Scaling::estimate(&[1.0, 2.0, 3.0, 4.0, 5.0], NormalizeMethod::MadRobustize, 0.0);
        assert_relative_eq!(s.apply(4.0), 1.0 / crate::stats::MAD_NORMAL_SCALE, epsilon = 1e-12);
    }

    #[test]
    fn test_subgroup_partitions_independent() {
        let features = vec!["Cells_A".to_string()];
        let samples = SampleSelection::parse("Metadata_control_type == 'negcon'").unwrap();
        let req = NormalizeRequest {
            features: &features,
            samples: &samples,
            method: NormalizeMethod::Standardize,
            epsilon: 0.0,
        };
        let out = normalize_by_subgroup(&profile(), "Metadata_group", &req).unwrap();
        // Each group has a single negcon: centred on it, std 0 -> 1.
        assert_relative_eq!(out.features()[(0, 0)], 0.0);
        assert_relative_eq!(out.features()[(1, 0)], 2.0);
        assert_relative_eq!(out.features()[(2, 0)], 0.0);
        assert_relative_eq!(out.features()[(3, 0)], 2.0);
    }

    #[test]
    fn test_empty_selection_is_error() {
        let features = features();
        let samples = SampleSelection::parse("Metadata_control_type == 'poscon'").unwrap();
        let req = NormalizeRequest {
            features: &features,
            samples: &samples,
            method: NormalizeMethod::Standardize,
            epsilon: 0.0,
        };
        assert!(matches!(
            normalize(&profile(), &req),
            Err(ProfilingError::EmptyData(_))
        ));
    }
}
