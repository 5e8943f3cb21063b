//! Plate-layout heatmaps: cell counts, well correlations and position effect.

use crate::data::format::parse_value;
use crate::data::Profile;
use crate::error::{ProfilingError, Result};
use crate::stats::{nan_mean, nan_percentile, pearson};
use nalgebra::DMatrix;
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Percentile of the null distribution a same-row/column correlation must beat.
pub const NULL_PERCENTILE: f64 = 95.0;

fn well_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([A-Za-z]+)0*(\d+)$").expect("well pattern is a valid regex")
    })
}

/// Zero-based (row, column) of a well name such as `A01` or `AB12`.
pub fn parse_well(well: &str) -> Option<(usize, usize)> {
    let caps = well_pattern().captures(well.trim())?;
    let row = caps[1]
        .to_ascii_uppercase()
        .bytes()
        .try_fold(0usize, |acc, b| {
            acc.checked_mul(26)?.checked_add((b - b'A' + 1) as usize)
        })?
        - 1;
    let column: usize = caps[2].parse().ok()?;
    Some((row, column.checked_sub(1)?))
}

/// Profile rows grouped by plate position, wells in first-seen order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WellGroups {
    pub positions: Vec<(usize, usize)>,
    pub rows: Vec<Vec<usize>>,
}

impl WellGroups {
    /// Group the rows of `profile` by the well in `well_column`.
    ///
    /// Site-level profiles contribute several rows to one well.
    pub fn from_profile(profile: &Profile, well_column: &str) -> Result<Self> {
        let mut groups = Self {
            positions: Vec::new(),
            rows: Vec::new(),
        };
        let mut index: HashMap<(usize, usize), usize> = HashMap::new();
        for (row, well) in profile.metadata_column(well_column)?.into_iter().enumerate() {
            let position = parse_well(well).ok_or_else(|| {
                ProfilingError::InvalidParameter(format!("'{}' is not a well position", well))
            })?;
            let slot = *index.entry(position).or_insert_with(|| {
                groups.positions.push(position);
                groups.rows.push(Vec::new());
                groups.positions.len() - 1
            });
            groups.rows[slot].push(row);
        }
        Ok(groups)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Place one value per well on the plate grid; unused positions are NaN.
pub fn plate_grid(positions: &[(usize, usize)], values: &[f64]) -> DMatrix<f64> {
    let n_rows = positions.iter().map(|p| p.0 + 1).max().unwrap_or(0);
    let n_cols = positions.iter().map(|p| p.1 + 1).max().unwrap_or(0);
    let mut grid = DMatrix::from_element(n_rows, n_cols, f64::NAN);
    for (&(r, c), &v) in positions.iter().zip(values) {
        grid[(r, c)] = v;
    }
    grid
}

/// Total cell count of each well laid out on the plate.
///
/// Counts of every site of a well are summed; a well without any count is NaN.
pub fn cell_count_grid(profile: &Profile, well_column: &str, count_column: &str) -> Result<DMatrix<f64>> {
    let groups = WellGroups::from_profile(profile, well_column)?;
    let counts: Vec<f64> = profile
        .metadata_column(count_column)?
        .into_iter()
        .map(|c| parse_value(c).unwrap_or(f64::NAN))
        .collect();

    let totals: Vec<f64> = groups
        .rows
        .iter()
        .map(|rows| {
            let present: Vec<f64> = rows.iter().map(|&r| counts[r]).filter(|c| !c.is_nan()).collect();
            if present.is_empty() {
                f64::NAN
            } else {
                present.iter().sum()
            }
        })
        .collect();
    Ok(plate_grid(&groups.positions, &totals))
}

/// Mean feature vector of each well, one row per group.
pub fn well_means(profile: &Profile, groups: &WellGroups) -> DMatrix<f64> {
    let features = profile.features();
    let mut means = DMatrix::from_element(groups.len(), features.ncols(), f64::NAN);
    let mut values = Vec::new();
    for (i, rows) in groups.rows.iter().enumerate() {
        for j in 0..features.ncols() {
            values.clear();
            values.extend(rows.iter().map(|&r| features[(r, j)]));
            means[(i, j)] = nan_mean(&values);
        }
    }
    means
}

/// Pearson correlation between every pair of rows.
pub fn well_correlations(features: &DMatrix<f64>) -> DMatrix<f64> {
    let n = features.nrows();
    let rows: Vec<Vec<f64>> = (0..n)
        .map(|r| features.row(r).iter().copied().collect())
        .collect();
    let mut corr = DMatrix::from_element(n, n, f64::NAN);
    for i in 0..n {
        for j in i..n {
            let r = if i == j { 1.0 } else { pearson(&rows[i], &rows[j]) };
            corr[(i, j)] = r;
            corr[(j, i)] = r;
        }
    }
    corr
}

/// Position effect of each well.
///
/// The fraction of correlations with wells sharing its row or column that
/// exceed the [`NULL_PERCENTILE`] of its correlations with wells sharing
/// neither. NaN when either set is empty.
pub fn position_effect(positions: &[(usize, usize)], correlations: &DMatrix<f64>) -> Vec<f64> {
    let n = positions.len();
    (0..n)
        .map(|i| {
            let (ri, ci) = positions[i];
            let mut same = Vec::new();
            let mut null = Vec::new();
            for j in (0..n).filter(|&j| positions[j] != positions[i]) {
                let (rj, cj) = positions[j];
                let r = correlations[(i, j)];
                if r.is_nan() {
                    continue;
                }
                if rj == ri || cj == ci {
                    same.push(r);
                } else {
                    null.push(r);
                }
            }
            let threshold = nan_percentile(&null, NULL_PERCENTILE);
            if threshold.is_nan() || same.is_empty() {
                return f64::NAN;
            }
            same.iter().filter(|&&r| r > threshold).count() as f64 / same.len() as f64
        })
        .collect()
}

/// Well-by-well correlation matrix and position-effect grid of a
/// feature-selected profile.
///
/// Site rows are averaged per well first, so the matrix has one row and
/// column per well in first-seen order.
pub fn correlation_heatmaps(profile: &Profile, well_column: &str) -> Result<(DMatrix<f64>, DMatrix<f64>)> {
    let groups = WellGroups::from_profile(profile, well_column)?;
    let correlations = well_correlations(&well_means(profile, &groups));
    let effect = position_effect(&groups.positions, &correlations);
    Ok((correlations, plate_grid(&groups.positions, &effect)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_parse_well() {
        assert_eq!(parse_well("A01"), Some((0, 0)));
        assert_eq!(parse_well("p24"), Some((15, 23)));
        assert_eq!(parse_well("AA3"), Some((26, 2)));
        assert_eq!(parse_well("A00"), None);
        assert_eq!(parse_well("1A"), None);
        assert_eq!(parse_well(&format!("{}1", "Z".repeat(40))), None);
    }

    #[test]
    fn test_cell_count_grid() {
        let profile = Profile::new(
            vec!["Metadata_Well".into(), "Metadata_Object_Count".into()],
            vec![
                vec!["A01".into(), "10".into()],
                vec!["B03".into(), "30".into()],
            ],
            vec!["Cells_a".into()],
            DMatrix::zeros(2, 1),
        )
        .unwrap();
        let grid = cell_count_grid(&profile, "Metadata_Well", "Metadata_Object_Count").unwrap();
        assert_eq!(grid.shape(), (2, 3));
        assert_eq!(grid[(0, 0)], 10.0);
        assert_eq!(grid[(1, 2)], 30.0);
        assert!(grid[(0, 1)].is_nan());
    }

    #[test]
    fn test_position_effect() {
        // A01, A02, B01, B02: A01's same row/column wells are A02 and B01, its null is B02.
        let positions = vec![(0, 0), (0, 1), (1, 0), (1, 1)];
        let mut corr = DMatrix::from_element(4, 4, 1.0);
        corr[(0, 1)] = 0.9;
        corr[(0, 2)] = 0.1;
        corr[(0, 3)] = 0.5;
        let effect = position_effect(&positions, &corr);
        assert_relative_eq!(effect[0], 0.5);
    }

    #[test]
    fn test_position_effect_empty_null() {
        let positions = vec![(0, 0), (0, 1)];
        let corr = DMatrix::from_element(2, 2, 1.0);
        let effect = position_effect(&positions, &corr);
        assert!(effect.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_well_correlations_diagonal() {
        let profile = Profile::new(
            vec!["Metadata_Well".into()],
            vec![vec!["A01".into()], vec!["A02".into()]],
            vec!["Cells_a".into(), "Cells_b".into(), "Cells_c".into()],
            DMatrix::from_row_slice(2, 3, &[1.0, 2.0, 3.0, 2.0, 4.0, 6.5]),
        )
        .unwrap();
        let corr = well_correlations(profile.features());
        assert_eq!(corr[(0, 0)], 1.0);
        assert!(corr[(0, 1)] > 0.99);
        assert_eq!(corr[(0, 1)], corr[(1, 0)]);
    }

    fn site_profile() -> Profile {
        // A01 imaged at two sites, A02 and B02 at one.
        Profile::new(
            vec!["Metadata_Well".into(), "Metadata_Site".into(), "Metadata_Object_Count".into()],
            vec![
                vec!["A01".into(), "1".into(), "10".into()],
                vec!["A01".into(), "2".into(), "30".into()],
                vec!["A02".into(), "1".into(), "5".into()],
                vec!["B02".into(), "1".into(), "".into()],
            ],
            vec!["Cells_a".into(), "Cells_b".into(), "Cells_c".into()],
            DMatrix::from_row_slice(
                4,
                3,
                &[
                    1.0, 2.0, 3.0, //
                    3.0, 4.0, 5.0, //
                    3.0, 2.0, 1.0, //
                    1.0, 5.0, 2.0,
                ],
            ),
        )
        .unwrap()
    }

    #[test]
    fn test_cell_count_sums_sites() {
        let grid = cell_count_grid(&site_profile(), "Metadata_Well", "Metadata_Object_Count").unwrap();
        assert_eq!(grid.shape(), (2, 2));
        assert_eq!(grid[(0, 0)], 40.0);
        assert_eq!(grid[(0, 1)], 5.0);
        assert!(grid[(1, 1)].is_nan());
        assert!(grid[(1, 0)].is_nan());
    }

    #[test]
    fn test_well_groups_merge_sites() {
        let groups = WellGroups::from_profile(&site_profile(), "Metadata_Well").unwrap();
        assert_eq!(groups.positions, vec![(0, 0), (0, 1), (1, 1)]);
        assert_eq!(groups.rows, vec![vec![0, 1], vec![2], vec![3]]);

        let means = well_means(&site_profile(), &groups);
        assert_eq!(means.shape(), (3, 3));
        assert_relative_eq!(means[(0, 0)], 2.0);
        assert_relative_eq!(means[(0, 2)], 4.0);
    }

    #[test]
    fn test_correlation_heatmaps_one_entry_per_well() {
        let (corr, effect) = correlation_heatmaps(&site_profile(), "Metadata_Well").unwrap();
        assert_eq!(corr.shape(), (3, 3));
        // A01 mean is [2, 3, 4], perfectly anti-correlated with A02.
        assert_relative_eq!(corr[(0, 1)], -1.0, epsilon = 1e-12);
        assert_eq!(effect.shape(), (2, 2));
    }
}
