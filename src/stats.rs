//! NaN-aware summary statistics shared by the stages.
//!
//! Every function ignores NaN inputs and returns NaN when nothing is left.

use statrs::statistics::{Data, Median, Statistics};

/// Consistency constant turning a MAD into a normal-scale estimate.
pub const MAD_NORMAL_SCALE: f64 = 1.482_602_218_505_602;

fn finite(values: &[f64]) -> Vec<f64> {
    values.iter().copied().filter(|v| !v.is_nan()).collect()
}

/// Arithmetic mean.
pub fn nan_mean(values: &[f64]) -> f64 {
    let v = finite(values);
    if v.is_empty() {
        return f64::NAN;
    }
    v.iter().mean()
}

/// Population standard deviation (ddof = 0).
pub fn nan_std(values: &[f64]) -> f64 {
    let v = finite(values);
    if v.is_empty() {
        return f64::NAN;
    }
    v.iter().population_std_dev()
}

/// Median.
pub fn nan_median(values: &[f64]) -> f64 {
    let v = finite(values);
    if v.is_empty() {
        return f64::NAN;
    }
    Data::new(v).median()
}

/// Median absolute deviation around the median, scaled to the normal.
pub fn nan_mad_normal(values: &[f64]) -> f64 {
    let med = nan_median(values);
    if med.is_nan() {
        return f64::NAN;
    }
    let deviations: Vec<f64> = finite(values).iter().map(|v| (v - med).abs()).collect();
    nan_median(&deviations) * MAD_NORMAL_SCALE
}

/// Mean absolute deviation around the mean.
pub fn mean_abs_deviation(values: &[f64]) -> f64 {
    let mean = nan_mean(values);
    if mean.is_nan() {
        return f64::NAN;
    }
    let deviations: Vec<f64> = finite(values).iter().map(|v| (v - mean).abs()).collect();
    nan_mean(&deviations)
}

/// Percentile with linear interpolation between closest ranks.
///
/// `q` is in percent (0..=100).
pub fn nan_percentile(values: &[f64], q: f64) -> f64 {
    let mut v = finite(values);
    if v.is_empty() {
        return f64::NAN;
    }
    v.sort_by(f64::total_cmp);
    let rank = (q.clamp(0.0, 100.0) / 100.0) * (v.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    v[lo] + (v[hi] - v[lo]) * frac
}

/// Pearson correlation over positions where both inputs are present.
///
/// Returns NaN when fewer than two pairs remain or either side is constant.
pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let pairs: Vec<(f64, f64)> = x
        .iter()
        .zip(y)
        .filter(|(a, b)| !a.is_nan() && !b.is_nan())
        .map(|(&a, &b)| (a, b))
        .collect();
    if pairs.len() < 2 {
        return f64::NAN;
    }
    let n = pairs.len() as f64;
    let mx = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let my = pairs.iter().map(|p| p.1).sum::<f64>() / n;

    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (a, b) in &pairs {
        sxy += (a - mx) * (b - my);
        sxx += (a - mx) * (a - mx);
        syy += (b - my) * (b - my);
    }
    if sxx == 0.0 || syy == 0.0 {
        return f64::NAN;
    }
    sxy / (sxx * syy).sqrt()
}
