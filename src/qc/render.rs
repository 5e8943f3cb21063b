//! PNG rendering of numeric grids.

use crate::error::Result;
use image::{Rgb, RgbImage};
use nalgebra::DMatrix;
use std::path::Path;

/// Pixel size of one grid cell.
const CELL: u32 = 16;

const MISSING: Rgb<u8> = Rgb([160, 160, 160]);

/// Anchor colours of a perceptually ordered dark-blue → yellow ramp.
const RAMP: [[f64; 3]; 5] = [
    [68.0, 1.0, 84.0],
    [59.0, 82.0, 139.0],
    [33.0, 145.0, 140.0],
    [94.0, 201.0, 98.0],
    [253.0, 231.0, 37.0],
];

/// Colour of `t` in `[0, 1]`.
pub fn colormap(t: f64) -> Rgb<u8> {
    let t = t.clamp(0.0, 1.0) * (RAMP.len() - 1) as f64;
    let lo = t.floor() as usize;
    let hi = (lo + 1).min(RAMP.len() - 1);
    let frac = t - lo as f64;
    let mut rgb = [0u8; 3];
    for (c, out) in rgb.iter_mut().enumerate() {
        *out = (RAMP[lo][c] + (RAMP[hi][c] - RAMP[lo][c]) * frac).round() as u8;
    }
    Rgb(rgb)
}

/// Render a grid to an image; NaN cells are grey.
///
/// Colours span the finite minimum to maximum of the grid.
pub fn render_grid(values: &DMatrix<f64>) -> RgbImage {
    let finite = values.iter().copied().filter(|v| v.is_finite());
    let (min, max) = finite.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    let span = max - min;

    let width = (values.ncols() as u32).max(1) * CELL;
    let height = (values.nrows() as u32).max(1) * CELL;
    RgbImage::from_fn(width, height, |x, y| {
        let (r, c) = ((y / CELL) as usize, (x / CELL) as usize);
        match values.get((r, c)) {
            Some(v) if v.is_finite() => {
                let t = if span > 0.0 { (v - min) / span } else { 0.5 };
                colormap(t)
            }
            _ => MISSING,
        }
    })
}

/// Render and save a grid as PNG, creating parent directories.
pub fn save_heatmap(values: &DMatrix<f64>, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    render_grid(values).save(path)?;
    Ok(())
}
