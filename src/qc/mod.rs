//! Quality-control reports: acquisition summary and plate heatmaps.

mod heatmap;
mod render;
mod summary;

pub use heatmap::{
    cell_count_grid, correlation_heatmaps, parse_well, plate_grid, position_effect,
    well_correlations, well_means, WellGroups, NULL_PERCENTILE,
};
pub use render::{colormap, render_grid, save_heatmap};
pub use summary::{summarize_load_data, upsert_summary, PlateSummary, SUMMARY_COLUMNS};

use crate::config::Level;
use crate::error::Result;
use crate::paths::{ProfileStage, ProjectLayout, Variant};
use std::path::PathBuf;

/// Levels searched for a negcon feature-selected profile, best first.
pub const NEGCON_PREFERENCE: [Level; 3] = [Level::All, Level::Batch, Level::Plate];

/// The most pooled negcon feature-selected profile of a plate that exists.
pub fn preferred_negcon_profile(
    layout: &ProjectLayout,
    batch: &str,
    plate: &str,
) -> Result<Option<(Level, PathBuf)>> {
    for level in NEGCON_PREFERENCE {
        let path = layout.profile(batch, plate, ProfileStage::FeatureSelected(Variant::NEGCON, level))?;
        if path.is_file() {
            return Ok(Some((level, path)));
        }
    }
    Ok(None)
}
