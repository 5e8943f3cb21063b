//! Per-plate acquisition summary from load-data files.

use crate::data::format::{format_value, Compression};
use crate::data::Table;
use crate::error::Result;
use crate::stats::{mean_abs_deviation, nan_median};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::debug;

/// Columns of `summary.tsv`, keyed by the first two.
pub const SUMMARY_COLUMNS: [&str; 6] = [
    "Batch_Name",
    "Plate_Name",
    "Well_Count",
    "Images_per_Site",
    "Site_Count_Median",
    "Site_Count_MAD",
];

const FILE_NAME_PREFIX: &str = "FileName_";

/// Summary of one plate's image acquisition.
#[derive(Debug, Clone, PartialEq)]
pub struct PlateSummary {
    pub batch: String,
    pub plate: String,
    /// Distinct wells imaged.
    pub well_count: usize,
    /// Channels per site (`FileName_*` columns).
    pub images_per_site: usize,
    pub site_count_median: f64,
    /// Mean absolute deviation of the per-well site counts.
    pub site_count_mad: f64,
}

impl PlateSummary {
    fn to_row(&self) -> Vec<String> {
        vec![
            self.batch.clone(),
            self.plate.clone(),
            self.well_count.to_string(),
            self.images_per_site.to_string(),
            format_value(self.site_count_median, None),
            format_value(self.site_count_mad, None),
        ]
    }
}

/// Summarise a load-data table.
///
/// Sites are counted per well as distinct values of `site_column`, or as
/// rows when the column is absent.
pub fn summarize_load_data(
    load_data: &Table,
    batch: &str,
    plate: &str,
    well_column: &str,
    site_column: &str,
) -> Result<PlateSummary> {
    let wells = load_data.column(well_column)?;
    let sites = load_data.column(site_column).ok();

    let mut per_well: BTreeMap<&str, BTreeSet<String>> = BTreeMap::new();
    for (i, &well) in wells.iter().enumerate() {
        let site = match &sites {
            Some(sites) => sites[i].to_string(),
            None => i.to_string(),
        };
        per_well.entry(well).or_default().insert(site);
    }

    let counts: Vec<f64> = per_well.values().map(|s| s.len() as f64).collect();
    let images_per_site = load_data
        .columns()
        .iter()
        .filter(|c| c.starts_with(FILE_NAME_PREFIX))
        .count();

    debug!(batch, plate, wells = per_well.len(), "summarised load data");
    Ok(PlateSummary {
        batch: batch.to_string(),
        plate: plate.to_string(),
        well_count: per_well.len(),
        images_per_site,
        site_count_median: nan_median(&counts),
        site_count_mad: mean_abs_deviation(&counts),
    })
}

/// Write `summary` into the TSV at `path`, replacing any earlier row for
/// the same (batch, plate).
pub fn upsert_summary(path: &Path, summary: &PlateSummary) -> Result<()> {
    let mut table = if path.is_file() {
        Table::from_path(path, b'\t')?
    } else {
        Table::new(SUMMARY_COLUMNS.iter().map(|c| c.to_string()).collect(), Vec::new())?
    };

    let batch_idx = table.column_index(SUMMARY_COLUMNS[0])?;
    let plate_idx = table.column_index(SUMMARY_COLUMNS[1])?;
    table.retain_rows(|row| !(row[batch_idx] == summary.batch && row[plate_idx] == summary.plate));
    table.push_row(summary.to_row())?;

    table.to_path(path, b'\t', Compression::None)
}
