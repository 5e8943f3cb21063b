//! Annotation of aggregated profiles with plate-map and external metadata.

use crate::data::{Profile, Table, METADATA_PREFIX};
use crate::error::{ProfilingError, Result};
use std::collections::HashMap;
use tracing::debug;

/// Raw CellProfiler prefix of image-level metadata columns.
pub const CELLPROFILER_METADATA_PREFIX: &str = "Image_Metadata_";

/// Column added when a plate carries a cell-line tag.
pub const CELL_LINE_COLUMN: &str = "Metadata_cell_line";

const BARCODE_COLUMN: &str = "Assay_Plate_Barcode";
const PLATEMAP_NAME_COLUMN: &str = "Plate_Map_Name";

/// Rename `Image_Metadata_*` columns to `Metadata_*`.
pub fn clean_cellprofiler(profile: &mut Profile) {
    profile.rename_metadata(|name| match name.strip_prefix(CELLPROFILER_METADATA_PREFIX) {
        Some(rest) => format!("{}{}", METADATA_PREFIX, rest),
        None => name.to_string(),
    });
}

/// Prefix a column name with `Metadata_` unless it already is.
pub fn metadata_name(name: &str) -> String {
    if name.starts_with(METADATA_PREFIX) {
        name.to_string()
    } else {
        format!("{}{}", METADATA_PREFIX, name)
    }
}

/// Prefix every column of a metadata table with `Metadata_`.
pub fn prefix_metadata_columns(table: &mut Table) {
    table.rename_columns(metadata_name);
}

/// Find the platemap name of `plate` in a barcode → platemap table.
///
/// Exactly one row must match.
pub fn lookup_platemap_name(barcodes: &Table, batch: &str, plate: &str) -> Result<String> {
    let name_idx = barcodes.column_index(PLATEMAP_NAME_COLUMN)?;
    let matches = barcodes.filter_eq(BARCODE_COLUMN, plate)?;
    if matches.len() != 1 {
        return Err(ProfilingError::PlatemapLookup {
            batch: batch.to_string(),
            plate: plate.to_string(),
            found: matches.len(),
        });
    }
    Ok(matches[0][name_idx].clone())
}

/// External metadata left-joined on a shared column.
#[derive(Debug, Clone, Copy)]
pub struct ExternalMetadata<'a> {
    /// Table with `Metadata_`-prefixed columns.
    pub table: &'a Table,
    pub merge_column: &'a str,
}

/// Everything an annotation joins onto a profile.
#[derive(Debug, Clone, Copy)]
pub struct AnnotateRequest<'a> {
    /// Platemap with `Metadata_`-prefixed columns.
    pub platemap: &'a Table,
    /// Name of the platemap, for error messages.
    pub platemap_name: &'a str,
    pub platemap_well_column: &'a str,
    /// Well column of the profile after cleaning.
    pub well_column: &'a str,
    pub external: Option<ExternalMetadata<'a>>,
    pub cell_line: Option<&'a str>,
}

/// Join plate-map (and optional external) metadata onto a profile.
///
/// Every profile well must match exactly one platemap row. Output metadata
/// columns are ordered platemap, external, then the profile's own; features
/// are unchanged.
pub fn annotate(profile: &Profile, request: &AnnotateRequest<'_>) -> Result<Profile> {
    let mut profile = profile.clone();
    clean_cellprofiler(&mut profile);

    let platemap = request.platemap;
    let platemap_well = platemap.column_index(request.platemap_well_column)?;
    let mut wells: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, row) in platemap.rows().iter().enumerate() {
        wells.entry(row[platemap_well].as_str()).or_default().push(i);
    }

    let profile_wells = profile.metadata_column(request.well_column)?;
    let mut platemap_rows = Vec::with_capacity(profile.n_rows());
    for well in &profile_wells {
        match wells.get(well).map(Vec::as_slice) {
            Some([row]) => platemap_rows.push(*row),
            other => {
                return Err(ProfilingError::WellLookup {
                    well: well.to_string(),
                    platemap: request.platemap_name.to_string(),
                    found: other.map_or(0, <[usize]>::len),
                })
            }
        }
    }

    // Platemap columns first.
    let mut names: Vec<String> = platemap.columns().to_vec();
    let mut metadata: Vec<Vec<String>> = platemap_rows
        .iter()
        .map(|&r| platemap.rows()[r].clone())
        .collect();

    if let Some(external) = request.external {
        join_external(&mut names, &mut metadata, &external)?;
    }

    // Then the profile's own metadata. The well column duplicates the join key.
    for (j, name) in profile.metadata_names().iter().enumerate() {
        if name == request.well_column && names.contains(name) {
            continue;
        }
        if names.contains(name) {
            return Err(ProfilingError::InvalidParameter(format!(
                "Column '{}' is present in both the profile and the platemap",
                name
            )));
        }
        names.push(name.clone());
        for (row, values) in metadata.iter_mut().enumerate() {
            values.push(profile.metadata_row(row)[j].clone());
        }
    }

    if let Some(cell_line) = request.cell_line {
        if !names.iter().any(|n| n == CELL_LINE_COLUMN) {
            names.push(CELL_LINE_COLUMN.to_string());
            for values in &mut metadata {
                values.push(cell_line.to_string());
            }
        }
    }

    debug!(
        rows = profile.n_rows(),
        metadata_columns = names.len(),
        "annotated profile"
    );
    Profile::new(
        names,
        metadata,
        profile.feature_names().to_vec(),
        profile.features().clone(),
    )
}

/// Left join: unmatched rows get empty external values.
fn join_external(
    names: &mut Vec<String>,
    metadata: &mut [Vec<String>],
    external: &ExternalMetadata<'_>,
) -> Result<()> {
    let merge_column = metadata_name(external.merge_column);
    let key_idx = names
        .iter()
        .position(|n| *n == merge_column)
        .ok_or_else(|| ProfilingError::MissingColumn(merge_column.clone()))?;
    let index = external
        .table
        .unique_index(&merge_column, "external metadata")?;

    let added: Vec<usize> = external
        .table
        .columns()
        .iter()
        .enumerate()
        .filter(|(_, c)| !names.contains(c))
        .map(|(i, _)| i)
        .collect();
    names.extend(added.iter().map(|&i| external.table.columns()[i].clone()));

    for values in metadata.iter_mut() {
        let matched = index.get(values[key_idx].as_str()).map(|&r| &external.table.rows()[r]);
        for &i in &added {
            values.push(matched.map(|row| row[i].clone()).unwrap_or_default());
        }
    }
    Ok(())
}
