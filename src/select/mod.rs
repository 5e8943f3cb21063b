//! Feature selection and the batch/all-level concat/split around it.

mod operations;

pub use operations::{
    blocklist, correlation_threshold, drop_na_columns, load_blocklist, parse_blocklist,
    variance_threshold,
};

use crate::config::Operation;
use crate::data::Profile;
use crate::error::{ProfilingError, Result};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

/// Preferred tag column identifying each row's batch while plates are pooled.
pub const BATCH_TAG: &str = "Metadata_batch";

/// Parameters of one feature selection.
#[derive(Debug, Clone)]
pub struct SelectRequest<'a> {
    pub features: &'a [String],
    pub operations: &'a [Operation],
    pub freq_cut: f64,
    pub unique_cut: f64,
    pub corr_threshold: f64,
    pub na_cutoff: f64,
    pub blocklist_file: Option<&'a Path>,
}

/// Names excluded by any of the requested operations, in feature order.
///
/// Every operation sees the same input.
pub fn excluded_features(profile: &Profile, request: &SelectRequest<'_>) -> Result<Vec<String>> {
    let mut excluded: HashSet<String> = HashSet::new();
    for op in request.operations {
        let dropped = match op {
            Operation::VarianceThreshold => variance_threshold(
                profile,
                request.features,
                request.freq_cut,
                request.unique_cut,
            )?,
            Operation::CorrelationThreshold => {
                correlation_threshold(profile, request.features, request.corr_threshold)?
            }
            Operation::DropNaColumns => {
                drop_na_columns(profile, request.features, request.na_cutoff)?
            }
            Operation::Blocklist => {
                blocklist(request.features, &load_blocklist(request.blocklist_file)?)
            }
        };
        debug!(operation = ?op, excluded = dropped.len(), "feature selection operation");
        excluded.extend(dropped);
    }

    Ok(request
        .features
        .iter()
        .filter(|f| excluded.contains(*f))
        .cloned()
        .collect())
}

/// Drop the excluded features; metadata and unlisted columns are kept.
pub fn feature_select(profile: &Profile, request: &SelectRequest<'_>) -> Result<Profile> {
    if profile.n_rows() == 0 {
        return Err(ProfilingError::EmptyData(
            "Cannot select features of an empty profile".to_string(),
        ));
    }
    let excluded = excluded_features(profile, request)?;
    debug!(
        features = request.features.len(),
        excluded = excluded.len(),
        "selected features"
    );
    Ok(profile.drop_features(&excluded))
}

/// Plates pooled into one profile, each row tagged with its batch.
#[derive(Debug, Clone)]
pub struct Pooled {
    pub profile: Profile,
    /// Metadata column holding the batch tag.
    pub tag: String,
}

/// [`BATCH_TAG`], or the first underscore-prefixed variant none of
/// `profiles` already carries.
fn free_tag(profiles: &[(&str, Profile)]) -> String {
    let mut tag = BATCH_TAG.to_string();
    while profiles.iter().any(|(_, p)| p.has_metadata(&tag)) {
        tag.insert(0, '_');
    }
    tag
}

/// Pool plate profiles into one, tagging every row with its batch.
///
/// Existing metadata is left untouched, including a column that already
/// uses the [`BATCH_TAG`] name.
pub fn concat_tagged<'a, I>(inputs: I) -> Result<Pooled>
where
    I: IntoIterator<Item = (&'a str, Profile)>,
{
    let inputs: Vec<(&str, Profile)> = inputs.into_iter().collect();
    let tag = free_tag(&inputs);

    let mut tagged = Vec::with_capacity(inputs.len());
    for (batch, mut profile) in inputs {
        let n = profile.n_rows();
        profile.insert_metadata(&tag, vec![batch.to_string(); n], true)?;
        tagged.push(profile);
    }
    Ok(Pooled {
        profile: Profile::concat(&tagged)?,
        tag,
    })
}

/// Split a pooled profile back into plates by (batch tag, `plate_column`).
///
/// Rows keep their pooled order; the tag column is removed. Keys come back
/// in first-seen order.
pub fn split_tagged(pooled: &Pooled, plate_column: &str) -> Result<Vec<((String, String), Profile)>> {
    let profile = &pooled.profile;
    let batches = profile.metadata_column(&pooled.tag)?;
    let plates = profile.metadata_column(plate_column)?;

    let mut keys: Vec<(String, String)> = Vec::new();
    let mut rows: Vec<Vec<usize>> = Vec::new();
    for (i, (batch, plate)) in batches.iter().zip(&plates).enumerate() {
        match keys.iter().position(|(b, p)| b == batch && p == plate) {
            Some(k) => rows[k].push(i),
            None => {
                keys.push((batch.to_string(), plate.to_string()));
                rows.push(vec![i]);
            }
        }
    }

    keys.into_iter()
        .zip(rows)
        .map(|(key, rows)| {
            let mut part = profile.select_rows(&rows);
            part.drop_metadata(&pooled.tag)?;
            Ok((key, part))
        })
        .collect()
}
