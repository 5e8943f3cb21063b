//! GCT 1.3 output: a transposed profile with features as rows.
//!
//! ```text
//! #1.3
//! <n_features> <n_samples> 1 <n_metadata>
//! id                 cp_feature_name  SAMPLE_0  SAMPLE_1 ...
//! <metadata name>    na               <value>   <value>
//! <feature name>     <feature name>   <value>   <value>
//! ```
//! Fields are tab-separated.

use crate::data::format::{format_value, Compression, FloatFormat};
use crate::data::io::{finish_csv, open_writer};
use crate::data::Profile;
use crate::error::Result;
use std::path::Path;

const VERSION: &str = "#1.3";
const MISSING: &str = "na";

/// Write `profile` as a GCT file.
pub fn write_gct(profile: &Profile, path: &Path, float_format: Option<&FloatFormat>) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .from_writer(open_writer(path, Compression::None)?);

    let n_samples = profile.n_rows();
    writer.write_record([VERSION])?;
    writer.write_record([
        profile.n_features().to_string(),
        n_samples.to_string(),
        "1".to_string(),
        profile.metadata_names().len().to_string(),
    ])?;

    let mut header = vec!["id".to_string(), "cp_feature_name".to_string()];
    header.extend((0..n_samples).map(|i| format!("SAMPLE_{}", i)));
    writer.write_record(&header)?;

    for (j, name) in profile.metadata_names().iter().enumerate() {
        let mut record = vec![name.clone(), MISSING.to_string()];
        record.extend((0..n_samples).map(|r| profile.metadata_row(r)[j].clone()));
        writer.write_record(&record)?;
    }

    for (j, name) in profile.feature_names().iter().enumerate() {
        let mut record = vec![name.clone(), name.clone()];
        record.extend(profile.features().column(j).iter().map(|&v| {
            if v.is_nan() {
                "NaN".to_string()
            } else {
                format_value(v, float_format)
            }
        }));
        writer.write_record(&record)?;
    }

    finish_csv(writer)
}
