//! Configuration loading.
//!
//! A configuration file is a multi-document YAML stream: the document that
//! carries a `pipeline` key holds the stage options, and every other
//! document describes one batch and its plates.
//!
//! ```yaml
//! pipeline: cell-painting
//! output_dir: profiles
//! platemap_well_column: Metadata_well_position
//! normalize:
//!   perform: true
//!   method: mad_robustize
//! ---
//! batch: 2021_04_26_Batch1
//! process: true
//! plates:
//!   - name: BR00121331
//!     process: true
//! ```

mod batches;
mod pipeline;

pub use batches::{Batch, BatchDocument, Plate, PlateDocument, ProfileConfig};
pub use pipeline::{
    AggregateConfig, AggregateMethod, AnnotateConfig, ExternalMetadataConfig, FeatureSelectConfig,
    FeatureSpec, HeatmapConfig, Level, NormalizeConfig, NormalizeMethod, Operation,
    PipelineConfig, PipelineOptions, QualityControlConfig, SummaryConfig,
    CANONICAL_COMPARTMENTS, NEGCON_SAMPLES,
};

use crate::error::{ProfilingError, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

/// Key identifying the pipeline document.
const PIPELINE_MARKER: &str = "pipeline";

/// Load a configuration file.
pub fn load_config(path: &Path) -> Result<(PipelineConfig, ProfileConfig)> {
    let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ProfilingError::MissingArtifact(path.to_path_buf()),
        _ => ProfilingError::Io(e),
    })?;
    load_config_str(&text)
}

/// Parse configuration text.
///
/// Batches and plates with `process: false` are dropped. A processed batch
/// left without plates, a repeated batch name, or a missing or repeated
/// pipeline document is an error.
pub fn load_config_str(text: &str) -> Result<(PipelineConfig, ProfileConfig)> {
    let mut pipeline: Option<PipelineConfig> = None;
    let mut profile_config = ProfileConfig::default();

    for document in serde_yaml::Deserializer::from_str(text) {
        let value = serde_yaml::Value::deserialize(document)?;
        if value.is_null() {
            continue;
        }

        let is_pipeline = value
            .as_mapping()
            .map(|m| m.contains_key(PIPELINE_MARKER))
            .unwrap_or(false);

        if is_pipeline {
            if pipeline.is_some() {
                return Err(ProfilingError::Config(
                    "More than one pipeline document".to_string(),
                ));
            }
            pipeline = Some(serde_yaml::from_value(value)?);
            continue;
        }

        let doc: BatchDocument = serde_yaml::from_value(value)?;
        if !doc.process {
            debug!(batch = %doc.batch, "batch marked process: false, skipping");
            continue;
        }
        if profile_config.batch(&doc.batch).is_some() {
            return Err(ProfilingError::Config(format!(
                "Batch '{}' is listed more than once",
                doc.batch
            )));
        }

        let plates: Vec<Plate> = doc
            .plates
            .into_iter()
            .filter(|p| p.process)
            .map(|p| Plate {
                name: p.name,
                cell_line: p.cell_line,
            })
            .collect();
        if plates.is_empty() {
            return Err(ProfilingError::EmptyPlateList(doc.batch));
        }

        profile_config.batches.push(Batch {
            name: doc.batch,
            plates,
        });
    }

    let pipeline = pipeline.ok_or(ProfilingError::MissingPipeline)?;
    Ok((pipeline, profile_config))
}
