//! Typed pipeline options: one optional section per stage.

use crate::data::{Compression, FloatFormat, OutputOptions};
use crate::error::Result;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;

/// Compartments CellProfiler measures by default.
pub const CANONICAL_COMPARTMENTS: [&str; 3] = ["cells", "cytoplasm", "nuclei"];

/// Default sample predicate for negative-control normalization.
pub const NEGCON_SAMPLES: &str = "Metadata_control_type == 'negcon'";

/// The pipeline document of a configuration file.
///
/// Stage sections are optional; an absent section is a disabled stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name (the marker key of the document).
    pub pipeline: String,
    /// Root directory of per-batch, per-plate outputs.
    pub output_dir: PathBuf,
    #[serde(default = "default_compartments", deserialize_with = "comma_or_list")]
    pub compartments: Vec<String>,
    /// Well column of the platemap, after `Metadata_` prefixing.
    pub platemap_well_column: String,
    #[serde(default)]
    pub options: PipelineOptions,
    #[serde(default)]
    pub aggregate: Option<AggregateConfig>,
    #[serde(default)]
    pub annotate: Option<AnnotateConfig>,
    #[serde(default)]
    pub normalize: Option<NormalizeConfig>,
    #[serde(default)]
    pub normalize_negcon: Option<NormalizeConfig>,
    #[serde(default)]
    pub feature_select: Option<FeatureSelectConfig>,
    #[serde(default)]
    pub feature_select_negcon: Option<FeatureSelectConfig>,
    #[serde(default)]
    pub quality_control: Option<QualityControlConfig>,
}

impl PipelineConfig {
    /// Configured compartments outside the canonical set, lower-cased.
    pub fn noncanonical_compartments(&self) -> Vec<String> {
        self.compartments
            .iter()
            .map(|c| c.to_lowercase())
            .filter(|c| !CANONICAL_COMPARTMENTS.contains(&c.as_str()))
            .collect()
    }

    pub fn is_noncanonical(&self) -> bool {
        !self.noncanonical_compartments().is_empty()
    }

    pub fn aggregate_enabled(&self) -> Option<&AggregateConfig> {
        self.aggregate.as_ref().filter(|s| s.perform)
    }

    pub fn annotate_enabled(&self) -> Option<&AnnotateConfig> {
        self.annotate.as_ref().filter(|s| s.perform)
    }

    pub fn normalize_enabled(&self) -> Option<&NormalizeConfig> {
        self.normalize.as_ref().filter(|s| s.perform)
    }

    pub fn normalize_negcon_enabled(&self) -> Option<&NormalizeConfig> {
        self.normalize_negcon.as_ref().filter(|s| s.perform)
    }

    pub fn feature_select_enabled(&self) -> Option<&FeatureSelectConfig> {
        self.feature_select.as_ref().filter(|s| s.perform)
    }

    pub fn feature_select_negcon_enabled(&self) -> Option<&FeatureSelectConfig> {
        self.feature_select_negcon.as_ref().filter(|s| s.perform)
    }

    pub fn quality_control_enabled(&self) -> Option<&QualityControlConfig> {
        self.quality_control.as_ref().filter(|s| s.perform)
    }

    /// Resolve compression and float format for written profiles.
    pub fn output_options(&self) -> Result<OutputOptions> {
        let float_format = self
            .options
            .float_format
            .as_deref()
            .map(FloatFormat::parse)
            .transpose()?;
        Ok(OutputOptions {
            compression: self.options.compression,
            float_format,
        })
    }
}

/// Global options shared by all stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOptions {
    #[serde(default)]
    pub compression: Compression,
    /// printf-style format such as `%.5g`; unset writes full precision.
    #[serde(default)]
    pub float_format: Option<String>,
    /// Sample predicate for the main normalization.
    #[serde(default = "default_samples")]
    pub samples: String,
    /// Recompute stages whose output already exists.
    #[serde(default = "default_true")]
    pub overwrite: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            compression: Compression::None,
            float_format: None,
            samples: default_samples(),
            overwrite: true,
        }
    }
}

/// Which measurement columns a stage works on.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "FeatureSpecRepr", into = "FeatureSpecRepr")]
pub enum FeatureSpec {
    /// Resolve from the loaded table's column prefixes.
    #[default]
    Infer,
    /// Use exactly these columns.
    Explicit(Vec<String>),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum FeatureSpecRepr {
    Keyword(String),
    List(Vec<String>),
}

impl From<FeatureSpec> for FeatureSpecRepr {
    fn from(value: FeatureSpec) -> Self {
        match value {
            FeatureSpec::Infer => FeatureSpecRepr::Keyword("infer".to_string()),
            FeatureSpec::Explicit(list) => FeatureSpecRepr::List(list),
        }
    }
}

impl TryFrom<FeatureSpecRepr> for FeatureSpec {
    type Error = String;

    fn try_from(value: FeatureSpecRepr) -> std::result::Result<Self, Self::Error> {
        match value {
            FeatureSpecRepr::Keyword(k) if k == "infer" => Ok(Self::Infer),
            FeatureSpecRepr::Keyword(k) => Err(format!(
                "features must be 'infer' or a list of column names, got '{}'",
                k
            )),
            FeatureSpecRepr::List(list) => Ok(Self::Explicit(list)),
        }
    }
}

/// Reduction applied to single cells within a well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateMethod {
    #[default]
    Median,
    Mean,
}

/// Options for the aggregate stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateConfig {
    pub perform: bool,
    pub plate_column: String,
    pub well_column: String,
    #[serde(default)]
    pub site_column: Option<String>,
    #[serde(default)]
    pub method: AggregateMethod,
    #[serde(default)]
    pub features: FeatureSpec,
    /// Sites to keep, as a list or comma-separated string; unset keeps all.
    #[serde(default, deserialize_with = "optional_fields")]
    pub fields: Option<Vec<i64>>,
    #[serde(default = "default_object_feature")]
    pub object_feature: String,
    #[serde(default = "default_image_table")]
    pub image_table: String,
    /// Directory holding `<batch>/<plate>/<plate>.sqlite`, relative to the project root.
    #[serde(default = "default_backend_dir")]
    pub backend_dir: PathBuf,
}

/// Options for the annotate stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotateConfig {
    pub perform: bool,
    pub well_column: String,
    #[serde(default)]
    pub external: Option<ExternalMetadataConfig>,
}

/// External metadata merged during annotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalMetadataConfig {
    pub perform: bool,
    pub file: String,
    pub merge_column: String,
}

/// Normalization method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizeMethod {
    Standardize,
    Robustize,
    #[default]
    MadRobustize,
}

/// Options for a normalize stage (`normalize` or `normalize_negcon`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizeConfig {
    pub perform: bool,
    #[serde(default)]
    pub method: NormalizeMethod,
    #[serde(default)]
    pub features: FeatureSpec,
    #[serde(default = "default_fudge_factor")]
    pub mad_robustize_fudge_factor: f64,
    #[serde(default)]
    pub image_features: bool,
    /// Overrides the stage's default sample predicate.
    #[serde(default)]
    pub samples: Option<String>,
    /// Minimum object count for a row to contribute to the statistics.
    #[serde(default)]
    pub min_cell_count: Option<f64>,
    #[serde(default = "default_count_column")]
    pub count_column: String,
    /// Normalize each value of this column independently as well.
    #[serde(default)]
    pub subgroup: Option<String>,
}

/// Aggregation level for feature selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    #[default]
    Plate,
    Batch,
    All,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Plate => "plate",
            Level::Batch => "batch",
            Level::All => "all",
        }
    }
}

/// A feature-selection operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    VarianceThreshold,
    CorrelationThreshold,
    DropNaColumns,
    Blocklist,
}

/// Options for a feature-select stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSelectConfig {
    pub perform: bool,
    #[serde(default)]
    pub features: FeatureSpec,
    #[serde(default)]
    pub level: Level,
    #[serde(default)]
    pub gct: bool,
    #[serde(default)]
    pub image_features: bool,
    pub operations: Vec<Operation>,
    #[serde(default = "default_freq_cut")]
    pub freq_cut: f64,
    #[serde(default = "default_unique_cut")]
    pub unique_cut: f64,
    #[serde(default = "default_corr_threshold")]
    pub corr_threshold: f64,
    #[serde(default = "default_na_cutoff")]
    pub na_cutoff: f64,
    /// One feature name per line; the built-in list is used when unset.
    #[serde(default)]
    pub blocklist_file: Option<PathBuf>,
    /// Column used to split batch/all-level results back into plates.
    #[serde(default = "default_plate_column")]
    pub plate_column: String,
}

/// Options for the quality-control stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityControlConfig {
    pub perform: bool,
    #[serde(default)]
    pub summary: Option<SummaryConfig>,
    #[serde(default)]
    pub heatmap: Option<HeatmapConfig>,
}

impl QualityControlConfig {
    pub fn summary_enabled(&self) -> Option<&SummaryConfig> {
        self.summary.as_ref().filter(|s| s.perform)
    }

    pub fn heatmap_enabled(&self) -> Option<&HeatmapConfig> {
        self.heatmap.as_ref().filter(|s| s.perform)
    }
}

/// Load-data summary options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryConfig {
    pub perform: bool,
    #[serde(default = "default_well_column")]
    pub well_column: String,
    #[serde(default = "default_site_column")]
    pub site_column: String,
}

/// Heatmap options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeatmapConfig {
    pub perform: bool,
    #[serde(default = "default_well_column")]
    pub well_column: String,
    #[serde(default = "default_count_column")]
    pub count_column: String,
}

fn default_compartments() -> Vec<String> {
    CANONICAL_COMPARTMENTS.iter().map(|c| c.to_string()).collect()
}

fn default_samples() -> String {
    "all".to_string()
}

fn default_true() -> bool {
    true
}

fn default_object_feature() -> String {
    "ObjectNumber".to_string()
}

fn default_image_table() -> String {
    "Image".to_string()
}

fn default_backend_dir() -> PathBuf {
    PathBuf::from("../../backend")
}

fn default_fudge_factor() -> f64 {
    1e-18
}

fn default_count_column() -> String {
    "Metadata_Object_Count".to_string()
}

fn default_freq_cut() -> f64 {
    0.05
}

fn default_unique_cut() -> f64 {
    0.01
}

fn default_corr_threshold() -> f64 {
    0.9
}

fn default_na_cutoff() -> f64 {
    0.05
}

fn default_plate_column() -> String {
    "Metadata_Plate".to_string()
}

fn default_well_column() -> String {
    "Metadata_Well".to_string()
}

fn default_site_column() -> String {
    "Metadata_Site".to_string()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CommaOrList<T> {
    Comma(String),
    List(Vec<T>),
}

/// Accept either `a,b,c` or a YAML list.
fn comma_or_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match CommaOrList::<String>::deserialize(deserializer)? {
        CommaOrList::Comma(s) => s
            .split(',')
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect(),
        CommaOrList::List(list) => list,
    })
}

/// `fields`: `all`, `"1,2,3"`, or a list of site numbers.
fn optional_fields<'de, D>(deserializer: D) -> std::result::Result<Option<Vec<i64>>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match Option::<CommaOrList<i64>>::deserialize(deserializer)? {
        None => Ok(None),
        Some(CommaOrList::Comma(s)) if s.trim() == "all" => Ok(None),
        Some(CommaOrList::Comma(s)) => s
            .split(',')
            .map(|f| f.trim().parse::<i64>().map_err(D::Error::custom))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(Some),
        Some(CommaOrList::List(list)) => Ok(Some(list)),
    }
}
