//! Image-Based Cell Profiling Pipeline
//!
//! This library turns single-cell measurements from cell painting plates
//! into well-level profiles, driven by a YAML configuration file.
//!
//! # Overview
//!
//! The library is organized into stage modules:
//!
//! - **config**: Configuration loading (pipeline options, batches and plates)
//! - **paths**: Project filesystem layout
//! - **data**: Profiles, tables and compressed CSV I/O
//! - **aggregate**: Single-cell store access and per-well aggregation
//! - **annotate**: Platemap and external metadata joins
//! - **normalize**: Standardize / robustize / MAD-robustize against a sample subset
//! - **select**: Feature selection operations and pooled levels
//! - **qc**: Acquisition summary and plate heatmaps
//! - **pipeline**: Stage runner and end-to-end driver
//!
//! # Example
//!
//! ```no_run
//! use cell_profiling::prelude::*;
//! use std::path::Path;
//!
//! let (pipeline, profiles) = load_config(Path::new("config.yml")).unwrap();
//! let runner = RunPipeline::new(pipeline, profiles, ".").unwrap();
//! let report = run_pipeline(&runner).unwrap();
//! println!("{} files written", report.written.len());
//! ```

pub mod aggregate;
pub mod annotate;
pub mod config;
pub mod data;
pub mod error;
pub mod features;
pub mod gct;
pub mod normalize;
pub mod paths;
pub mod pipeline;
pub mod qc;
pub mod select;
pub mod stats;

/// Convenient re-exports for common usage.
pub mod prelude {
    pub use crate::aggregate::{
        aggregate_profiles, AggregateRequest, LinkingColumns, SingleCellStore, SqliteStore,
    };
    pub use crate::annotate::{annotate, AnnotateRequest, ExternalMetadata};
    pub use crate::config::{
        load_config, load_config_str, AggregateMethod, Level, NormalizeMethod, Operation,
        PipelineConfig, ProfileConfig,
    };
    pub use crate::data::{Compression, FloatFormat, OutputOptions, Profile, Table};
    pub use crate::error::{ProfilingError, Result};
    pub use crate::normalize::{normalize, normalize_by_subgroup, NormalizeRequest, SampleSelection};
    pub use crate::paths::{ProfileStage, ProjectLayout, Variant};
    pub use crate::pipeline::{run_pipeline, Outcome, RunPipeline, RunReport};
    pub use crate::select::{feature_select, SelectRequest};
}
