//! Path construction for every pipeline artifact.
//!
//! All locations are derived from a project root, the configured output
//! directory and batch/plate identifiers. Per-plate artifacts always live
//! in `<root>/<output_dir>/<batch>/<plate>/` and are told apart by suffix.

use crate::config::Level;
use crate::error::{ProfilingError, Result};
use std::path::{Path, PathBuf};

const PROFILE_EXTENSION: &str = "csv.gz";

/// Which of the normalization outputs a file derives from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Variant {
    /// Statistics from negative-control wells only.
    pub negcon: bool,
    /// Normalized per subgroup.
    pub subgroup: bool,
}

impl Variant {
    pub const ALL_SAMPLES: Variant = Variant {
        negcon: false,
        subgroup: false,
    };
    pub const NEGCON: Variant = Variant {
        negcon: true,
        subgroup: false,
    };

    pub fn with_subgroup(self) -> Variant {
        Variant {
            subgroup: true,
            ..self
        }
    }

    /// File-name suffix, e.g. `_negcon_subgroup`.
    pub fn suffix(&self) -> String {
        let mut s = String::new();
        if self.negcon {
            s.push_str("_negcon");
        }
        if self.subgroup {
            s.push_str("_subgroup");
        }
        s
    }
}

/// Version of a plate profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileStage {
    Aggregated,
    Augmented,
    Normalized(Variant),
    FeatureSelected(Variant, Level),
}

impl ProfileStage {
    /// Suffix appended to the plate name.
    pub fn suffix(&self) -> String {
        match self {
            ProfileStage::Aggregated => String::new(),
            ProfileStage::Augmented => "_augmented".to_string(),
            ProfileStage::Normalized(v) => format!("_normalized{}", v.suffix()),
            ProfileStage::FeatureSelected(v, level) => {
                format!("_normalized_feature_select{}_{}", v.suffix(), level.as_str())
            }
        }
    }
}

/// Quality-control heatmap kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeatmapKind {
    CellCount,
    Correlation,
    PositionEffect,
}

impl HeatmapKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HeatmapKind::CellCount => "cell_count",
            HeatmapKind::Correlation => "correlation",
            HeatmapKind::PositionEffect => "position_effect",
        }
    }
}

/// Directory layout of a profiling project.
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    root: PathBuf,
    output_dir: PathBuf,
    backend_dir: PathBuf,
}

impl ProjectLayout {
    /// Layout rooted at `root`; `output_dir` and `backend_dir` are relative to it
    /// unless absolute.
    pub fn new<P: AsRef<Path>>(root: P, output_dir: &Path, backend_dir: &Path) -> Self {
        let root = root.as_ref().to_path_buf();
        Self {
            output_dir: root.join(output_dir),
            backend_dir: root.join(backend_dir),
            root,
        }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// `<output_dir>/<batch>/<plate>`
    pub fn plate_dir(&self, batch: &str, plate: &str) -> Result<PathBuf> {
        Ok(self
            .output_dir
            .join(checked_component(batch)?)
            .join(checked_component(plate)?))
    }

    /// `<plate_dir>/<plate><suffix>.csv.gz`
    pub fn profile(&self, batch: &str, plate: &str, stage: ProfileStage) -> Result<PathBuf> {
        Ok(self.plate_dir(batch, plate)?.join(format!(
            "{}{}.{}",
            plate,
            stage.suffix(),
            PROFILE_EXTENSION
        )))
    }

    fn platemap_dir(&self, batch: &str) -> Result<PathBuf> {
        Ok(self
            .root
            .join("metadata")
            .join("platemaps")
            .join(checked_component(batch)?))
    }

    /// `metadata/platemaps/<batch>/barcode_platemap.csv`
    pub fn barcode_platemap(&self, batch: &str) -> Result<PathBuf> {
        Ok(self.platemap_dir(batch)?.join("barcode_platemap.csv"))
    }

    /// `metadata/platemaps/<batch>/platemap/<name>.txt`
    pub fn platemap(&self, batch: &str, name: &str) -> Result<PathBuf> {
        Ok(self
            .platemap_dir(batch)?
            .join("platemap")
            .join(format!("{}.txt", checked_component(name)?)))
    }

    /// `metadata/external_metadata/<file>`
    pub fn external_metadata(&self, file: &str) -> Result<PathBuf> {
        Ok(self
            .root
            .join("metadata")
            .join("external_metadata")
            .join(checked_component(file)?))
    }

    /// SQLite file of a plate's single-cell measurements.
    pub fn sqlite_file(&self, batch: &str, plate: &str) -> Result<PathBuf> {
        Ok(self
            .backend_dir
            .join(checked_component(batch)?)
            .join(checked_component(plate)?)
            .join(format!("{}.sqlite", plate)))
    }

    /// Connection string for a plate's single-cell store.
    pub fn sqlite_connection(&self, batch: &str, plate: &str) -> Result<String> {
        Ok(format!(
            "sqlite:///{}",
            self.sqlite_file(batch, plate)?.display()
        ))
    }

    /// Candidate load-data files of a plate, compressed first.
    pub fn load_data(&self, batch: &str, plate: &str) -> Result<[PathBuf; 2]> {
        let dir = self
            .root
            .join("load_data_csv")
            .join(checked_component(batch)?)
            .join(checked_component(plate)?);
        Ok([dir.join("load_data.csv.gz"), dir.join("load_data.csv")])
    }

    /// `gct/<batch>`
    pub fn gct_dir(&self, batch: &str) -> Result<PathBuf> {
        Ok(self.root.join("gct").join(checked_component(batch)?))
    }

    fn gct_stem(&self, batch: &str, variant: Variant, level: Level) -> Result<PathBuf> {
        Ok(self.gct_dir(batch)?.join(format!(
            "{}_normalized_feature_select{}_{}",
            batch,
            variant.suffix(),
            level.as_str()
        )))
    }

    /// `gct/<batch>/<batch>_normalized_feature_select<variant>_<level>.gct`
    pub fn gct(&self, batch: &str, variant: Variant, level: Level) -> Result<PathBuf> {
        Ok(self.gct_stem(batch, variant, level)?.with_extension("gct"))
    }

    /// Stacked CSV written next to the GCT file.
    pub fn gct_stacked(&self, batch: &str, variant: Variant, level: Level) -> Result<PathBuf> {
        Ok(self
            .gct_stem(batch, variant, level)?
            .with_extension(PROFILE_EXTENSION))
    }

    /// `quality_control/summary/summary.tsv`
    pub fn summary(&self) -> PathBuf {
        self.root
            .join("quality_control")
            .join("summary")
            .join("summary.tsv")
    }

    /// `quality_control/heatmap/<batch>/<plate>/<plate>_<kind>.png`
    pub fn heatmap(&self, batch: &str, plate: &str, kind: HeatmapKind) -> Result<PathBuf> {
        Ok(self
            .root
            .join("quality_control")
            .join("heatmap")
            .join(checked_component(batch)?)
            .join(checked_component(plate)?)
            .join(format!("{}_{}.png", plate, kind.as_str())))
    }
}

/// Reject identifiers that would escape their directory.
fn checked_component(name: &str) -> Result<&str> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\');
    if bad {
        return Err(ProfilingError::InvalidParameter(format!(
            "'{}' is not a valid batch, plate or file name",
            name
        )));
    }
    Ok(name)
}
