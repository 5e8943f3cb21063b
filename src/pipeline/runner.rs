//! Stage runner: one method per pipeline stage, each reading its
//! predecessor's output from disk and writing its own.

use crate::aggregate::{aggregate_profiles, AggregateRequest, LinkingColumns, SqliteStore};
use crate::annotate::{
    annotate, lookup_platemap_name, prefix_metadata_columns, AnnotateRequest, ExternalMetadata,
};
use crate::config::{
    FeatureSelectConfig, FeatureSpec, Level, NormalizeConfig, Plate, PipelineConfig,
    ProfileConfig, NEGCON_SAMPLES,
};
use crate::data::io::first_existing;
use crate::data::{OutputOptions, Profile, Table};
use crate::error::{ProfilingError, Result};
use crate::features::resolve_features;
use crate::gct::write_gct;
use crate::normalize::{normalize, normalize_by_subgroup, NormalizeRequest, SampleSelection};
use crate::paths::{HeatmapKind, ProfileStage, ProjectLayout, Variant};
use crate::qc::{
    cell_count_grid, correlation_heatmaps, preferred_negcon_profile, save_heatmap,
    summarize_load_data, upsert_summary,
};
use crate::select::{concat_tagged, feature_select, split_tagged, Pooled, SelectRequest};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// What a stage did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Files written, in order.
    Written(Vec<PathBuf>),
    /// Outputs already existed and overwriting is off.
    Skipped,
    /// The stage is absent from the configuration or has `perform: false`.
    Disabled,
}

impl Outcome {
    pub fn written(&self) -> &[PathBuf] {
        match self {
            Outcome::Written(paths) => paths,
            _ => &[],
        }
    }
}

/// Runs pipeline stages for the configured batches and plates.
#[derive(Debug, Clone)]
pub struct RunPipeline {
    pipeline: PipelineConfig,
    profiles: ProfileConfig,
    layout: ProjectLayout,
    output: OutputOptions,
}

impl RunPipeline {
    /// Create a runner whose paths are resolved against `root`.
    pub fn new<P: AsRef<Path>>(
        pipeline: PipelineConfig,
        profiles: ProfileConfig,
        root: P,
    ) -> Result<Self> {
        let backend_dir = pipeline
            .aggregate
            .as_ref()
            .map(|a| a.backend_dir.clone())
            .unwrap_or_else(|| PathBuf::from("../../backend"));
        let layout = ProjectLayout::new(root, &pipeline.output_dir, &backend_dir);
        let output = pipeline.output_options()?;
        Ok(Self {
            pipeline,
            profiles,
            layout,
            output,
        })
    }

    #[inline]
    pub fn pipeline(&self) -> &PipelineConfig {
        &self.pipeline
    }

    #[inline]
    pub fn profiles(&self) -> &ProfileConfig {
        &self.profiles
    }

    #[inline]
    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    /// Whether every path should be (re)computed.
    fn needs_run(&self, outputs: &[PathBuf]) -> bool {
        self.pipeline.options.overwrite || outputs.iter().any(|p| !p.is_file())
    }

    fn write_profile(&self, profile: &Profile, path: &Path) -> Result<()> {
        profile.to_csv(path, &self.output)?;
        debug!(path = %path.display(), rows = profile.n_rows(), features = profile.n_features(), "wrote profile");
        Ok(())
    }

    /// Create the per-plate output directory.
    pub fn create_directories(&self, batch: &str, plate: &str) -> Result<PathBuf> {
        let dir = self.layout.plate_dir(batch, plate)?;
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Aggregate a plate's single cells into `<plate>.csv.gz`.
    pub fn pipeline_aggregate(&self, batch: &str, plate: &Plate) -> Result<Outcome> {
        let Some(steps) = self.pipeline.aggregate_enabled() else {
            return Ok(Outcome::Disabled);
        };
        let output = self.layout.profile(batch, &plate.name, ProfileStage::Aggregated)?;
        if !self.needs_run(std::slice::from_ref(&output)) {
            info!(batch, plate = %plate.name, "aggregate output exists, skipping");
            return Ok(Outcome::Skipped);
        }
        info!(batch, plate = %plate.name, method = ?steps.method, "aggregating single cells");

        let store = SqliteStore::open(&self.layout.sqlite_connection(batch, &plate.name)?)?;
        let linking =
            LinkingColumns::for_compartments(&self.pipeline.compartments, &steps.object_feature);

        let mut strata = vec![steps.plate_column.clone(), steps.well_column.clone()];
        if let Some(site) = &steps.site_column {
            strata.push(site.clone());
        }
        let features = match &steps.features {
            FeatureSpec::Infer => None,
            FeatureSpec::Explicit(names) => Some(names.as_slice()),
        };
        let request = AggregateRequest {
            compartments: &self.pipeline.compartments,
            linking: &linking,
            image_table: &steps.image_table,
            strata,
            site_column: steps.site_column.as_deref(),
            fields: steps.fields.as_deref(),
            method: steps.method,
            features,
        };

        let profile = aggregate_profiles(&store, &request)?;
        self.write_profile(&profile, &output)?;
        Ok(Outcome::Written(vec![output]))
    }

    /// Annotate the aggregated profile with its platemap into `_augmented`.
    pub fn pipeline_annotate(&self, batch: &str, plate: &Plate) -> Result<Outcome> {
        let Some(steps) = self.pipeline.annotate_enabled() else {
            return Ok(Outcome::Disabled);
        };
        let output = self.layout.profile(batch, &plate.name, ProfileStage::Augmented)?;
        if !self.needs_run(std::slice::from_ref(&output)) {
            info!(batch, plate = %plate.name, "annotate output exists, skipping");
            return Ok(Outcome::Skipped);
        }
        info!(batch, plate = %plate.name, "annotating profile");

        let barcodes = Table::from_path(&self.layout.barcode_platemap(batch)?, b',')?;
        let platemap_name = lookup_platemap_name(&barcodes, batch, &plate.name)?;
        let mut platemap = Table::from_path(&self.layout.platemap(batch, &platemap_name)?, b'\t')?;
        prefix_metadata_columns(&mut platemap);

        let external_table = match steps.external.as_ref().filter(|e| e.perform) {
            Some(external) => {
                let mut table =
                    Table::from_path(&self.layout.external_metadata(&external.file)?, b'\t')?;
                prefix_metadata_columns(&mut table);
                Some((table, external.merge_column.as_str()))
            }
            None => None,
        };

        let request = AnnotateRequest {
            platemap: &platemap,
            platemap_name: &platemap_name,
            platemap_well_column: &self.pipeline.platemap_well_column,
            well_column: &steps.well_column,
            external: external_table.as_ref().map(|(table, merge_column)| ExternalMetadata {
                table,
                merge_column: *merge_column,
            }),
            cell_line: plate.cell_line.as_deref(),
        };

        let aggregated = Profile::from_csv(
            &self.layout.profile(batch, &plate.name, ProfileStage::Aggregated)?,
        )?;
        let profile = annotate(&aggregated, &request)?;
        self.write_profile(&profile, &output)?;
        Ok(Outcome::Written(vec![output]))
    }

    fn normalize_steps(&self, negcon: bool) -> Option<&NormalizeConfig> {
        if negcon {
            self.pipeline.normalize_negcon_enabled()
        } else {
            self.pipeline.normalize_enabled()
        }
    }

    /// Normalize the augmented profile into `_normalized{_negcon}` and,
    /// with a subgroup column, `_normalized{_negcon}_subgroup`.
    pub fn pipeline_normalize(&self, batch: &str, plate: &Plate, negcon: bool) -> Result<Outcome> {
        let Some(steps) = self.normalize_steps(negcon) else {
            return Ok(Outcome::Disabled);
        };
        let variant = if negcon { Variant::NEGCON } else { Variant::ALL_SAMPLES };

        let mut outputs = vec![self.layout.profile(batch, &plate.name, ProfileStage::Normalized(variant))?];
        if steps.subgroup.is_some() {
            outputs.push(self.layout.profile(
                batch,
                &plate.name,
                ProfileStage::Normalized(variant.with_subgroup()),
            )?);
        }
        if !self.needs_run(&outputs) {
            info!(batch, plate = %plate.name, negcon, "normalize outputs exist, skipping");
            return Ok(Outcome::Skipped);
        }

        let samples_text = match (&steps.samples, negcon) {
            (Some(samples), _) => samples.as_str(),
            (None, true) => NEGCON_SAMPLES,
            (None, false) => self.pipeline.options.samples.as_str(),
        };
        let mut samples = SampleSelection::parse(samples_text)?;
        if let Some(min) = steps.min_cell_count {
            samples = samples.with_min_count(&steps.count_column, min);
        }
        info!(batch, plate = %plate.name, method = ?steps.method, samples = samples_text, "normalizing profile");

        let augmented = Profile::from_csv(
            &self.layout.profile(batch, &plate.name, ProfileStage::Augmented)?,
        )?;
        let features = resolve_features(
            &steps.features,
            &augmented,
            &self.pipeline.compartments,
            steps.image_features,
        )?;
        let request = NormalizeRequest {
            features: &features,
            samples: &samples,
            method: steps.method,
            epsilon: steps.mad_robustize_fudge_factor,
        };

        self.write_profile(&normalize(&augmented, &request)?, &outputs[0])?;
        if let Some(subgroup) = &steps.subgroup {
            let grouped = normalize_by_subgroup(&augmented, subgroup, &request)?;
            self.write_profile(&grouped, &outputs[1])?;
        }
        Ok(Outcome::Written(outputs))
    }

    fn feature_select_steps(&self, negcon: bool) -> Option<&FeatureSelectConfig> {
        if negcon {
            self.pipeline.feature_select_negcon_enabled()
        } else {
            self.pipeline.feature_select_enabled()
        }
    }

    /// Normalized variants feature selection runs over.
    fn select_variants(&self, negcon: bool) -> Vec<Variant> {
        let base = if negcon { Variant::NEGCON } else { Variant::ALL_SAMPLES };
        let mut variants = vec![base];
        if self
            .normalize_steps(negcon)
            .map_or(false, |n| n.subgroup.is_some())
        {
            variants.push(base.with_subgroup());
        }
        variants
    }

    /// Feature-select every plate's normalized profile at the configured level.
    ///
    /// `batch` and `all` pool plates (tagged with their batch), select once
    /// and split the result back into per-plate files.
    pub fn pipeline_feature_select(&self, negcon: bool) -> Result<Outcome> {
        let Some(steps) = self.feature_select_steps(negcon) else {
            return Ok(Outcome::Disabled);
        };

        let mut written = Vec::new();
        let mut skipped = false;
        for variant in self.select_variants(negcon) {
            info!(level = steps.level.as_str(), variant = %variant.suffix(), "selecting features");
            let groups: Vec<Vec<(&str, &Plate)>> = match steps.level {
                Level::Plate => self
                    .profiles
                    .batches
                    .iter()
                    .flat_map(|b| b.plates.iter().map(move |p| vec![(b.name.as_str(), p)]))
                    .collect(),
                Level::Batch => self
                    .profiles
                    .batches
                    .iter()
                    .map(|b| b.plates.iter().map(|p| (b.name.as_str(), p)).collect())
                    .collect(),
                Level::All => vec![self
                    .profiles
                    .batches
                    .iter()
                    .flat_map(|b| b.plates.iter().map(move |p| (b.name.as_str(), p)))
                    .collect()],
            };

            for group in &groups {
                let paths = self.select_group(steps, variant, group)?;
                skipped |= paths.is_empty();
                written.extend(paths);
            }

            if steps.gct {
                for batch in &self.profiles.batches {
                    written.extend(self.write_batch_gct(&batch.name, &batch.plates, variant, steps.level)?);
                }
            }
        }

        if written.is_empty() && skipped {
            return Ok(Outcome::Skipped);
        }
        Ok(Outcome::Written(written))
    }

    /// Select features once over a group of plates and write one file per plate.
    fn select_group(
        &self,
        steps: &FeatureSelectConfig,
        variant: Variant,
        group: &[(&str, &Plate)],
    ) -> Result<Vec<PathBuf>> {
        let stage = ProfileStage::FeatureSelected(variant, steps.level);
        let outputs = group
            .iter()
            .map(|(batch, plate)| self.layout.profile(batch, &plate.name, stage))
            .collect::<Result<Vec<_>>>()?;
        if !self.needs_run(&outputs) {
            info!(plates = group.len(), "feature-selected outputs exist, skipping");
            return Ok(Vec::new());
        }

        let mut inputs = Vec::with_capacity(group.len());
        for (batch, plate) in group {
            let path = self
                .layout
                .profile(batch, &plate.name, ProfileStage::Normalized(variant))?;
            inputs.push((*batch, Profile::from_csv(&path)?));
        }

        if steps.level == Level::Plate {
            let Some((_, profile)) = inputs.pop() else {
                return Ok(Vec::new());
            };
            let selected = self.select_profile(steps, &profile)?;
            self.write_profile(&selected, &outputs[0])?;
            return Ok(outputs);
        }

        let expected: Vec<usize> = inputs.iter().map(|(_, p)| p.n_rows()).collect();
        let pooled = concat_tagged(inputs)?;
        let selected = Pooled {
            profile: self.select_profile(steps, &pooled.profile)?,
            tag: pooled.tag,
        };
        let parts = split_tagged(&selected, &steps.plate_column)?;

        for (((batch, plate), path), n_rows) in group.iter().zip(&outputs).zip(expected) {
            let part = parts
                .iter()
                .find(|((b, p), _)| b == batch && *p == plate.name)
                .map(|(_, part)| part)
                .ok_or_else(|| {
                    ProfilingError::EmptyData(format!(
                        "No rows for plate {} of batch {} after pooling on {}",
                        plate.name, batch, steps.plate_column
                    ))
                })?;
            if part.n_rows() != n_rows {
                return Err(ProfilingError::InvalidParameter(format!(
                    "Plate {} of batch {} had {} rows before pooling and {} after; \
                     check that {} identifies plates",
                    plate.name,
                    batch,
                    n_rows,
                    part.n_rows(),
                    steps.plate_column
                )));
            }
            self.write_profile(part, path)?;
        }
        Ok(outputs)
    }

    fn select_profile(&self, steps: &FeatureSelectConfig, profile: &Profile) -> Result<Profile> {
        let features = resolve_features(
            &steps.features,
            profile,
            &self.pipeline.compartments,
            steps.image_features,
        )?;
        let blocklist_file = steps
            .blocklist_file
            .as_ref()
            .map(|f| self.layout.root().join(f));
        let request = SelectRequest {
            features: &features,
            operations: &steps.operations,
            freq_cut: steps.freq_cut,
            unique_cut: steps.unique_cut,
            corr_threshold: steps.corr_threshold,
            na_cutoff: steps.na_cutoff,
            blocklist_file: blocklist_file.as_deref(),
        };
        feature_select(profile, &request)
    }

    /// Stack a batch's feature-selected plates into a GCT and a CSV.
    fn write_batch_gct(
        &self,
        batch: &str,
        plates: &[Plate],
        variant: Variant,
        level: Level,
    ) -> Result<Vec<PathBuf>> {
        let gct = self.layout.gct(batch, variant, level)?;
        let stacked = self.layout.gct_stacked(batch, variant, level)?;
        let outputs = vec![gct, stacked];
        if !self.needs_run(&outputs) {
            return Ok(Vec::new());
        }

        let profiles = plates
            .iter()
            .map(|p| {
                let path = self
                    .layout
                    .profile(batch, &p.name, ProfileStage::FeatureSelected(variant, level))?;
                Profile::from_csv(&path)
            })
            .collect::<Result<Vec<_>>>()?;
        let combined = Profile::concat(&profiles)?;

        std::fs::create_dir_all(self.layout.gct_dir(batch)?)?;
        write_gct(&combined, &outputs[0], self.output.float_format.as_ref())?;
        self.write_profile(&combined, &outputs[1])?;
        info!(batch, path = %outputs[0].display(), "wrote GCT");
        Ok(outputs)
    }

    /// Acquisition summary and plate heatmaps for every plate.
    pub fn pipeline_quality_control(&self) -> Result<Outcome> {
        let Some(steps) = self.pipeline.quality_control_enabled() else {
            return Ok(Outcome::Disabled);
        };
        let mut written = Vec::new();

        if let Some(summary) = steps.summary_enabled() {
            let path = self.layout.summary();
            for batch in &self.profiles.batches {
                for plate in &batch.plates {
                    let candidates = self.layout.load_data(&batch.name, &plate.name)?;
                    let load_data = first_existing(&candidates)
                        .ok_or_else(|| ProfilingError::MissingArtifact(candidates[0].clone()))?;
                    let table = Table::from_path(load_data, b',')?;
                    let row = summarize_load_data(
                        &table,
                        &batch.name,
                        &plate.name,
                        &summary.well_column,
                        &summary.site_column,
                    )?;
                    upsert_summary(&path, &row)?;
                    info!(batch = %batch.name, plate = %plate.name, wells = row.well_count, "updated QC summary");
                }
            }
            written.push(path);
        }

        if let Some(heatmap) = steps.heatmap_enabled() {
            for batch in &self.profiles.batches {
                for plate in &batch.plates {
                    written.extend(self.plate_heatmaps(
                        &batch.name,
                        &plate.name,
                        &heatmap.well_column,
                        &heatmap.count_column,
                    )?);
                }
            }
        }
        Ok(Outcome::Written(written))
    }

    fn plate_heatmaps(
        &self,
        batch: &str,
        plate: &str,
        well_column: &str,
        count_column: &str,
    ) -> Result<Vec<PathBuf>> {
        let mut written = Vec::new();

        let cell_count = self.layout.heatmap(batch, plate, HeatmapKind::CellCount)?;
        if self.needs_run(std::slice::from_ref(&cell_count)) {
            let augmented = Profile::from_csv(&self.layout.profile(batch, plate, ProfileStage::Augmented)?)?;
            save_heatmap(&cell_count_grid(&augmented, well_column, count_column)?, &cell_count)?;
            written.push(cell_count);
        }

        let Some((level, source)) = preferred_negcon_profile(&self.layout, batch, plate)? else {
            warn!(batch, plate, "no negcon feature-selected profile, skipping correlation heatmaps");
            return Ok(written);
        };
        let correlation = self.layout.heatmap(batch, plate, HeatmapKind::Correlation)?;
        let position = self.layout.heatmap(batch, plate, HeatmapKind::PositionEffect)?;
        if self.needs_run(&[correlation.clone(), position.clone()]) {
            debug!(batch, plate, level = level.as_str(), "correlation heatmaps from negcon profile");
            let profile = Profile::from_csv(&source)?;
            let (corr, effect) = correlation_heatmaps(&profile, well_column)?;
            save_heatmap(&corr, &correlation)?;
            save_heatmap(&effect, &position)?;
            written.push(correlation);
            written.push(position);
        }
        Ok(written)
    }
}
