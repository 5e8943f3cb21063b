//! End-to-end driver: every enabled stage for every configured plate.

use crate::error::Result;
use crate::pipeline::runner::{Outcome, RunPipeline};
use std::path::PathBuf;
use tracing::info;

/// Files written by one driver run, in the order they were produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub written: Vec<PathBuf>,
    /// Stages skipped because their outputs existed.
    pub skipped: usize,
}

impl RunReport {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Written(paths) => self.written.extend(paths),
            Outcome::Skipped => self.skipped += 1,
            Outcome::Disabled => {}
        }
    }
}

/// Run the whole pipeline, halting at the first failure.
///
/// Per plate: aggregate, annotate, normalize, normalize_negcon. Then
/// feature selection (primary, then negcon) and quality control.
pub fn run_pipeline(runner: &RunPipeline) -> Result<RunReport> {
    let mut report = RunReport::default();

    for batch in &runner.profiles().batches {
        for plate in &batch.plates {
            info!(batch = %batch.name, plate = %plate.name, "processing plate");
            runner.create_directories(&batch.name, &plate.name)?;

            report.record(runner.pipeline_aggregate(&batch.name, plate)?);
            report.record(runner.pipeline_annotate(&batch.name, plate)?);
            report.record(runner.pipeline_normalize(&batch.name, plate, false)?);
            report.record(runner.pipeline_normalize(&batch.name, plate, true)?);
        }
    }

    report.record(runner.pipeline_feature_select(false)?);
    report.record(runner.pipeline_feature_select(true)?);
    report.record(runner.pipeline_quality_control()?);

    info!(
        files = report.written.len(),
        skipped = report.skipped,
        "pipeline finished"
    );
    Ok(report)
}
