//! profiling - run the image-based profiling pipeline
//!
//! Reads a YAML configuration and runs every enabled stage for every
//! configured batch and plate.

use cell_profiling::config::load_config;
use cell_profiling::error::Result;
use cell_profiling::pipeline::{run_pipeline, RunPipeline};
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Image-based profiling pipeline
#[derive(Parser)]
#[command(name = "profiling")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the pipeline configuration YAML
    #[arg(short, long)]
    config: PathBuf,

    /// Project root that relative paths are resolved against
    #[arg(short, long, default_value = ".")]
    root: PathBuf,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = cmd_run(&cli.config, &cli.root) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn cmd_run(config: &Path, root: &Path) -> Result<()> {
    let (pipeline, profiles) = load_config(config)?;
    let runner = RunPipeline::new(pipeline, profiles, root)?;
    let report = run_pipeline(&runner)?;

    println!(
        "Pipeline finished: {} files written, {} stages skipped",
        report.written.len(),
        report.skipped
    );
    Ok(())
}
