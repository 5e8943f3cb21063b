//! csv2gz - gzip a CSV profile, reformatting its feature values

use cell_profiling::data::{Compression, FloatFormat, OutputOptions, Profile};
use cell_profiling::error::Result;
use clap::Parser;
use std::path::{Path, PathBuf};

/// Recompress a CSV profile to `<file>.gz`
#[derive(Parser)]
#[command(name = "csv2gz")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// CSV profile to compress
    file: PathBuf,

    /// printf-style format for feature values
    #[arg(long, default_value = "%.3g")]
    float_format: String,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = compress(&cli.file, &cli.float_format) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn compress(input: &Path, float_format: &str) -> Result<()> {
    let options = OutputOptions {
        compression: Compression::Gzip,
        float_format: Some(FloatFormat::parse(float_format)?),
    };
    let profile = Profile::from_csv(input)?;

    let mut output = input.as_os_str().to_owned();
    output.push(".gz");
    let output = PathBuf::from(output);
    profile.to_csv(&output, &options)?;

    println!("Wrote {}", output.display());
    Ok(())
}
