//! Run the whole profiling pipeline over a synthetic one-plate project.
//!
//! This example shows how to:
//! 1. Lay out a project (single-cell store, platemaps)
//! 2. Load a pipeline configuration
//! 3. Run every enabled stage
//! 4. Read back the feature-selected profile
//!
//! Run with `cargo run --example run_project`. Set `RUST_LOG=debug` for
//! per-stage detail.

use cell_profiling::prelude::*;
use rusqlite::{params, Connection};
use std::fs;
use std::path::Path;
use tracing_subscriber::EnvFilter;

const BATCH: &str = "2024_01_15_Batch1";
const PLATE: &str = "SQ00014812";
const ROWS: [char; 2] = ['A', 'B'];
const COLUMNS: u32 = 6;

const CONFIG: &str = r#"pipeline: example
output_dir: profiles
platemap_well_column: Metadata_well_position
compartments: cells,cytoplasm,nuclei
options:
  compression: gzip
  float_format: "%.5g"
aggregate:
  perform: true
  plate_column: Image_Metadata_Plate
  well_column: Image_Metadata_Well
  method: median
annotate:
  perform: true
  well_column: Metadata_Well
normalize:
  perform: true
  method: mad_robustize
normalize_negcon:
  perform: true
  method: mad_robustize
feature_select:
  perform: true
  level: plate
  operations: [variance_threshold, correlation_threshold, drop_na_columns, blocklist]
feature_select_negcon:
  perform: true
  level: plate
  operations: [variance_threshold]
quality_control:
  perform: true
  heatmap:
    perform: true
---
batch: 2024_01_15_Batch1
process: true
plates:
  - name: SQ00014812
    process: true
"#;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    println!("=== Cell Profiling Example ===\n");

    let project = tempfile::tempdir()?;
    let root = project.path();
    let n_cells = create_project(root)?;
    println!("Project: {}", root.display());
    println!("  Wells: {}", ROWS.len() as u32 * COLUMNS);
    println!("  Cells: {}", n_cells);
    println!();

    println!("=== Running Pipeline ===\n");

    let (pipeline, profiles) = load_config_str(CONFIG)?;
    let runner = RunPipeline::new(pipeline, profiles, root)?;
    let report = run_pipeline(&runner)?;

    println!("Written files:");
    for path in &report.written {
        let shown = path.strip_prefix(root).unwrap_or(path.as_path());
        println!("  {}", shown.display());
    }
    println!();

    let selected = Profile::from_csv(&runner.layout().profile(
        BATCH,
        PLATE,
        ProfileStage::FeatureSelected(Variant::ALL_SAMPLES, Level::Plate),
    )?)?;

    println!("=== Feature-Selected Profile ===\n");
    println!(
        "{} wells, {} features kept",
        selected.n_rows(),
        selected.n_features()
    );

    let wells = selected.metadata_column("Metadata_Well")?;
    let controls = selected.metadata_column("Metadata_control_type")?;
    print!("{:<6} {:<8}", "Well", "Control");
    for name in selected.feature_names() {
        print!(" {:>38}", name);
    }
    println!();
    println!("{}", "-".repeat(15 + 39 * selected.n_features()));

    for (row, (well, control)) in wells.iter().zip(&controls).enumerate() {
        print!("{:<6} {:<8}", well, control);
        for value in selected.features().row(row).iter() {
            print!(" {:>38.3}", value);
        }
        println!();
    }

    Ok(())
}

/// Write the single-cell store and platemaps; returns the number of cells.
///
/// Columns 1 and 6 are negative controls; treated wells have larger cells.
fn create_project(root: &Path) -> Result<usize> {
    let store = root.join("backend").join(BATCH).join(PLATE);
    fs::create_dir_all(&store)?;
    let conn = Connection::open(store.join(format!("{}.sqlite", PLATE)))?;
    conn.execute_batch(
        "CREATE TABLE Image (ImageNumber INTEGER, Image_Metadata_Plate TEXT, \
             Image_Metadata_Well TEXT, Image_Metadata_Site INTEGER);
         CREATE TABLE Cells (ImageNumber INTEGER, ObjectNumber INTEGER, \
             Cells_AreaShape_Area REAL, Cells_AreaShape_Eccentricity REAL);
         CREATE TABLE Cytoplasm (ImageNumber INTEGER, ObjectNumber INTEGER, \
             Cytoplasm_Parent_Cells INTEGER, Cytoplasm_Parent_Nuclei INTEGER, \
             Cytoplasm_Intensity_MeanIntensity_Mito REAL);
         CREATE TABLE Nuclei (ImageNumber INTEGER, ObjectNumber INTEGER, \
             Nuclei_Intensity_MeanIntensity_DNA REAL);",
    )?;

    let mut seed = 12345u64;
    let mut rand_uniform = || -> f64 {
        seed = seed.wrapping_mul(1103515245).wrapping_add(12345);
        ((seed >> 16) & 0x7FFF) as f64 / 32768.0
    };

    let mut platemap = String::from("plate_map_name\twell_position\tcontrol_type\tbroad_sample\n");
    let mut image = 0i64;
    let mut n_cells = 0usize;
    for row in ROWS {
        for column in 1..=COLUMNS {
            let well = format!("{}{:02}", row, column);
            let negcon = column == 1 || column == COLUMNS;
            if negcon {
                platemap.push_str(&format!("C-7161-01\t{}\tnegcon\tDMSO\n", well));
            } else {
                platemap.push_str(&format!("C-7161-01\t{}\ttrt\tBRD-{:04}\n", well, column));
            }
            let effect = if negcon { 1.0 } else { 1.0 + 0.1 * column as f64 };

            for site in 1..=2 {
                image += 1;
                conn.execute(
                    "INSERT INTO Image VALUES (?1, ?2, ?3, ?4)",
                    params![image, PLATE, well, site],
                )?;
                let objects = 3 + (rand_uniform() * 4.0) as i64;
                for object in 1..=objects {
                    conn.execute(
                        "INSERT INTO Cells VALUES (?1, ?2, ?3, ?4)",
                        params![
                            image,
                            object,
                            400.0 * effect * (0.8 + 0.4 * rand_uniform()),
                            0.3 + 0.5 * rand_uniform()
                        ],
                    )?;
                    conn.execute(
                        "INSERT INTO Cytoplasm VALUES (?1, ?2, ?2, ?2, ?3)",
                        params![image, object, 0.1 + 0.05 * rand_uniform()],
                    )?;
                    conn.execute(
                        "INSERT INTO Nuclei VALUES (?1, ?2, ?3)",
                        params![image, object, 0.5 * effect + 0.1 * rand_uniform()],
                    )?;
                    n_cells += 1;
                }
            }
        }
    }

    let platemaps = root.join("metadata").join("platemaps").join(BATCH);
    fs::create_dir_all(platemaps.join("platemap"))?;
    fs::write(
        platemaps.join("barcode_platemap.csv"),
        format!("Assay_Plate_Barcode,Plate_Map_Name\n{},C-7161-01\n", PLATE),
    )?;
    fs::write(platemaps.join("platemap").join("C-7161-01.txt"), platemap)?;

    Ok(n_cells)
}
