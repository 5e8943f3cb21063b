//! Integration tests running the whole pipeline over a small two-plate project.

use approx::assert_relative_eq;
use cell_profiling::prelude::*;
use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const BATCH: &str = "B1";
const PLATES: [&str; 2] = ["P1", "P2"];
const WELLS: [&str; 4] = ["A01", "A02", "B01", "B02"];

/// Write one plate's single-cell store: two cells per well, one image per well.
///
/// `shift` is added to the cell area so plates differ before normalization.
fn write_store(path: &Path, plate: &str, shift: f64) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE Image (ImageNumber INTEGER, Image_Metadata_Plate TEXT, \
             Image_Metadata_Well TEXT, Image_Metadata_Site INTEGER);
         CREATE TABLE Cells (ImageNumber INTEGER, ObjectNumber INTEGER, Cells_AreaShape_Area REAL);
         CREATE TABLE Cytoplasm (ImageNumber INTEGER, ObjectNumber INTEGER, \
             Cytoplasm_Parent_Cells INTEGER, Cytoplasm_Parent_Nuclei INTEGER, \
             Cytoplasm_Intensity_MeanIntensity_DNA REAL);
         CREATE TABLE Nuclei (ImageNumber INTEGER, ObjectNumber INTEGER, \
             Nuclei_Intensity_MeanIntensity_DNA REAL, Nuclei_Texture_Constant REAL);",
    )
    .unwrap();

    for (w, well) in WELLS.iter().enumerate() {
        conn.execute(
            "INSERT INTO Image VALUES (?1, ?2, ?3, 1)",
            params![w as i64 + 1, plate, well],
        )
        .unwrap();
        for object in 1..=2 {
            insert_cell(&conn, w, object, shift);
        }
    }
}

/// Insert cell `object` of well index `w` into every compartment table.
fn insert_cell(conn: &Connection, w: usize, object: i64, shift: f64) {
    let image = w as i64 + 1;
    let (wf, of) = (w as f64, object as f64);
    conn.execute(
        "INSERT INTO Cells VALUES (?1, ?2, ?3)",
        params![image, object, 100.0 + 10.0 * wf + of + shift],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO Cytoplasm VALUES (?1, ?2, ?2, ?2, ?3)",
        params![image, object, 0.2 + 0.05 * wf * wf + 0.01 * of],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO Nuclei VALUES (?1, ?2, ?3, 5.0)",
        params![image, object, 2.0 + ((w * 7) % 5) as f64 * 0.1 + 0.01 * of],
    )
    .unwrap();
}

fn store_path(root: &Path, plate: &str) -> PathBuf {
    root.join("backend")
        .join(BATCH)
        .join(plate)
        .join(format!("{}.sqlite", plate))
}

fn write_file(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// Lay out stores, platemaps and load-data files under `root`.
fn create_project(root: &Path) {
    for (i, plate) in PLATES.iter().enumerate() {
        write_store(&store_path(root, plate), plate, 50.0 * i as f64);

        let mut load_data = String::from("Metadata_Plate,Metadata_Well,Metadata_Site,FileName_OrigDNA\n");
        for well in WELLS {
            for site in 1..=2 {
                load_data.push_str(&format!("{},{},{},{}_s{}.tiff\n", plate, well, site, well, site));
            }
        }
        write_file(
            &root.join("load_data_csv").join(BATCH).join(plate).join("load_data.csv"),
            &load_data,
        );
    }

    let platemaps = root.join("metadata").join("platemaps").join(BATCH);
    write_file(
        &platemaps.join("barcode_platemap.csv"),
        "Assay_Plate_Barcode,Plate_Map_Name\nP1,M1\nP2,M1\n",
    );
    write_file(
        &platemaps.join("platemap").join("M1.txt"),
        "plate_map_name\twell_position\tcontrol_type\tbroad_sample\n\
         M1\tA01\tnegcon\tDMSO\n\
         M1\tA02\ttrt\tBRD-1\n\
         M1\tB01\ttrt\tBRD-2\n\
         M1\tB02\tnegcon\tDMSO\n",
    );
}

const AGGREGATE_AND_ANNOTATE: &str = "aggregate:
  perform: true
  plate_column: Image_Metadata_Plate
  well_column: Image_Metadata_Well
  method: median
  backend_dir: backend
annotate:
  perform: true
  well_column: Metadata_Well
";

/// A full configuration: the given stage sections plus batch B1 with P1 and P2.
fn project_config(overwrite: bool, stages: &str) -> String {
    format!(
        r#"pipeline: cell-painting
output_dir: profiles
platemap_well_column: Metadata_well_position
compartments: cells,cytoplasm,nuclei
options:
  compression: gzip
  overwrite: {overwrite}
{AGGREGATE_AND_ANNOTATE}{stages}---
batch: B1
process: true
plates:
  - name: P1
    process: true
    cell_line: A549
  - name: P2
    process: true
"#
    )
}

fn config(overwrite: bool, select_negcon: bool) -> String {
    let negcon_select = if select_negcon {
        "feature_select_negcon:\n  perform: true\n  level: all\n  operations: [variance_threshold]\n"
    } else {
        ""
    };
    let stages = format!(
        r#"normalize:
  perform: true
  method: standardize
normalize_negcon:
  perform: true
  method: standardize
feature_select:
  perform: true
  level: plate
  gct: true
  operations: [variance_threshold, drop_na_columns, blocklist]
{negcon_select}quality_control:
  perform: true
  summary:
    perform: true
  heatmap:
    perform: true
"#
    );
    project_config(overwrite, &stages)
}

fn runner_for(root: &Path, config: &str) -> RunPipeline {
    let (pipeline, profiles) = load_config_str(config).unwrap();
    RunPipeline::new(pipeline, profiles, root).unwrap()
}

fn runner(root: &Path, overwrite: bool, select_negcon: bool) -> RunPipeline {
    runner_for(root, &config(overwrite, select_negcon))
}

fn profile_path(root: &Path, plate: &str, stage: ProfileStage) -> PathBuf {
    runner(root, true, true).layout().profile(BATCH, plate, stage).unwrap()
}

fn feature(profile: &Profile, name: &str) -> Vec<f64> {
    profile.feature_column(profile.feature_index(name).unwrap())
}

#[test]
fn test_end_to_end_outputs() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    create_project(root);

    let report = run_pipeline(&runner(root, true, true)).unwrap();
    assert_eq!(report.skipped, 0);

    for plate in PLATES {
        for stage in [
            ProfileStage::Aggregated,
            ProfileStage::Augmented,
            ProfileStage::Normalized(Variant::ALL_SAMPLES),
            ProfileStage::Normalized(Variant::NEGCON),
            ProfileStage::FeatureSelected(Variant::ALL_SAMPLES, Level::Plate),
            ProfileStage::FeatureSelected(Variant::NEGCON, Level::All),
        ] {
            let path = profile_path(root, plate, stage);
            assert!(path.is_file(), "missing {}", path.display());
            assert!(report.written.contains(&path));
        }
    }

    // Aggregation: medians of two cells per well, wells in order.
    let aggregated = Profile::from_csv(&profile_path(root, "P1", ProfileStage::Aggregated)).unwrap();
    assert_eq!(
        aggregated.metadata_names(),
        &["Image_Metadata_Plate", "Image_Metadata_Well", "Metadata_Object_Count"]
    );
    assert_eq!(aggregated.metadata_column("Image_Metadata_Well").unwrap(), WELLS.to_vec());
    assert_eq!(aggregated.metadata_column("Metadata_Object_Count").unwrap(), vec!["2"; 4]);
    assert_eq!(aggregated.feature_names()[0], "Cytoplasm_Intensity_MeanIntensity_DNA");
    let area = feature(&aggregated, "Cells_AreaShape_Area");
    assert_relative_eq!(area[1], 111.5);

    // Annotation: platemap columns lead, cleaned profile metadata follows.
    let augmented = Profile::from_csv(&profile_path(root, "P1", ProfileStage::Augmented)).unwrap();
    assert_eq!(
        augmented.metadata_names(),
        &[
            "Metadata_plate_map_name",
            "Metadata_well_position",
            "Metadata_control_type",
            "Metadata_broad_sample",
            "Metadata_Plate",
            "Metadata_Well",
            "Metadata_Object_Count",
            "Metadata_cell_line",
        ]
    );
    assert_eq!(
        augmented.metadata_column("Metadata_control_type").unwrap(),
        vec!["negcon", "trt", "trt", "negcon"]
    );
    assert_eq!(augmented.metadata_column("Metadata_cell_line").unwrap(), vec!["A549"; 4]);

    // Negcon normalization: negcon wells 101.5 and 131.5 give mean 116.5, std 15.
    let negcon = Profile::from_csv(&profile_path(root, "P1", ProfileStage::Normalized(Variant::NEGCON))).unwrap();
    let area = feature(&negcon, "Cells_AreaShape_Area");
    assert_relative_eq!(area[0], -1.0, epsilon = 1e-9);
    assert_relative_eq!(area[1], -1.0 / 3.0, epsilon = 1e-9);
    assert_relative_eq!(area[2], 1.0 / 3.0, epsilon = 1e-9);
    assert_relative_eq!(area[3], 1.0, epsilon = 1e-9);

    // The constant texture feature does not survive variance filtering.
    let selected = Profile::from_csv(&profile_path(
        root,
        "P1",
        ProfileStage::FeatureSelected(Variant::ALL_SAMPLES, Level::Plate),
    ))
    .unwrap();
    assert!(selected.feature_index("Nuclei_Texture_Constant").is_err());
    assert_eq!(selected.n_features(), 3);

    let gct = runner(root, true, true)
        .layout()
        .gct(BATCH, Variant::ALL_SAMPLES, Level::Plate)
        .unwrap();
    let text = fs::read_to_string(&gct).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("#1.3"));
    assert_eq!(lines.next().unwrap().split('\t').take(2).collect::<Vec<_>>(), vec!["3", "8"]);

    // Quality control.
    let summary = Table::from_path(&root.join("quality_control/summary/summary.tsv"), b'\t').unwrap();
    assert_eq!(summary.n_rows(), 2);
    assert_eq!(summary.column("Well_Count").unwrap(), vec!["4", "4"]);
    assert_eq!(summary.column("Site_Count_Median").unwrap(), vec!["2", "2"]);

    let heatmaps = root.join("quality_control/heatmap/B1/P1");
    for kind in ["cell_count", "correlation", "position_effect"] {
        assert!(heatmaps.join(format!("P1_{}.png", kind)).is_file(), "missing {} heatmap", kind);
    }
}

#[test]
fn test_all_level_split_restores_plates() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    create_project(root);
    run_pipeline(&runner(root, true, true)).unwrap();

    for plate in PLATES {
        let normalized =
            Profile::from_csv(&profile_path(root, plate, ProfileStage::Normalized(Variant::NEGCON))).unwrap();
        let selected = Profile::from_csv(&profile_path(
            root,
            plate,
            ProfileStage::FeatureSelected(Variant::NEGCON, Level::All),
        ))
        .unwrap();

        assert_eq!(selected.n_rows(), normalized.n_rows());
        assert!(!selected.has_metadata("Metadata_batch"));
        assert_eq!(selected.metadata_column("Metadata_Plate").unwrap(), vec![plate; 4]);
        assert_eq!(
            selected.metadata_column("Metadata_Well").unwrap(),
            normalized.metadata_column("Metadata_Well").unwrap()
        );
        assert!(selected.feature_index("Nuclei_Texture_Constant").is_err());
    }
}

#[test]
fn test_rerun_is_byte_identical() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    create_project(root);

    let first = run_pipeline(&runner(root, true, true)).unwrap();
    let profiles: Vec<PathBuf> = first
        .written
        .iter()
        .filter(|p| p.to_string_lossy().ends_with(".csv.gz") || p.extension().map_or(false, |e| e == "gct"))
        .cloned()
        .collect();
    let before: Vec<Vec<u8>> = profiles.iter().map(|p| fs::read(p).unwrap()).collect();

    run_pipeline(&runner(root, true, true)).unwrap();
    for (path, bytes) in profiles.iter().zip(before) {
        assert_eq!(fs::read(path).unwrap(), bytes, "{} changed on rerun", path.display());
    }

    let summary = Table::from_path(&root.join("quality_control/summary/summary.tsv"), b'\t').unwrap();
    assert_eq!(summary.n_rows(), 2);
}

#[test]
fn test_existing_outputs_are_kept_without_overwrite() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    create_project(root);
    run_pipeline(&runner(root, true, true)).unwrap();

    let aggregated = profile_path(root, "P1", ProfileStage::Aggregated);
    fs::write(&aggregated, "sentinel").unwrap();
    let normalized = profile_path(root, "P1", ProfileStage::Normalized(Variant::ALL_SAMPLES));
    fs::remove_file(&normalized).unwrap();

    let report = run_pipeline(&runner(root, false, true)).unwrap();
    assert!(report.skipped > 0);
    assert_eq!(fs::read_to_string(&aggregated).unwrap(), "sentinel");
    assert!(normalized.is_file());
    assert!(report.written.contains(&normalized));
    assert!(!report.written.contains(&aggregated));
}

#[test]
fn test_missing_barcode_halts_pipeline() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    create_project(root);
    write_file(
        &root.join("metadata/platemaps/B1/barcode_platemap.csv"),
        "Assay_Plate_Barcode,Plate_Map_Name\nP1,M1\n",
    );

    let err = run_pipeline(&runner(root, true, true)).unwrap_err();
    assert!(matches!(
        err,
        ProfilingError::PlatemapLookup { ref plate, found: 0, .. } if plate == "P2"
    ));
    // P1 completed before the failure; P2 stopped after aggregation.
    assert!(profile_path(root, "P1", ProfileStage::Augmented).is_file());
    assert!(profile_path(root, "P2", ProfileStage::Aggregated).is_file());
    assert!(!profile_path(root, "P2", ProfileStage::Augmented).exists());
}

#[test]
fn test_qc_without_negcon_profile_draws_cell_count_only() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    create_project(root);
    run_pipeline(&runner(root, true, false)).unwrap();

    let heatmaps = root.join("quality_control/heatmap/B1/P1");
    assert!(heatmaps.join("P1_cell_count.png").is_file());
    assert!(!heatmaps.join("P1_correlation.png").exists());
    assert!(!heatmaps.join("P1_position_effect.png").exists());
}

#[test]
fn test_batch_level_selection_with_subgroups() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    create_project(root);

    let config = project_config(
        true,
        "normalize:
  perform: true
  method: standardize
  subgroup: Metadata_control_type
feature_select:
  perform: true
  level: batch
  gct: true
  operations: [variance_threshold]
",
    );
    let runner = runner_for(root, &config);
    let report = run_pipeline(&runner).unwrap();

    let subgroup = Variant::ALL_SAMPLES.with_subgroup();
    for plate in PLATES {
        for stage in [
            ProfileStage::Normalized(Variant::ALL_SAMPLES),
            ProfileStage::Normalized(subgroup),
            ProfileStage::FeatureSelected(Variant::ALL_SAMPLES, Level::Batch),
            ProfileStage::FeatureSelected(subgroup, Level::Batch),
        ] {
            let path = runner.layout().profile(BATCH, plate, stage).unwrap();
            assert!(report.written.contains(&path), "missing {}", path.display());
        }
        assert!(!runner
            .layout()
            .profile(BATCH, plate, ProfileStage::Normalized(Variant::NEGCON))
            .unwrap()
            .exists());
    }

    // Each control type is standardized on its own: negcon A01/B02, trt A02/B01.
    let grouped = Profile::from_csv(
        &runner.layout().profile(BATCH, "P1", ProfileStage::Normalized(subgroup)).unwrap(),
    )
    .unwrap();
    let area = feature(&grouped, "Cells_AreaShape_Area");
    for (value, expected) in area.iter().zip([-1.0, -1.0, 1.0, 1.0]) {
        assert_relative_eq!(*value, expected, epsilon = 1e-9);
    }

    for variant in [Variant::ALL_SAMPLES, subgroup] {
        for plate in PLATES {
            let selected = Profile::from_csv(
                &runner
                    .layout()
                    .profile(BATCH, plate, ProfileStage::FeatureSelected(variant, Level::Batch))
                    .unwrap(),
            )
            .unwrap();
            assert_eq!(selected.n_rows(), 4);
            assert!(!selected.has_metadata("Metadata_batch"));
            assert_eq!(selected.metadata_column("Metadata_Plate").unwrap(), vec![plate; 4]);
            assert!(selected.feature_index("Nuclei_Texture_Constant").is_err());
        }

        let gct = runner.layout().gct(BATCH, variant, Level::Batch).unwrap();
        assert!(report.written.contains(&gct));
        let text = fs::read_to_string(&gct).unwrap();
        assert_eq!(text.lines().nth(1).unwrap().split('\t').take(2).collect::<Vec<_>>(), vec!["3", "8"]);
        assert!(runner.layout().gct_stacked(BATCH, variant, Level::Batch).unwrap().is_file());
    }
}

#[test]
fn test_min_cell_count_limits_reference_wells() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    create_project(root);
    // B01 (well index 2) gets a third cell on every plate.
    for (i, plate) in PLATES.iter().enumerate() {
        let conn = Connection::open(store_path(root, plate)).unwrap();
        insert_cell(&conn, 2, 3, 50.0 * i as f64);
    }

    let config = project_config(
        true,
        "normalize:
  perform: true
  method: standardize
  min_cell_count: 3
",
    );
    let runner = runner_for(root, &config);
    run_pipeline(&runner).unwrap();

    let normalized = Profile::from_csv(
        &runner
            .layout()
            .profile(BATCH, "P1", ProfileStage::Normalized(Variant::ALL_SAMPLES))
            .unwrap(),
    )
    .unwrap();
    assert_eq!(
        normalized.metadata_column("Metadata_Object_Count").unwrap(),
        vec!["2", "2", "3", "2"]
    );

    // Only B01 is a reference: its median area is 122 and its spread is zero.
    let area = feature(&normalized, "Cells_AreaShape_Area");
    assert_relative_eq!(area[0], 101.5 - 122.0, epsilon = 1e-9);
    assert_relative_eq!(area[2], 0.0, epsilon = 1e-9);
    assert_relative_eq!(area[3], 131.5 - 122.0, epsilon = 1e-9);
}
