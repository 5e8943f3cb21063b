//! Aggregation of single-cell measurements into well-level profiles.
//!
//! Compartment tables are merged through the cytoplasm hub: every
//! cytoplasm object names its parent cell and nucleus, so one hub row is
//! one cell. Strata (plate, well and optionally site) come from the image
//! table. Cells are then reduced per stratum with a median or mean.

mod store;

pub use store::{SingleCellStore, SqliteStore, StoreTable, StoreValue, SQLITE_SCHEME};

use crate::config::{AggregateMethod, CANONICAL_COMPARTMENTS};
use crate::data::{is_metadata_column, Profile};
use crate::error::{ProfilingError, Result};
use crate::features::capitalize;
use crate::stats::{nan_mean, nan_median};
use nalgebra::DMatrix;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Name of the object-count column added to aggregated profiles.
pub const OBJECT_COUNT_COLUMN: &str = "Metadata_Object_Count";

const HUB: &str = "cytoplasm";
const IMAGE_NUMBER: &str = "ImageNumber";
const TABLE_NUMBER: &str = "TableNumber";

/// Which column of compartment `a` points at an object of compartment `b`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkingColumns {
    links: BTreeMap<String, BTreeMap<String, String>>,
}

impl LinkingColumns {
    /// Standard CellProfiler links for cells, cytoplasm and nuclei.
    pub fn canonical(object_feature: &str) -> Self {
        let mut links: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        let hub = links.entry(HUB.to_string()).or_default();
        hub.insert("cells".to_string(), "Cytoplasm_Parent_Cells".to_string());
        hub.insert("nuclei".to_string(), "Cytoplasm_Parent_Nuclei".to_string());
        for comp in ["cells", "nuclei"] {
            links
                .entry(comp.to_string())
                .or_default()
                .insert(HUB.to_string(), object_feature.to_string());
        }
        Self { links }
    }

    /// Canonical links extended with every non-canonical compartment.
    ///
    /// Each extra compartment is linked to the hub by its object id and the
    /// hub gains a `Cytoplasm_Parent_<Name>` column. Only the first letter of
    /// the compartment name is capitalized, so CamelCase names do not match.
    pub fn for_compartments(compartments: &[String], object_feature: &str) -> Self {
        let mut linking = Self::canonical(object_feature);
        for comp in compartments {
            let comp = comp.to_lowercase();
            if CANONICAL_COMPARTMENTS.contains(&comp.as_str()) {
                continue;
            }
            linking
                .links
                .entry(HUB.to_string())
                .or_default()
                .insert(comp.clone(), format!("Cytoplasm_Parent_{}", capitalize(&comp)));
            linking
                .links
                .entry(comp)
                .or_default()
                .insert(HUB.to_string(), object_feature.to_string());
        }
        linking
    }

    /// Column of `from` that holds the linked `to` object.
    pub fn get(&self, from: &str, to: &str) -> Option<&str> {
        self.links.get(from)?.get(to).map(String::as_str)
    }
}

/// Inputs of one aggregation.
#[derive(Debug, Clone)]
pub struct AggregateRequest<'a> {
    pub compartments: &'a [String],
    pub linking: &'a LinkingColumns,
    pub image_table: &'a str,
    /// Image-table columns grouping cells; at least plate and well.
    pub strata: Vec<String>,
    /// Image-table column holding the site number, used with `fields`.
    pub site_column: Option<&'a str>,
    pub fields: Option<&'a [i64]>,
    pub method: AggregateMethod,
    /// Restrict output to these measurements; `None` keeps all.
    pub features: Option<&'a [String]>,
}

/// Compartment rows indexed by (image key, object id).
struct Compartment {
    table: StoreTable,
    features: Vec<usize>,
    by_object: HashMap<(String, String), usize>,
}

/// Aggregate one plate's single cells into a profile.
///
/// Output columns are the strata, [`OBJECT_COUNT_COLUMN`], then one column
/// per measurement. Groups are ordered by their strata values.
pub fn aggregate_profiles<S: SingleCellStore + ?Sized>(
    store: &S,
    request: &AggregateRequest<'_>,
) -> Result<Profile> {
    if request.strata.is_empty() {
        return Err(ProfilingError::InvalidParameter(
            "Aggregation needs at least one strata column".to_string(),
        ));
    }
    if let Some(bad) = request.strata.iter().find(|s| !is_metadata_column(s)) {
        return Err(ProfilingError::InvalidParameter(format!(
            "Strata column '{}' is not a metadata column",
            bad
        )));
    }
    if request.compartments.is_empty() {
        return Err(ProfilingError::InvalidParameter(
            "No compartments configured".to_string(),
        ));
    }

    let strata_by_image = load_strata(store, request)?;

    let compartments: Vec<String> = request
        .compartments
        .iter()
        .map(|c| c.to_lowercase())
        .collect();
    let hub_name = if compartments.iter().any(|c| c == HUB) {
        HUB.to_string()
    } else if compartments.len() == 1 {
        compartments[0].clone()
    } else {
        return Err(ProfilingError::InvalidParameter(
            "Merging several compartments requires the cytoplasm compartment".to_string(),
        ));
    };

    // Load every compartment; the hub first so its measurements lead.
    let mut order = vec![hub_name.clone()];
    order.extend(compartments.iter().filter(|c| **c != hub_name).cloned());

    let mut loaded = Vec::with_capacity(order.len());
    for name in &order {
        loaded.push(load_compartment(store, name, request.linking)?);
    }

    let mut feature_names: Vec<String> = Vec::new();
    for comp in &loaded {
        feature_names.extend(comp.features.iter().map(|&i| comp.table.columns[i].clone()));
    }

    // Resolve per-cell rows: hub row plus one row per linked compartment.
    let hub = &loaded[0];
    let hub_image = image_key_columns(&hub.table)?;
    let hub_links: Vec<usize> = order[1..]
        .iter()
        .map(|other| {
            let column = request.linking.get(&hub_name, other).ok_or_else(|| {
                ProfilingError::Config(format!(
                    "No linking column from {} to {}",
                    hub_name, other
                ))
            })?;
            hub.table.column_index(column)
        })
        .collect::<Result<_>>()?;

    let mut groups: BTreeMap<Vec<SortKey>, (Vec<String>, Vec<Vec<f64>>)> = BTreeMap::new();
    let mut n_cells = 0usize;

    'cells: for hub_row in &hub.table.rows {
        let image = image_key(hub_row, &hub_image);
        let Some(strata) = strata_by_image.get(&image) else {
            continue;
        };

        let mut values: Vec<f64> = hub.features.iter().map(|&i| hub_row[i].as_f64()).collect();
        for (comp, &link) in loaded[1..].iter().zip(&hub_links) {
            let object = hub_row[link].as_key();
            let Some(&row) = comp.by_object.get(&(image.clone(), object)) else {
                continue 'cells;
            };
            let row = &comp.table.rows[row];
            values.extend(comp.features.iter().map(|&i| row[i].as_f64()));
        }

        n_cells += 1;
        let key: Vec<SortKey> = strata.iter().map(|s| SortKey(s.clone())).collect();
        groups
            .entry(key)
            .or_insert_with(|| (strata.clone(), Vec::new()))
            .1
            .push(values);
    }

    debug!(
        cells = n_cells,
        groups = groups.len(),
        features = feature_names.len(),
        "merged single cells"
    );
    if groups.is_empty() {
        return Err(ProfilingError::EmptyData(
            "No single cells matched the image table".to_string(),
        ));
    }

    let reduce: fn(&[f64]) -> f64 = match request.method {
        AggregateMethod::Median => nan_median,
        AggregateMethod::Mean => nan_mean,
    };

    let mut metadata = Vec::with_capacity(groups.len());
    let mut matrix = DMatrix::from_element(groups.len(), feature_names.len(), f64::NAN);
    for (row, (strata, cells)) in groups.into_values().enumerate() {
        let mut meta = strata;
        meta.push(cells.len().to_string());
        metadata.push(meta);

        let mut column = Vec::with_capacity(cells.len());
        for j in 0..feature_names.len() {
            column.clear();
            column.extend(cells.iter().map(|c| c[j]));
            matrix[(row, j)] = reduce(&column);
        }
    }

    let mut metadata_names = request.strata.clone();
    metadata_names.push(OBJECT_COUNT_COLUMN.to_string());
    let profile = Profile::new(metadata_names, metadata, feature_names, matrix)?;

    match request.features {
        Some(selected) => profile.select_features(selected),
        None => Ok(profile),
    }
}

/// Image key → strata values, after the optional site filter.
fn load_strata<S: SingleCellStore + ?Sized>(
    store: &S,
    request: &AggregateRequest<'_>,
) -> Result<HashMap<String, Vec<String>>> {
    let image = store.load_table(request.image_table)?;
    let key_columns = image_key_columns(&image)?;
    let strata_idx = request
        .strata
        .iter()
        .map(|s| image.column_index(s))
        .collect::<Result<Vec<_>>>()?;

    let site_filter = match request.fields {
        Some(fields) => {
            let column = request.site_column.ok_or_else(|| {
                ProfilingError::InvalidParameter(
                    "Restricting fields requires a site column".to_string(),
                )
            })?;
            Some((image.column_index(column)?, fields))
        }
        None => None,
    };

    let mut strata = HashMap::with_capacity(image.rows.len());
    for row in &image.rows {
        if let Some((idx, fields)) = site_filter {
            let site = row[idx].as_f64();
            if !fields.iter().any(|&f| f as f64 == site) {
                continue;
            }
        }
        strata.insert(
            image_key(row, &key_columns),
            strata_idx.iter().map(|&i| row[i].as_text()).collect(),
        );
    }
    debug!(images = strata.len(), "loaded image strata");
    Ok(strata)
}

fn load_compartment<S: SingleCellStore + ?Sized>(
    store: &S,
    name: &str,
    linking: &LinkingColumns,
) -> Result<Compartment> {
    let table = store.load_table(&capitalize(name))?;
    let prefix = format!("{}_", capitalize(name));

    let link_columns: Vec<&str> = linking
        .links
        .get(name)
        .map(|m| m.values().map(String::as_str).collect())
        .unwrap_or_default();
    let features: Vec<usize> = table
        .columns
        .iter()
        .enumerate()
        .filter(|(_, c)| c.starts_with(&prefix) && !link_columns.contains(&c.as_str()))
        .map(|(i, _)| i)
        .collect();

    // Objects are addressed through the column the hub links to.
    let mut by_object = HashMap::new();
    if name != HUB {
        let object_column = linking.get(name, HUB).ok_or_else(|| {
            ProfilingError::Config(format!("No linking column from {} to {}", name, HUB))
        })?;
        let object_idx = table.column_index(object_column)?;
        let key_columns = image_key_columns(&table)?;
        for (i, row) in table.rows.iter().enumerate() {
            by_object.insert((image_key(row, &key_columns), row[object_idx].as_key()), i);
        }
    }

    debug!(
        compartment = name,
        objects = table.rows.len(),
        features = features.len(),
        "loaded compartment"
    );
    Ok(Compartment {
        table,
        features,
        by_object,
    })
}

/// Positions of `TableNumber` (when present) and `ImageNumber`.
fn image_key_columns(table: &StoreTable) -> Result<Vec<usize>> {
    let mut columns = Vec::with_capacity(2);
    if table.has_column(TABLE_NUMBER) {
        columns.push(table.column_index(TABLE_NUMBER)?);
    }
    columns.push(table.column_index(IMAGE_NUMBER)?);
    Ok(columns)
}

fn image_key(row: &[StoreValue], columns: &[usize]) -> String {
    columns
        .iter()
        .map(|&i| row[i].as_key())
        .collect::<Vec<_>>()
        .join("\u{1f}")
}

/// Strata value ordering: numbers first and numerically, then text.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SortKey(String);

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.0.parse::<f64>(), other.0.parse::<f64>()) {
            (Ok(a), Ok(b)) => a.total_cmp(&b).then_with(|| self.0.cmp(&other.0)),
            (Ok(_), Err(_)) => Ordering::Less,
            (Err(_), Ok(_)) => Ordering::Greater,
            (Err(_), Err(_)) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
