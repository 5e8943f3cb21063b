//! Resolution of the measurement columns a stage works on.

use crate::config::{FeatureSpec, CANONICAL_COMPARTMENTS};
use crate::data::Profile;
use crate::error::{ProfilingError, Result};

/// Capitalize the first character and lower-case the rest.
///
/// `"mito"` becomes `"Mito"`, but `"MyComp"` becomes `"Mycomp"`.
pub fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

/// Column prefixes used to infer measurement columns.
///
/// The configured compartments are used when any of them is non-canonical,
/// otherwise the canonical three.
pub fn compartment_prefixes(compartments: &[String], image_features: bool) -> Vec<String> {
    let noncanonical = compartments
        .iter()
        .any(|c| !CANONICAL_COMPARTMENTS.contains(&c.to_lowercase().as_str()));

    let mut prefixes: Vec<String> = if noncanonical {
        compartments
            .iter()
            .map(|c| format!("{}_", capitalize(c)))
            .collect()
    } else {
        CANONICAL_COMPARTMENTS
            .iter()
            .map(|c| format!("{}_", capitalize(c)))
            .collect()
    };
    if image_features {
        prefixes.push("Image_".to_string());
    }
    prefixes
}

/// Measurement columns of `profile` whose names start with one of the
/// compartment prefixes, in table order.
pub fn infer_cp_features(
    profile: &Profile,
    compartments: &[String],
    image_features: bool,
) -> Result<Vec<String>> {
    let prefixes = compartment_prefixes(compartments, image_features);
    let features: Vec<String> = profile
        .feature_names()
        .iter()
        .filter(|f| prefixes.iter().any(|p| f.starts_with(p.as_str())))
        .cloned()
        .collect();

    if features.is_empty() {
        return Err(ProfilingError::EmptyData(format!(
            "No measurement columns start with any of {:?}",
            prefixes
        )));
    }
    Ok(features)
}

/// Resolve a [`FeatureSpec`] against a loaded profile.
///
/// Explicit names must all be present.
pub fn resolve_features(
    spec: &FeatureSpec,
    profile: &Profile,
    compartments: &[String],
    image_features: bool,
) -> Result<Vec<String>> {
    match spec {
        FeatureSpec::Infer => infer_cp_features(profile, compartments, image_features),
        FeatureSpec::Explicit(names) => {
            for name in names {
                profile.feature_index(name)?;
            }
            Ok(names.clone())
        }
    }
}
