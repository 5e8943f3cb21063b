//! Batch documents and the derived per-batch plate list.

use serde::{Deserialize, Deserializer, Serialize};

/// One batch document as written in the configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchDocument {
    pub batch: String,
    pub process: bool,
    pub plates: Vec<PlateDocument>,
}

/// One plate entry of a batch document.
#[derive(Debug, Clone, Deserialize)]
pub struct PlateDocument {
    #[serde(deserialize_with = "scalar_string")]
    pub name: String,
    pub process: bool,
    #[serde(default)]
    pub cell_line: Option<String>,
}

/// A plate selected for processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plate {
    pub name: String,
    pub cell_line: Option<String>,
}

impl Plate {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            cell_line: None,
        }
    }
}

/// A batch and its plates selected for processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub name: String,
    pub plates: Vec<Plate>,
}

/// Ordered batch → plates mapping derived from the batch documents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileConfig {
    pub batches: Vec<Batch>,
}

impl ProfileConfig {
    pub fn new(batches: Vec<Batch>) -> Self {
        Self { batches }
    }

    pub fn batch(&self, name: &str) -> Option<&Batch> {
        self.batches.iter().find(|b| b.name == name)
    }

    /// Whether a (batch, plate) pair is scheduled.
    pub fn contains(&self, batch: &str, plate: &str) -> bool {
        self.batch(batch)
            .map(|b| b.plates.iter().any(|p| p.name == plate))
            .unwrap_or(false)
    }

    /// Total number of plates over all batches.
    pub fn n_plates(&self) -> usize {
        self.batches.iter().map(|b| b.plates.len()).sum()
    }
}

/// Plate names may be written as YAML numbers; keep them as text.
fn scalar_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match serde_yaml::Value::deserialize(deserializer)? {
        serde_yaml::Value::String(s) => Ok(s),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        other => Err(D::Error::custom(format!(
            "plate name must be a scalar, got {:?}",
            other
        ))),
    }
}
