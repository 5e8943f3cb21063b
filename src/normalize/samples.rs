//! Selection of the rows that normalization statistics come from.

use crate::data::Profile;
use crate::data::format::parse_value;
use crate::error::{ProfilingError, Result};
use regex::Regex;
use std::sync::OnceLock;

fn equality_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"^\s*([A-Za-z_][A-Za-z0-9_]*)\s*==\s*(?:'([^']*)'|"([^"]*)")\s*$"#)
            .expect("sample pattern is a valid regex")
    })
}

/// Which rows of a profile contribute to normalization statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleSelection {
    predicate: Predicate,
    min_count: Option<(String, f64)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Predicate {
    All,
    Equals { column: String, value: String },
}

impl SampleSelection {
    /// Every row.
    pub fn all() -> Self {
        Self {
            predicate: Predicate::All,
            min_count: None,
        }
    }

    /// Parse `all` or `<column> == '<value>'`.
    pub fn parse(samples: &str) -> Result<Self> {
        if samples.trim() == "all" {
            return Ok(Self::all());
        }
        let caps = equality_pattern().captures(samples).ok_or_else(|| {
            ProfilingError::InvalidParameter(format!(
                "Unsupported sample selection '{}'; expected all or <column> == '<value>'",
                samples
            ))
        })?;
        let value = caps.get(2).or_else(|| caps.get(3)).map_or("", |m| m.as_str());
        Ok(Self {
            predicate: Predicate::Equals {
                column: caps[1].to_string(),
                value: value.to_string(),
            },
            min_count: None,
        })
    }

    /// Additionally require `column >= min` (rows with a missing count are excluded).
    pub fn with_min_count(mut self, column: &str, min: f64) -> Self {
        self.min_count = Some((column.to_string(), min));
        self
    }

    /// Row indices of `profile` that satisfy the selection, in order.
    pub fn select(&self, profile: &Profile) -> Result<Vec<usize>> {
        let mut keep: Vec<bool> = vec![true; profile.n_rows()];

        if let Predicate::Equals { column, value } = &self.predicate {
            for (k, v) in keep.iter_mut().zip(profile.metadata_column(column)?) {
                *k &= v == value.as_str();
            }
        }
        if let Some((column, min)) = &self.min_count {
            for (k, v) in keep.iter_mut().zip(profile.metadata_column(column)?) {
                let count = parse_value(v).unwrap_or(f64::NAN);
                *k &= count >= *min;
            }
        }

        Ok(keep
            .iter()
            .enumerate()
            .filter(|(_, &k)| k)
            .map(|(i, _)| i)
            .collect())
    }
}
