use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::filter::FilterSpec;
use crate::reader::coerce;

/// Declarative engine configuration.
///
/// Pair lists stand in for the source configuration maps so that rule
/// order survives serialization; a YAML front-end would translate its
/// maps into this shape. JSON loading is provided directly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationSpec {
    /// Target class name.
    pub target: String,
    /// `header -> comma-separated path list` entries.
    #[serde(default)]
    pub fields: Vec<(String, String)>,
    /// `path -> literal` default entries.
    #[serde(default)]
    pub defaults: Vec<(String, String)>,
    /// Per-attribute filter rule lists.
    #[serde(default)]
    pub filters: Vec<FilterSpecEntry>,
    /// First record to migrate, 1-based inclusive.
    #[serde(default)]
    pub from: Option<u64>,
    /// Record to stop at, 1-based exclusive.
    #[serde(default)]
    pub to: Option<u64>,
    /// Unique-mode secondary keys.
    #[serde(default)]
    pub unique: bool,
    /// Advisory create flag for the persistence layer.
    #[serde(default)]
    pub create: bool,
    /// Rejects CSV path.
    #[serde(default)]
    pub rejects: Option<PathBuf>,
    /// Extract sink configuration.
    #[serde(default)]
    pub extract: Option<ExtractSpec>,
}

/// Extract sink configuration: a plain file, or a CSV when headers are
/// supplied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractSpec {
    pub path: PathBuf,
    #[serde(default)]
    pub headers: Option<Vec<String>>,
}

/// Filter rules for one attribute path; `None` replacements encode
/// absent (the `~` spelling).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterSpecEntry {
    pub path: String,
    pub rules: Vec<(String, Option<String>)>,
}

impl FilterSpecEntry {
    /// Lowers the serialized rules into a [`FilterSpec`], coercing
    /// replacement literals the way the reader coerces cells.
    #[must_use]
    pub fn to_filter_spec(&self) -> FilterSpec {
        let mut spec = FilterSpec::new();
        for (key, replacement) in &self.rules {
            spec = match replacement {
                None => spec.absent(key),
                Some(literal) => match coerce(literal) {
                    Some(value) => spec.entry(key, value),
                    None => spec.absent(key),
                },
            };
        }
        spec
    }
}

impl MigrationSpec {
    /// Parses a spec from JSON.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the document does not match
    /// the spec shape.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::config(format!("invalid migration spec: {e}")))
    }
}
