use crate::classification::prototypes::CatalogError;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Catalog label to human-facing product name.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(transparent)]
pub struct DisplayNames(HashMap<String, String>);

impl DisplayNames {
    pub fn from_json_str(json: &str) -> Result<Self, CatalogError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, CatalogError> {
        let json = fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        DisplayNames::from_json_str(&json)
    }

    /// The display name for `label`, or the label itself when none is known.
    pub fn resolve<'a>(&'a self, label: &'a str) -> &'a str {
        self.0.get(label).map(String::as_str).unwrap_or(label)
    }
}
