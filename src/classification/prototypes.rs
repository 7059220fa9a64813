use itertools::Itertools;
use ndarray::{Array2, ArrayView2, Axis};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Problems with the product catalog files. Any of these is fatal at startup.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed catalog json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("prototype catalog is empty")]
    Empty,
    #[error("prototype {label:?} has dimension {found}, expected {expected}")]
    DimensionMismatch {
        label: String,
        expected: usize,
        found: usize,
    },
    #[error("catalog has {labels} labels, {vectors} vectors and {thresholds} thresholds")]
    LengthMismatch {
        labels: usize,
        vectors: usize,
        thresholds: usize,
    },
    #[error("prototype {0:?} is a zero vector")]
    ZeroVector(String),
    #[error("label {0:?} appears more than once in the catalog")]
    DuplicateLabel(String),
    #[error("threshold given for unknown label {0:?}")]
    UnknownLabel(String),
    #[error("prototype matrix could not be built: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error("embedding dimension {found} does not match the catalog dimension {expected}")]
    EmbeddingDimension { expected: usize, found: usize },
}

#[derive(Debug, Deserialize)]
struct PrototypeEntry {
    label: String,
    embedding: Vec<f32>,
}

/// On-disk threshold file. `per_label` is optional and overrides `tau`.
#[derive(Debug, Deserialize)]
struct ThresholdFile {
    tau: f32,
    #[serde(default)]
    per_label: HashMap<String, f32>,
}

/// The best catalog match for one embedding.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PrototypeMatch {
    pub class_index: usize,
    pub similarity: f32,
}

/// Reference embeddings for every catalog label, with acceptance thresholds.
///
/// Rows of `prototypes` are unit length and follow the order of `labels`.
#[derive(Clone, Debug)]
pub struct PrototypeSet {
    labels: Vec<String>,
    prototypes: Array2<f32>,
    thresholds: Vec<f32>,
}

fn l2_normalize_rows(mut matrix: Array2<f32>) -> Array2<f32> {
    for mut row in matrix.axis_iter_mut(Axis(0)) {
        let norm = row.dot(&row).sqrt();
        if norm > 0.0 {
            row /= norm;
        }
    }
    matrix
}

impl PrototypeSet {
    /// Builds a catalog from labels, raw prototype vectors and per-label
    /// thresholds. Vectors are L2 normalized.
    pub fn new(
        labels: Vec<String>,
        vectors: Vec<Vec<f32>>,
        thresholds: Vec<f32>,
    ) -> Result<Self, CatalogError> {
        let Some(dimension) = vectors.first().map(Vec::len) else {
            return Err(CatalogError::Empty);
        };
        if labels.len() != vectors.len() || labels.len() != thresholds.len() {
            return Err(CatalogError::LengthMismatch {
                labels: labels.len(),
                vectors: vectors.len(),
                thresholds: thresholds.len(),
            });
        }
        if let Some(label) = labels.iter().duplicates().next() {
            return Err(CatalogError::DuplicateLabel(label.clone()));
        }
        for (label, vector) in labels.iter().zip(&vectors) {
            if vector.len() != dimension {
                return Err(CatalogError::DimensionMismatch {
                    label: label.clone(),
                    expected: dimension,
                    found: vector.len(),
                });
            }
            if vector.iter().all(|value| *value == 0.0) {
                return Err(CatalogError::ZeroVector(label.clone()));
            }
        }
        let flat: Vec<f32> = vectors.into_iter().flatten().collect();
        let prototypes = Array2::from_shape_vec((labels.len(), dimension), flat)?;
        Ok(PrototypeSet {
            labels,
            prototypes: l2_normalize_rows(prototypes),
            thresholds,
        })
    }

    /// Parses the prototype list and the threshold file.
    pub fn from_json_strs(prototypes_json: &str, tau_json: &str) -> Result<Self, CatalogError> {
        let entries: Vec<PrototypeEntry> = serde_json::from_str(prototypes_json)?;
        let threshold_file: ThresholdFile = serde_json::from_str(tau_json)?;
        let (labels, vectors): (Vec<String>, Vec<Vec<f32>>) = entries
            .into_iter()
            .map(|entry| (entry.label, entry.embedding))
            .unzip();
        if let Some(unknown) = threshold_file
            .per_label
            .keys()
            .find(|label| !labels.contains(label))
        {
            return Err(CatalogError::UnknownLabel(unknown.clone()));
        }
        let thresholds = labels
            .iter()
            .map(|label| {
                threshold_file
                    .per_label
                    .get(label)
                    .copied()
                    .unwrap_or(threshold_file.tau)
            })
            .collect();
        PrototypeSet::new(labels, vectors, thresholds)
    }

    pub fn from_files(prototypes_path: &Path, tau_path: &Path) -> Result<Self, CatalogError> {
        let read = |path: &Path| {
            fs::read_to_string(path).map_err(|source| CatalogError::Io {
                path: path.to_path_buf(),
                source,
            })
        };
        PrototypeSet::from_json_strs(&read(prototypes_path)?, &read(tau_path)?)
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn label(&self, class_index: usize) -> &str {
        &self.labels[class_index]
    }

    pub fn dimension(&self) -> usize {
        self.prototypes.ncols()
    }

    /// Acceptance threshold for a catalog entry.
    pub fn threshold(&self, class_index: usize) -> f32 {
        self.thresholds[class_index]
    }

    /// Cosine similarity of every embedding (rows) against every prototype:
    /// an (embeddings, prototypes) matrix.
    pub fn similarity_matrix(
        &self,
        embeddings: ArrayView2<f32>,
    ) -> Result<Array2<f32>, CatalogError> {
        if embeddings.ncols() != self.dimension() {
            return Err(CatalogError::EmbeddingDimension {
                expected: self.dimension(),
                found: embeddings.ncols(),
            });
        }
        Ok(embeddings.dot(&self.prototypes.t()))
    }

    /// Nearest prototype for every embedding row.
    pub fn best_matches(
        &self,
        embeddings: ArrayView2<f32>,
    ) -> Result<Vec<PrototypeMatch>, CatalogError> {
        let scores = self.similarity_matrix(embeddings)?;
        Ok(scores
            .axis_iter(Axis(0))
            .map(|row| {
                let class_index = row
                    .iter()
                    .position_max_by(|a, b| a.total_cmp(b))
                    .unwrap_or(0);
                PrototypeMatch {
                    class_index,
                    similarity: row[class_index],
                }
            })
            .collect())
    }
}

/// Scales each row to unit length. Zero rows are left as they are.
pub fn normalize_embeddings(embeddings: Array2<f32>) -> Array2<f32> {
    l2_normalize_rows(embeddings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    const PROTOTYPES: &str = r#"[
        {"label": "cola", "embedding": [2.0, 0.0, 0.0]},
        {"label": "cider", "embedding": [0.0, 1.0, 0.0]},
        {"label": "water", "embedding": [0.0, 0.0, 3.0]}
    ]"#;

    #[test]
    fn loads_global_threshold_and_normalizes() {
        let set = PrototypeSet::from_json_strs(PROTOTYPES, r#"{"tau": 0.4}"#).unwrap();
        assert_eq!(set.labels(), &["cola", "cider", "water"]);
        assert_eq!(set.dimension(), 3);
        for index in 0..3 {
            assert_eq!(set.threshold(index), 0.4);
            let row = set.prototypes.row(index);
            assert!((row.dot(&row).sqrt() - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn per_label_threshold_overrides_global() {
        let set = PrototypeSet::from_json_strs(
            PROTOTYPES,
            r#"{"tau": 0.4, "per_label": {"cider": 0.7}}"#,
        )
        .unwrap();
        assert_eq!(set.threshold(0), 0.4);
        assert_eq!(set.threshold(1), 0.7);
        assert_eq!(set.threshold(2), 0.4);
    }

    #[test]
    fn rejects_bad_catalogs() {
        assert!(matches!(
            PrototypeSet::from_json_strs("[]", r#"{"tau": 0.4}"#),
            Err(CatalogError::Empty)
        ));
        assert!(matches!(
            PrototypeSet::from_json_strs(
                r#"[{"label": "a", "embedding": [1.0, 0.0]}, {"label": "b", "embedding": [1.0]}]"#,
                r#"{"tau": 0.4}"#
            ),
            Err(CatalogError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            PrototypeSet::from_json_strs(PROTOTYPES, r#"{"tau": 0.4, "per_label": {"milk": 0.5}}"#),
            Err(CatalogError::UnknownLabel(_))
        ));
        assert!(matches!(
            PrototypeSet::from_json_strs(
                r#"[{"label": "a", "embedding": [0.0, 0.0]}]"#,
                r#"{"tau": 0.4}"#
            ),
            Err(CatalogError::ZeroVector(_))
        ));
        assert!(matches!(
            PrototypeSet::from_json_strs(PROTOTYPES, "{}"),
            Err(CatalogError::Json(_))
        ));
    }

    #[test]
    fn best_match_is_row_argmax() {
        let set = PrototypeSet::from_json_strs(PROTOTYPES, r#"{"tau": 0.4}"#).unwrap();
        let embeddings = normalize_embeddings(array![[0.0, 0.6, 0.8], [1.0, 0.0, 0.0]]);
        let matches = set.best_matches(embeddings.view()).unwrap();
        assert_eq!(matches[0].class_index, 2);
        assert!((matches[0].similarity - 0.8).abs() < 1e-6);
        assert_eq!(matches[1].class_index, 0);
        assert!((matches[1].similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn similarity_rejects_wrong_dimension() {
        let set = PrototypeSet::from_json_strs(PROTOTYPES, r#"{"tau": 0.4}"#).unwrap();
        let embeddings = array![[1.0_f32, 0.0]];
        assert!(matches!(
            set.similarity_matrix(embeddings.view()),
            Err(CatalogError::EmbeddingDimension {
                expected: 3,
                found: 2
            })
        ));
    }
}
