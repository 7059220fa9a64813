pub mod embedding_model;
pub mod prototypes;
