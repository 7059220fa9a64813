use crate::classification::prototypes::normalize_embeddings;
use crate::object_detection::ort_inference_session::{
    Device, InferenceError, OrtInferenceSession, SessionLoadError,
};
use ndarray::{Array2, Array4, Ix2};
use std::path::Path;

/// Maps a batch of crops to unit-length embedding vectors.
pub trait EmbeddingModel {
    /// Side length of the square crops the model expects.
    fn input_size(&self) -> u32;

    /// Embeds an (N, 3, size, size) batch into an (N, dimension) matrix whose
    /// rows are unit length. Callers never pass an empty batch.
    fn embed(&self, batch: &Array4<f32>) -> Result<Array2<f32>, InferenceError>;
}

/// Crop embedding network exported to ONNX.
pub struct OnnxEmbedder {
    ort_session: OrtInferenceSession,
    input_size: u32,
}

impl OnnxEmbedder {
    pub fn new(model_path: &Path, input_size: u32, device: Device) -> Result<Self, SessionLoadError> {
        let ort_session = OrtInferenceSession::new(model_path, device)?;
        Ok(OnnxEmbedder {
            ort_session,
            input_size,
        })
    }
}

impl EmbeddingModel for OnnxEmbedder {
    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn embed(&self, batch: &Array4<f32>) -> Result<Array2<f32>, InferenceError> {
        let output = self.ort_session.run(batch)?;
        let shape: Vec<i64> = output.shape().iter().map(|&dim| dim as i64).collect();
        let embeddings = output
            .into_dimensionality::<Ix2>()
            .map_err(|_| InferenceError::OutputShape {
                model: self.ort_session.model_name().to_string(),
                shape: shape.clone(),
            })?;
        if embeddings.nrows() != batch.shape()[0] {
            return Err(InferenceError::OutputShape {
                model: self.ort_session.model_name().to_string(),
                shape,
            });
        }
        Ok(normalize_embeddings(embeddings))
    }
}
