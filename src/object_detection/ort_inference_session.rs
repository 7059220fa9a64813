use crate::classification::prototypes::CatalogError;
use ndarray::{Array4, ArrayD, IxDyn};
use ort::session::Session;
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::value::TensorRef;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;
use tracing::info;

/// Failures of a model call at request time.
///
/// The pipeline never interprets these, it only propagates them.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("onnxruntime inference failed: {0}")]
    Ort(#[from] ort::Error),
    #[error("unexpected output shape from {model}: {shape:?}")]
    OutputShape { model: String, shape: Vec<i64> },
    #[error("tensor shape mismatch: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error("embeddings do not fit the catalog: {0}")]
    Catalog(#[from] CatalogError),
    #[error("inference session lock poisoned")]
    Poisoned,
}

/// Failures while building an inference session.
#[derive(Debug, Error)]
pub enum SessionLoadError {
    #[error("failed to load onnx model: {0}")]
    Ort(#[from] ort::Error),
    #[error("model {0:?} declares no inputs or outputs")]
    MissingIo(String),
    #[error("device {0} requested but this build has no support for it")]
    UnsupportedDevice(Device),
}

/// Where inference runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cpu,
    Cuda,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda => write!(f, "cuda"),
        }
    }
}

fn session_builder(device: Device) -> Result<SessionBuilder, SessionLoadError> {
    let builder = Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;
    match device {
        Device::Cpu => Ok(builder),
        #[cfg(feature = "cuda")]
        Device::Cuda => Ok(builder.with_execution_providers([
            ort::execution_providers::CUDAExecutionProvider::default().build(),
        ])?),
        #[cfg(not(feature = "cuda"))]
        Device::Cuda => Err(SessionLoadError::UnsupportedDevice(device)),
    }
}

/// An onnxruntime inference session.
///
/// Both models in this project are thin wrappers around one of these. Running
/// a session needs exclusive access, so the session sits behind a mutex and
/// the wrapper can be shared freely between request handlers.
pub struct OrtInferenceSession {
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
    model_name: String,
}

impl OrtInferenceSession {
    pub fn new(model_path: &Path, device: Device) -> Result<Self, SessionLoadError> {
        let session = session_builder(device)?.commit_from_file(model_path)?;
        let model_name = model_path.display().to_string();
        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| SessionLoadError::MissingIo(model_name.clone()))?;
        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or_else(|| SessionLoadError::MissingIo(model_name.clone()))?;
        info!(model = %model_name, %device, input = %input_name, output = %output_name, "loaded onnx model");
        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
            model_name,
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Feeds one NCHW tensor to the first model input and copies the first
    /// output out as an owned array.
    pub fn run(&self, input_array: &Array4<f32>) -> Result<ArrayD<f32>, InferenceError> {
        let mut session = self.session.lock().map_err(|_| InferenceError::Poisoned)?;
        let outputs = session.run(ort::inputs![
            self.input_name.as_str() => TensorRef::from_array_view(input_array)?
        ])?;
        let (shape, data) = outputs[self.output_name.as_str()].try_extract_tensor::<f32>()?;
        if shape.iter().any(|&dim| dim < 0) {
            return Err(InferenceError::OutputShape {
                model: self.model_name.clone(),
                shape: shape.to_vec(),
            });
        }
        let dims: Vec<usize> = shape.iter().map(|&dim| dim as usize).collect();
        Ok(ArrayD::from_shape_vec(IxDyn(&dims), data.to_vec())?)
    }
}
