use crate::annotations::bounding_box::BoundingBox;
use crate::classification::embedding_model::{EmbeddingModel, OnnxEmbedder};
use crate::classification::prototypes::{CatalogError, PrototypeSet};
use crate::object_detection::object_detection_model::ObjectDetectionModel;
use crate::object_detection::ort_inference_session::{Device, InferenceError, SessionLoadError};
use crate::object_detection::yolov11_bounding_box::Yolov11BoundingBox;
use crate::pipeline::detect_and_classify::{
    ClassifiedDetection, FrameSize, PipelineConfig, detect_and_classify,
};
use image::RgbImage;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::info;

/// Anything that stops the models from being loaded. The service cannot run
/// without them.
#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("detector: {0}")]
    Detector(SessionLoadError),
    #[error("embedder: {0}")]
    Embedder(SessionLoadError),
    #[error("catalog: {0}")]
    Catalog(#[from] CatalogError),
    #[error("model provider lock poisoned")]
    Poisoned,
}

/// Where the model files live and how to run them.
#[derive(Clone, Debug)]
pub struct ModelPaths {
    pub detector: PathBuf,
    pub embedder: PathBuf,
    pub prototypes: PathBuf,
    pub tau: PathBuf,
    pub detector_input_size: u32,
    pub embedder_input_size: u32,
    pub device: Device,
}

/// Everything inference needs, loaded once and never mutated afterwards.
pub struct ModelContext<D = Yolov11BoundingBox, E = OnnxEmbedder> {
    pub detector: D,
    pub embedder: E,
    pub prototypes: PrototypeSet,
}

impl ModelContext {
    pub fn load(paths: &ModelPaths) -> Result<Self, ModelLoadError> {
        let detector =
            Yolov11BoundingBox::new(&paths.detector, paths.detector_input_size, paths.device)
                .map_err(ModelLoadError::Detector)?;
        let embedder = OnnxEmbedder::new(&paths.embedder, paths.embedder_input_size, paths.device)
            .map_err(ModelLoadError::Embedder)?;
        let prototypes = PrototypeSet::from_files(&paths.prototypes, &paths.tau)?;
        info!(
            labels = prototypes.labels().len(),
            dimension = prototypes.dimension(),
            device = %paths.device,
            "models ready"
        );
        Ok(ModelContext {
            detector,
            embedder,
            prototypes,
        })
    }
}

impl<D, E> ModelContext<D, E>
where
    D: ObjectDetectionModel<BoundingBox>,
    E: EmbeddingModel,
{
    pub fn infer(
        &self,
        image: &RgbImage,
        config: &PipelineConfig,
    ) -> Result<(Vec<ClassifiedDetection>, FrameSize), InferenceError> {
        detect_and_classify(image, &self.detector, &self.embedder, &self.prototypes, config)
    }
}

type Loader<T> = Box<dyn Fn() -> Result<T, ModelLoadError> + Send + Sync>;

/// Loads models on first use and hands out the same instance afterwards.
///
/// Concurrent first calls are serialized, so the loader runs at most once per
/// successful load. A failed load is not cached; the next call tries again.
pub struct ModelProvider<T> {
    loader: Loader<T>,
    slot: Mutex<Option<Arc<T>>>,
}

impl<T> ModelProvider<T> {
    pub fn new(loader: impl Fn() -> Result<T, ModelLoadError> + Send + Sync + 'static) -> Self {
        ModelProvider {
            loader: Box::new(loader),
            slot: Mutex::new(None),
        }
    }

    pub fn acquire(&self) -> Result<Arc<T>, ModelLoadError> {
        let mut slot = self.slot.lock().map_err(|_| ModelLoadError::Poisoned)?;
        if let Some(models) = slot.as_ref() {
            return Ok(Arc::clone(models));
        }
        let models = Arc::new((self.loader)()?);
        *slot = Some(Arc::clone(&models));
        Ok(models)
    }
}

impl ModelProvider<ModelContext> {
    pub fn from_paths(paths: ModelPaths) -> Self {
        ModelProvider::new(move || ModelContext::load(&paths))
    }
}

/// The seam between the service and the pipeline.
pub trait Recognizer: Send + Sync {
    fn infer(&self, image: &RgbImage) -> Result<(Vec<ClassifiedDetection>, FrameSize), InferenceError>;
}

/// Shared models plus the thresholds they run with.
pub struct Pipeline<D = Yolov11BoundingBox, E = OnnxEmbedder> {
    pub models: Arc<ModelContext<D, E>>,
    pub config: PipelineConfig,
}

impl<D, E> Recognizer for Pipeline<D, E>
where
    D: ObjectDetectionModel<BoundingBox> + Send + Sync,
    E: EmbeddingModel + Send + Sync,
{
    fn infer(&self, image: &RgbImage) -> Result<(Vec<ClassifiedDetection>, FrameSize), InferenceError> {
        self.models.infer(image, &self.config)
    }
}
