use crate::annotations::bounding_box::BoundingBoxGeometry;
use crate::annotations::detection::Detection;
use crate::object_detection::ort_inference_session::InferenceError;
use image::RgbImage;

/// Knobs passed to a detector on every call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectionParams {
    /// Detections below this confidence are dropped before suppression.
    pub confidence: f32,
    /// Same-class boxes overlapping more than this are de-duplicated.
    pub iou_threshold: f32,
    /// Upper bound on the number of detections returned.
    pub max_detections: usize,
}

/// Defines a trait that all object detection models must follow.
///
/// Implementations take the full frame and return detections in the frame's
/// own top-left-origin pixel coordinates, already filtered by confidence,
/// de-duplicated and sorted by confidence descending.
pub trait ObjectDetectionModel<T: BoundingBoxGeometry> {
    fn run_inference(
        &self,
        image: &RgbImage,
        params: &DetectionParams,
    ) -> Result<Vec<Detection<T>>, InferenceError>;
}
