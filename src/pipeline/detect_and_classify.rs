use crate::annotations::bounding_box::{BoundingBox, PixelBox};
use crate::classification::embedding_model::EmbeddingModel;
use crate::classification::prototypes::PrototypeSet;
use crate::image_utils::image_conversion::{ChannelNormalization, stack_crops_as_batch};
use crate::object_detection::object_detection_model::{DetectionParams, ObjectDetectionModel};
use crate::object_detection::ort_inference_session::InferenceError;
use image::RgbImage;
use image::imageops;
use serde::Serialize;
use tracing::debug;

/// Thresholds fixed for the lifetime of the process.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PipelineConfig {
    /// Detector confidence floor.
    pub conf_thr: f32,
    /// IoU above which same-class detections are merged.
    pub iou_thr: f32,
    /// Maximum number of raw detections.
    pub max_det: usize,
    /// Boxes narrower or shorter than this many pixels are dropped. Values
    /// below 1 act as 1, since empty crops cannot be embedded.
    pub min_box: i32,
    /// Floor on detector confidence times similarity.
    pub min_final: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            conf_thr: 0.60,
            iou_thr: 0.50,
            max_det: 100,
            min_box: 10,
            min_final: 0.25,
        }
    }
}

impl PipelineConfig {
    pub fn detection_params(&self) -> DetectionParams {
        DetectionParams {
            confidence: self.conf_thr,
            iou_threshold: self.iou_thr,
            max_detections: self.max_det,
        }
    }
}

/// Width and height of the frame a result belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

/// One accepted product in a frame.
///
/// `x`, `y`, `w`, `h` use a bottom-left origin: `y` is the distance from the
/// bottom of the frame to the bottom edge of the box. `center` stays in the
/// detector's top-left convention and is only used to pick the product nearest
/// the middle of the frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClassifiedDetection {
    pub label: String,
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
    #[serde(skip)]
    pub center: (i32, i32),
    pub final_score: f32,
    pub detector_confidence: f32,
    pub similarity: f32,
}

fn crop(image: &RgbImage, pixel_box: &PixelBox) -> RgbImage {
    imageops::crop_imm(
        image,
        pixel_box.x1.max(0) as u32,
        pixel_box.y1.max(0) as u32,
        pixel_box.width() as u32,
        pixel_box.height() as u32,
    )
    .to_image()
}

/// Detects products in `image` and names each one against the catalog.
///
/// Detections that are too small, too far from every prototype, or whose
/// fused score is too low are dropped silently. The result is sorted by
/// fused score, highest first. Only a failing model call is an error.
pub fn detect_and_classify<D, E>(
    image: &RgbImage,
    detector: &D,
    embedder: &E,
    catalog: &PrototypeSet,
    config: &PipelineConfig,
) -> Result<(Vec<ClassifiedDetection>, FrameSize), InferenceError>
where
    D: ObjectDetectionModel<BoundingBox> + ?Sized,
    E: EmbeddingModel + ?Sized,
{
    let frame = FrameSize {
        width: image.width(),
        height: image.height(),
    };
    let raw_detections = detector.run_inference(image, &config.detection_params())?;
    let raw_count = raw_detections.len();

    let kept: Vec<(PixelBox, f32)> = raw_detections
        .iter()
        .map(|det| (det.annotation.to_pixel_box(), det.confidence))
        .filter(|(pixel_box, _)| {
            let min_side = config.min_box.max(1);
            pixel_box.width() >= min_side && pixel_box.height() >= min_side
        })
        .collect();
    debug!(raw_count, sized = kept.len(), "filtered detections by size");
    if kept.is_empty() {
        return Ok((Vec::new(), frame));
    }

    let crops: Vec<RgbImage> = kept
        .iter()
        .map(|(pixel_box, _)| crop(image, pixel_box))
        .collect();
    let batch = stack_crops_as_batch(&crops, embedder.input_size(), &ChannelNormalization::IMAGENET);
    let embeddings = embedder.embed(&batch)?;
    let matches = catalog.best_matches(embeddings.view())?;

    let mut results: Vec<ClassifiedDetection> = Vec::with_capacity(kept.len());
    for ((pixel_box, detector_confidence), best) in kept.iter().zip(matches) {
        // NaN scores never pass a gate.
        if best.similarity.is_nan() || best.similarity < catalog.threshold(best.class_index) {
            continue;
        }
        let final_score = detector_confidence * best.similarity;
        if final_score.is_nan() || final_score < config.min_final {
            continue;
        }
        results.push(ClassifiedDetection {
            label: catalog.label(best.class_index).to_string(),
            x: pixel_box.x1,
            y: pixel_box.bottom_left_y(frame.height),
            w: pixel_box.width(),
            h: pixel_box.height(),
            center: pixel_box.center(),
            final_score,
            detector_confidence: *detector_confidence,
            similarity: best.similarity,
        });
    }
    results.sort_by(|a, b| b.final_score.total_cmp(&a.final_score));
    debug!(accepted = results.len(), "classified detections");
    Ok((results, frame))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::bounding_box::top_left_y;
    use crate::annotations::detection::Detection;
    use ndarray::{Array2, Array4};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeDetector(Vec<Detection<BoundingBox>>);

    impl ObjectDetectionModel<BoundingBox> for FakeDetector {
        fn run_inference(
            &self,
            _image: &RgbImage,
            _params: &DetectionParams,
        ) -> Result<Vec<Detection<BoundingBox>>, InferenceError> {
            Ok(self.0.clone())
        }
    }

    /// Hands out one preset embedding per crop, in crop order.
    struct FakeEmbedder {
        rows: Vec<[f32; 3]>,
        calls: AtomicUsize,
    }

    impl FakeEmbedder {
        fn new(rows: Vec<[f32; 3]>) -> Self {
            FakeEmbedder {
                rows,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl EmbeddingModel for FakeEmbedder {
        fn input_size(&self) -> u32 {
            8
        }

        fn embed(&self, batch: &Array4<f32>) -> Result<Array2<f32>, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let n = batch.shape()[0];
            let flat: Vec<f32> = self.rows[..n].iter().flatten().copied().collect();
            Ok(Array2::from_shape_vec((n, 3), flat)?)
        }
    }

    fn det(left: f32, top: f32, right: f32, bottom: f32, confidence: f32) -> Detection<BoundingBox> {
        Detection {
            annotation: BoundingBox::new(left, top, right, bottom, "0".to_string()).unwrap(),
            confidence,
        }
    }

    fn catalog(tau: f32) -> PrototypeSet {
        PrototypeSet::new(
            vec!["cola".to_string(), "cider".to_string(), "water".to_string()],
            vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0], vec![0.0, 0.0, 1.0]],
            vec![tau; 3],
        )
        .unwrap()
    }

    fn frame() -> RgbImage {
        RgbImage::new(100, 100)
    }

    #[test]
    fn boxes_below_min_box_are_dropped() {
        let detector = FakeDetector(vec![
            det(0.0, 0.0, 9.0, 30.0, 0.9),
            det(50.0, 50.0, 60.0, 60.0, 0.9),
        ]);
        let embedder = FakeEmbedder::new(vec![[1.0, 0.0, 0.0]]);
        let (results, _) =
            detect_and_classify(&frame(), &detector, &embedder, &catalog(0.2), &PipelineConfig::default())
                .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!((results[0].x, results[0].w, results[0].h), (50, 10, 10));
    }

    #[test]
    fn empty_crop_set_skips_embedding() {
        let detector = FakeDetector(vec![det(0.0, 0.0, 5.0, 5.0, 0.99)]);
        let embedder = FakeEmbedder::new(vec![]);
        let (results, size) =
            detect_and_classify(&frame(), &detector, &embedder, &catalog(0.2), &PipelineConfig::default())
                .unwrap();
        assert!(results.is_empty());
        assert_eq!(size, FrameSize { width: 100, height: 100 });
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn fusion_floor_is_independent_of_tau() {
        let detector = FakeDetector(vec![det(10.0, 10.0, 40.0, 40.0, 0.9)]);
        let embedding = [0.3, 0.0, (1.0_f32 - 0.09).sqrt()];
        let mut config = PipelineConfig {
            min_final: 0.25,
            ..PipelineConfig::default()
        };

        let embedder = FakeEmbedder::new(vec![embedding]);
        let cola_only = PrototypeSet::new(
            vec!["cola".to_string(), "cider".to_string()],
            vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]],
            vec![0.2; 2],
        )
        .unwrap();
        let (results, _) =
            detect_and_classify(&frame(), &detector, &embedder, &cola_only, &config).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].label, "cola");
        assert!((results[0].final_score - 0.27).abs() < 1e-5);
        assert_eq!(
            results[0].final_score,
            results[0].detector_confidence * results[0].similarity
        );

        config.min_final = 0.3;
        let (results, _) =
            detect_and_classify(&frame(), &detector, &embedder, &cola_only, &config).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn similarity_below_label_threshold_is_rejected() {
        let detector = FakeDetector(vec![
            det(0.0, 0.0, 20.0, 20.0, 0.95),
            det(50.0, 50.0, 80.0, 80.0, 0.95),
        ]);
        let embedder = FakeEmbedder::new(vec![[0.6, 0.8, 0.0], [0.0, 0.0, 1.0]]);
        let set = PrototypeSet::new(
            vec!["cola".to_string(), "cider".to_string(), "water".to_string()],
            vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0], vec![0.0, 0.0, 1.0]],
            vec![0.5, 0.9, 0.5],
        )
        .unwrap();
        let (results, _) =
            detect_and_classify(&frame(), &detector, &embedder, &set, &PipelineConfig::default())
                .unwrap();
        // The first crop matches cider at 0.8, under cider's own 0.9.
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].label, "water");
    }

    #[test]
    fn results_are_sorted_and_flipped_to_bottom_left() {
        let detector = FakeDetector(vec![
            det(0.0, 20.0, 30.0, 50.0, 0.7),
            det(60.0, 5.0, 90.0, 25.0, 0.95),
            det(40.0, 60.0, 55.0, 95.0, 0.8),
        ]);
        let embedder = FakeEmbedder::new(vec![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]);
        let config = PipelineConfig::default();
        let (results, size) =
            detect_and_classify(&frame(), &detector, &embedder, &catalog(0.2), &config).unwrap();

        let labels: Vec<&str> = results.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["cider", "water", "cola"]);
        for pair in results.windows(2) {
            assert!(pair[0].final_score >= pair[1].final_score);
        }
        for result in &results {
            assert!(result.final_score >= config.min_final);
            assert!(result.w >= config.min_box && result.h >= config.min_box);
        }

        let cola = &results[2];
        assert_eq!((cola.x, cola.y, cola.w, cola.h), (0, 50, 30, 30));
        assert_eq!(top_left_y(cola.y, cola.h, size.height), 20);
        assert_eq!(cola.center, (15, 35));
    }

    #[test]
    fn nan_scores_are_rejected() {
        let detector = FakeDetector(vec![
            det(0.0, 0.0, 20.0, 20.0, 0.9),
            det(50.0, 50.0, 80.0, 80.0, f32::NAN),
        ]);
        let embedder = FakeEmbedder::new(vec![[f32::NAN; 3], [1.0, 0.0, 0.0]]);
        let config = PipelineConfig {
            min_final: 0.0,
            ..PipelineConfig::default()
        };
        let (results, _) =
            detect_and_classify(&frame(), &detector, &embedder, &catalog(0.5), &config).unwrap();
        assert!(results.is_empty(), "accepted {results:?}");
    }

    #[test]
    fn scores_equal_to_thresholds_are_accepted() {
        let detector = FakeDetector(vec![det(10.0, 10.0, 40.0, 40.0, 0.5)]);
        let embedder = FakeEmbedder::new(vec![[0.5, 0.0, 0.0]]);
        let config = PipelineConfig {
            min_final: 0.25,
            ..PipelineConfig::default()
        };
        let (results, _) =
            detect_and_classify(&frame(), &detector, &embedder, &catalog(0.5), &config).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].similarity, 0.5);
        assert_eq!(results[0].final_score, 0.25);
    }

    #[test]
    fn detector_failure_propagates() {
        struct BrokenDetector;
        impl ObjectDetectionModel<BoundingBox> for BrokenDetector {
            fn run_inference(
                &self,
                _image: &RgbImage,
                _params: &DetectionParams,
            ) -> Result<Vec<Detection<BoundingBox>>, InferenceError> {
                Err(InferenceError::Poisoned)
            }
        }
        let embedder = FakeEmbedder::new(vec![]);
        let result = detect_and_classify(
            &frame(),
            &BrokenDetector,
            &embedder,
            &catalog(0.2),
            &PipelineConfig::default(),
        );
        assert!(matches!(result, Err(InferenceError::Poisoned)));
    }
}
