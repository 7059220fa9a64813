use crate::annotations::bounding_box::BoundingBox;
use crate::annotations::detection::Detection;
use crate::image_utils::image_conversion::{ChannelNormalization, convert_rgb_image_to_owned_array};
use crate::image_utils::padding::{Letterbox, letterbox_rgb8};
use crate::object_detection::object_detection_model::{DetectionParams, ObjectDetectionModel};
use crate::object_detection::object_detection_utils::non_maximum_suppression;
use crate::object_detection::ort_inference_session::{
    Device, InferenceError, OrtInferenceSession, SessionLoadError,
};
use image::RgbImage;
use ndarray::{ArrayView2, Axis, Ix3};
use std::path::Path;
use tracing::debug;

/// A YOLO detector exported to ONNX by Ultralytics.
///
/// The model takes a square (1, 3, size, size) input and produces
/// (1, 4 + classes, anchors) where the first four rows are the box center,
/// width and height in input pixels and the rest are per-class scores.
pub struct Yolov11BoundingBox {
    ort_session: OrtInferenceSession,
    input_size: u32,
}

impl Yolov11BoundingBox {
    pub fn new(model_path: &Path, input_size: u32, device: Device) -> Result<Self, SessionLoadError> {
        let ort_session = OrtInferenceSession::new(model_path, device)?;
        Ok(Yolov11BoundingBox {
            ort_session,
            input_size,
        })
    }
}

impl ObjectDetectionModel<BoundingBox> for Yolov11BoundingBox {
    fn run_inference(
        &self,
        image: &RgbImage,
        params: &DetectionParams,
    ) -> Result<Vec<Detection<BoundingBox>>, InferenceError> {
        let (boxed, letterbox) = letterbox_rgb8(image, self.input_size);
        let input_array = convert_rgb_image_to_owned_array(&boxed, &ChannelNormalization::UNIT);
        let output = self.ort_session.run(&input_array)?;
        let output_shape: Vec<i64> = output.shape().iter().map(|&dim| dim as i64).collect();
        let output = output
            .into_dimensionality::<Ix3>()
            .map_err(|_| InferenceError::OutputShape {
                model: self.ort_session.model_name().to_string(),
                shape: output_shape.clone(),
            })?;
        let predictions = output.index_axis(Axis(0), 0);
        // Ultralytics exports (features, anchors); some exporters transpose it.
        let predictions = if predictions.nrows() <= predictions.ncols() {
            predictions
        } else {
            predictions.reversed_axes()
        };
        if predictions.nrows() <= 4 {
            return Err(InferenceError::OutputShape {
                model: self.ort_session.model_name().to_string(),
                shape: output_shape,
            });
        }
        let candidates = decode_predictions(
            predictions,
            &letterbox,
            image.dimensions(),
            params.confidence,
        );
        let candidate_count = candidates.len();
        let mut detections = non_maximum_suppression(candidates, params.iou_threshold);
        detections.truncate(params.max_detections);
        debug!(candidate_count, kept = detections.len(), "decoded detector output");
        Ok(detections)
    }
}

/// Turns a (4 + classes, anchors) prediction matrix into detections on the
/// source frame.
///
/// Each anchor is scored by its best class. Anchors under `confidence` are
/// dropped; the rest are mapped out of the letterbox and clipped to the frame.
pub fn decode_predictions(
    predictions: ArrayView2<f32>,
    letterbox: &Letterbox,
    (frame_width, frame_height): (u32, u32),
    confidence: f32,
) -> Vec<Detection<BoundingBox>> {
    let mut detections: Vec<Detection<BoundingBox>> = Vec::new();
    for anchor in predictions.axis_iter(Axis(1)) {
        let best_class = anchor
            .iter()
            .skip(4) // skips bounding box coords.
            .copied()
            .enumerate()
            .reduce(|accum, row| if row.1 > accum.1 { row } else { accum });
        let Some((class_id, prob)) = best_class else {
            continue;
        };
        if prob.is_nan() || prob < confidence {
            continue;
        }
        let (x, y, w, h) = (anchor[0], anchor[1], anchor[2], anchor[3]);
        let (left, top) = letterbox.to_source(x - (w / 2.0), y - (h / 2.0));
        let (right, bottom) = letterbox.to_source(x + (w / 2.0), y + (h / 2.0));
        let bbox = BoundingBox::new(
            left.clamp(0.0, frame_width as f32),
            top.clamp(0.0, frame_height as f32),
            right.clamp(0.0, frame_width as f32),
            bottom.clamp(0.0, frame_height as f32),
            class_id.to_string(),
        );
        // A box with negative extent cannot be built; such anchors are noise.
        if let Ok(annotation) = bbox {
            detections.push(Detection {
                annotation,
                confidence: prob,
            });
        }
    }
    detections
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::bounding_box::BoundingBoxGeometry;
    use ndarray::Array2;

    fn identity_letterbox() -> Letterbox {
        Letterbox {
            scale: 1.0,
            pad_left: 0,
            pad_top: 0,
        }
    }

    #[test]
    fn decodes_best_class_and_corners() {
        // Two anchors, two classes. Rows: cx, cy, w, h, class0, class1.
        let predictions = Array2::from_shape_vec(
            (6, 2),
            vec![
                50.0, 10.0, // cx
                40.0, 10.0, // cy
                20.0, 4.0, // w
                10.0, 4.0, // h
                0.1, 0.2, // class 0
                0.9, 0.3, // class 1
            ],
        )
        .unwrap();
        let dets = decode_predictions(predictions.view(), &identity_letterbox(), (100, 100), 0.5);
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].confidence, 0.9);
        assert_eq!(dets[0].annotation.category(), "1");
        assert_eq!(dets[0].annotation.as_xyxy(), (40.0, 35.0, 60.0, 45.0));
    }

    #[test]
    fn keeps_scores_at_threshold_and_drops_nan() {
        let predictions = Array2::from_shape_vec(
            (5, 2),
            vec![
                20.0, 60.0, // cx
                20.0, 60.0, // cy
                10.0, 10.0, // w
                10.0, 10.0, // h
                0.5, f32::NAN, // class 0
            ],
        )
        .unwrap();
        let dets = decode_predictions(predictions.view(), &identity_letterbox(), (100, 100), 0.5);
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].confidence, 0.5);
        assert_eq!(dets[0].annotation.as_xyxy(), (15.0, 15.0, 25.0, 25.0));
    }

    #[test]
    fn undoes_letterbox_and_clips_to_frame() {
        let letterbox = Letterbox {
            scale: 0.5,
            pad_left: 0,
            pad_top: 25,
        };
        let predictions =
            Array2::from_shape_vec((5, 1), vec![95.0, 50.0, 20.0, 10.0, 0.8]).unwrap();
        let dets = decode_predictions(predictions.view(), &letterbox, (200, 100), 0.5);
        assert_eq!(dets.len(), 1);
        // x: (85..105) / 0.5 = 170..210, clipped at 200. y: (45..55 - 25) / 0.5 = 40..60.
        assert_eq!(dets[0].annotation.as_xyxy(), (170.0, 40.0, 200.0, 60.0));
    }
}
