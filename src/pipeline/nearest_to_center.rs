use crate::annotations::point::Point;
use crate::pipeline::detect_and_classify::{ClassifiedDetection, FrameSize};

/// Picks the detection whose center is closest to the middle of the frame.
///
/// The second value is true whenever two or more detections were passed in,
/// however far apart they are. Equal distances resolve to the earliest entry.
pub fn select_nearest(
    detections: &[ClassifiedDetection],
    frame: FrameSize,
) -> (Option<&ClassifiedDetection>, bool) {
    let frame_center = Point {
        x: frame.width as f64 / 2.0,
        y: frame.height as f64 / 2.0,
    };
    let nearest = detections
        .iter()
        .map(|det| (Point::from(det.center).distance_to(&frame_center), det))
        .min_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, det)| det);
    (nearest, detections.len() >= 2)
}
