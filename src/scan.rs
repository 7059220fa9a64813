use crate::image_utils::image_io::{has_image_extension, read_image_as_rgb8};
use crate::pipeline::detect_and_classify::{ClassifiedDetection, FrameSize};
use crate::pipeline::model_provider::Recognizer;
use crate::pipeline::nearest_to_center::select_nearest;
use anyhow::Context;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

#[derive(Serialize)]
struct Nearest<'a> {
    nearest: Option<&'a str>,
    multiple: bool,
}

#[derive(Serialize)]
struct ScanRecord<'a> {
    path: &'a Path,
    width: u32,
    height: u32,
    detections: &'a [ClassifiedDetection],
    #[serde(flatten)]
    selection: Option<Nearest<'a>>,
}

/// Expands directories into the image files below them, in file name order.
fn collect_images(roots: &[PathBuf]) -> Vec<PathBuf> {
    let mut images = Vec::new();
    for root in roots {
        for entry in WalkDir::new(root).sort_by_file_name() {
            match entry {
                Ok(entry) if entry.file_type().is_file() && has_image_extension(entry.path()) => {
                    images.push(entry.into_path())
                }
                Ok(_) => {}
                Err(err) => warn!(root = %root.display(), "skipping unreadable entry: {err}"),
            }
        }
    }
    images
}

/// Runs `recognizer` over every image under `roots`, writing one JSON line per
/// image. Images that cannot be read are skipped. Returns how many were
/// written.
pub fn scan_paths(
    recognizer: &dyn Recognizer,
    roots: &[PathBuf],
    nearest: bool,
    out: &mut impl Write,
) -> anyhow::Result<usize> {
    let images = collect_images(roots);
    info!(images = images.len(), "scanning");
    let mut written = 0;
    for path in &images {
        let image = match read_image_as_rgb8(path) {
            Ok(image) => image,
            Err(err) => {
                warn!(path = %path.display(), "skipping image: {err}");
                continue;
            }
        };
        let (detections, FrameSize { width, height }) = recognizer
            .infer(&image)
            .with_context(|| format!("inference failed on {}", path.display()))?;
        let selection = nearest.then(|| {
            let (closest, multiple) = select_nearest(&detections, FrameSize { width, height });
            Nearest {
                nearest: closest.map(|det| det.label.as_str()),
                multiple,
            }
        });
        let record = ScanRecord {
            path,
            width,
            height,
            detections: &detections,
            selection,
        };
        serde_json::to_writer(&mut *out, &record)?;
        writeln!(out)?;
        written += 1;
    }
    Ok(written)
}
