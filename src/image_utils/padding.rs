use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

/// Gray value used for the letterbox border.
pub const LETTERBOX_FILL: u8 = 114;

/// How a frame was placed inside a square letterbox.
///
/// Keeps what is needed to map detector output back onto the source frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_left: u32,
    pub pad_top: u32,
}

impl Letterbox {
    /// Maps a point in letterboxed coordinates back to the source frame.
    pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_left as f32) / self.scale,
            (y - self.pad_top as f32) / self.scale,
        )
    }
}

/// Resizes an rgb8 image to fit inside a `size`x`size` square without
/// changing its aspect ratio, padding the remainder evenly on both sides.
pub fn letterbox_rgb8(original_image: &RgbImage, size: u32) -> (RgbImage, Letterbox) {
    let (width, height) = original_image.dimensions();
    let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
    let new_width = ((width as f32 * scale).round() as u32).clamp(1, size);
    let new_height = ((height as f32 * scale).round() as u32).clamp(1, size);
    let pad_left = (size - new_width) / 2;
    let pad_top = (size - new_height) / 2;

    let resized = imageops::resize(original_image, new_width, new_height, FilterType::Triangle);
    let mut padded_image = RgbImage::from_pixel(size, size, Rgb([LETTERBOX_FILL; 3]));
    imageops::replace(&mut padded_image, &resized, pad_left as i64, pad_top as i64);
    (
        padded_image,
        Letterbox {
            scale,
            pad_left,
            pad_top,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wide_image_is_padded_top_and_bottom() {
        let img = RgbImage::from_pixel(200, 100, Rgb([10, 20, 30]));
        let (boxed, letterbox) = letterbox_rgb8(&img, 100);
        assert_eq!(boxed.dimensions(), (100, 100));
        assert_eq!(letterbox.scale, 0.5);
        assert_eq!((letterbox.pad_left, letterbox.pad_top), (0, 25));
        assert_eq!(boxed.get_pixel(50, 0), &Rgb([LETTERBOX_FILL; 3]));
        assert_eq!(boxed.get_pixel(50, 50), &Rgb([10, 20, 30]));
    }

    #[test]
    fn padded_corners_map_to_frame_corners() {
        let img = RgbImage::new(640, 480);
        let (_, letterbox) = letterbox_rgb8(&img, 320);
        assert_eq!((letterbox.pad_left, letterbox.pad_top), (0, 40));
        assert_eq!(letterbox.to_source(0.0, 40.0), (0.0, 0.0));
        assert_eq!(letterbox.to_source(320.0, 280.0), (640.0, 480.0));
        assert_eq!(letterbox.to_source(160.0, 160.0), (320.0, 240.0));
    }
}
