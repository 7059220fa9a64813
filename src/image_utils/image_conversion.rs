use image::RgbImage;
use image::imageops::{self, FilterType};
use ndarray::{Array4, ArrayViewMut3, Axis};

/// ImageNet channel means, applied after scaling to [0, 1].
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet channel standard deviations.
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Per-channel normalization applied to a [0, 1] image.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChannelNormalization {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl ChannelNormalization {
    /// Plain [0, 1] scaling, no mean or std adjustment.
    pub const UNIT: ChannelNormalization = ChannelNormalization {
        mean: [0.0, 0.0, 0.0],
        std: [1.0, 1.0, 1.0],
    };

    pub const IMAGENET: ChannelNormalization = ChannelNormalization {
        mean: IMAGENET_MEAN,
        std: IMAGENET_STD,
    };
}

/// Writes an rgb8 image into a (channel, row, column) view, scaling to [0, 1]
/// and then normalizing each channel.
///
/// The view must have the same height and width as the image.
fn write_rgb_image_into_view(
    rgb_image: &RgbImage,
    mut view: ArrayViewMut3<f32>,
    normalization: &ChannelNormalization,
) {
    for (x, y, pixel) in rgb_image.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for channel in 0..3 {
            let value = (pixel.0[channel] as f32) / 255.;
            view[[channel, y, x]] =
                (value - normalization.mean[channel]) / normalization.std[channel];
        }
    }
}

/// Converts an rgb8 image into a (1, 3, height, width) array scaled to [0, 1].
pub fn convert_rgb_image_to_owned_array(
    rgb_image: &RgbImage,
    normalization: &ChannelNormalization,
) -> Array4<f32> {
    let mut image_array = Array4::zeros((
        1,
        3,
        rgb_image.height() as usize,
        rgb_image.width() as usize,
    ));
    write_rgb_image_into_view(
        rgb_image,
        image_array.index_axis_mut(Axis(0), 0),
        normalization,
    );
    image_array
}

/// Resizes every crop to `size`x`size` and stacks them into a single
/// (N, 3, size, size) batch ready for an embedding network.
pub fn stack_crops_as_batch(
    crops: &[RgbImage],
    size: u32,
    normalization: &ChannelNormalization,
) -> Array4<f32> {
    let side = size as usize;
    let mut batch = Array4::zeros((crops.len(), 3, side, side));
    for (crop, view) in crops.iter().zip(batch.axis_iter_mut(Axis(0))) {
        let resized = imageops::resize(crop, size, size, FilterType::Triangle);
        write_rgb_image_into_view(&resized, view, normalization);
    }
    batch
}
