use thiserror::Error;

/// Errors raised when a box is constructed with impossible geometry.
#[derive(Debug, Error, PartialEq)]
pub enum BoundingBoxError {
    #[error("Failed to create BoundingBox, value for left > value for right ({left} > {right}).")]
    LeftExceedsRight { left: f32, right: f32 },
    #[error("Failed to create BoundingBox, value for top > value for bottom ({top} > {bottom}).")]
    TopExceedsBottom { top: f32, bottom: f32 },
}

/// A struct representing a bounding box as the detector emits it.
///
/// Coordinates are floating point pixels in the frame the detector was run
/// on, using the convention of the left side of the image being x=0 and the
/// top of the image being y=0. The category is the detector's own class name,
/// not a catalog label; catalog labels are assigned later by the embedding
/// stage.
#[derive(Clone, Debug, PartialEq)]
pub struct BoundingBox {
    left: f32,
    top: f32,
    right: f32,
    bottom: f32,
    category: String,
}

impl BoundingBox {
    /// Checks if a box has valid parameters before constructing.
    pub fn new(
        left: f32,
        top: f32,
        right: f32,
        bottom: f32,
        category: String,
    ) -> Result<Self, BoundingBoxError> {
        if left > right {
            Err(BoundingBoxError::LeftExceedsRight { left, right })
        } else if top > bottom {
            Err(BoundingBoxError::TopExceedsBottom { top, bottom })
        } else {
            Ok(BoundingBox {
                left,
                top,
                right,
                bottom,
                category,
            })
        }
    }

    /// Truncates every coordinate toward zero, giving the integer pixel box
    /// the rest of the pipeline works with.
    pub fn to_pixel_box(&self) -> PixelBox {
        PixelBox {
            x1: self.left as i32,
            y1: self.top as i32,
            x2: self.right as i32,
            y2: self.bottom as i32,
        }
    }
}

/// Shared geometry for anything that carries a rectangle.
pub trait BoundingBoxGeometry {
    fn left(&self) -> f32;
    fn top(&self) -> f32;
    fn right(&self) -> f32;
    fn bottom(&self) -> f32;
    fn category(&self) -> &str;

    fn width(&self) -> f32 {
        self.right() - self.left()
    }

    fn height(&self) -> f32 {
        self.bottom() - self.top()
    }

    fn area(&self) -> f32 {
        self.width() * self.height()
    }

    fn as_xyxy(&self) -> (f32, f32, f32, f32) {
        (self.left(), self.top(), self.right(), self.bottom())
    }

    fn intersection_over_union<U: BoundingBoxGeometry>(&self, other: &U) -> f32 {
        let inter_w = (self.right().min(other.right()) - self.left().max(other.left())).max(0.0);
        let inter_h = (self.bottom().min(other.bottom()) - self.top().max(other.top())).max(0.0);
        let intersection = inter_w * inter_h;
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            return 0.0;
        }
        intersection / union
    }
}

impl BoundingBoxGeometry for BoundingBox {
    fn left(&self) -> f32 {
        self.left
    }

    fn top(&self) -> f32 {
        self.top
    }

    fn right(&self) -> f32 {
        self.right
    }

    fn bottom(&self) -> f32 {
        self.bottom
    }

    fn category(&self) -> &str {
        &self.category
    }
}

/// An integer box in top-left-origin pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl PixelBox {
    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    /// Center in top-left coordinates, floored.
    pub fn center(&self) -> (i32, i32) {
        (
            (self.x1 + self.x2).div_euclid(2),
            (self.y1 + self.y2).div_euclid(2),
        )
    }

    /// The y of the box's lower edge measured from the bottom of a frame of
    /// the given height. x, w and h are unaffected by the flip.
    pub fn bottom_left_y(&self, frame_height: u32) -> i32 {
        frame_height as i32 - (self.y1 + self.height())
    }
}

/// Inverse of [`PixelBox::bottom_left_y`].
pub fn top_left_y(bottom_left_y: i32, height: i32, frame_height: u32) -> i32 {
    frame_height as i32 - (bottom_left_y + height)
}
