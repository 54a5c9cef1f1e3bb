//! Data model of a single loop tick.
//!
use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Positive additive constant to avoid divide-by-zero.
const EPS: f32 = 1.0e-7;

/// Immutable snapshot of a captured RGB frame.
///
/// A frame is owned by the loop tick that captured it and dropped at its end.
#[derive(Clone, Debug)]
pub struct Frame {
    image: RgbImage,
}

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Self { image }
    }

    /// Build a frame from packed RGB8 data, `None` if the buffer is too small.
    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        RgbImage::from_raw(width, height, data).map(Self::new)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// A frame without pixels cannot be fed to a model.
    pub fn is_empty(&self) -> bool {
        self.image.width() == 0 || self.image.height() == 0
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }
}

/// Axis-aligned box in original frame pixels, top-left corner form.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Convert a center-form box in model input space into corner form in frame space.
    ///
    /// `scale` is the ratio of original frame size to model input size per axis.
    pub fn from_center(cx: f32, cy: f32, width: f32, height: f32, scale: (f32, f32)) -> Self {
        let (scale_x, scale_y) = scale;
        Self {
            x: (cx - width / 2.0) * scale_x,
            y: (cy - height / 2.0) * scale_y,
            width: width * scale_x,
            height: height * scale_y,
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    /// Area enclosed by the box, zero for degenerate boxes.
    pub fn area(&self) -> f32 {
        if self.width < 0.0 || self.height < 0.0 {
            return 0.0;
        }
        self.width * self.height
    }

    /// Calculate the intersection-over-union metric with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        // If the boxes do not overlap, the overlap extents are negative and clamp to zero.
        let overlap_width = (self.right().min(other.right()) - self.x.max(other.x)).max(0.0);
        let overlap_height = (self.bottom().min(other.bottom()) - self.y.max(other.y)).max(0.0);
        let overlap_area = overlap_width * overlap_height;

        overlap_area / (self.area() + other.area() - overlap_area + EPS)
    }

    /// The same box in a horizontally flipped frame of width `frame_width`.
    pub fn mirrored(&self, frame_width: f32) -> Self {
        Self {
            x: frame_width - self.x - self.width,
            ..*self
        }
    }
}

/// Single object found by a detection model.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub class_id: usize,
    /// Score of the winning class in `[0, 1]`.
    pub confidence: f32,
}

/// Ranked entry of a classification result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub class_name: String,
    pub probability: f32,
}

/// Structured model output of one tick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "items", rename_all = "snake_case")]
pub enum Results {
    Classification(Vec<Prediction>),
    Detection(Vec<Detection>),
}

impl Results {
    pub fn len(&self) -> usize {
        match self {
            Results::Classification(predictions) => predictions.len(),
            Results::Detection(detections) => detections.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Results of the most recent rendered tick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TickResults {
    pub sequence: u64,
    pub results: Results,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_center_to_corner_form() {
        let bbox = BoundingBox::from_center(100.0, 100.0, 50.0, 50.0, (1.0, 1.0));
        assert_eq!(bbox, BoundingBox::new(75.0, 75.0, 50.0, 50.0));
    }

    #[test]
    fn test_center_to_corner_form_scaled() {
        let bbox = BoundingBox::from_center(32.0, 16.0, 8.0, 4.0, (2.0, 3.0));
        assert_eq!(bbox, BoundingBox::new(56.0, 42.0, 16.0, 12.0));
    }

    #[test]
    fn test_iou() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 0.0, 10.0, 10.0);
        let disjoint = BoundingBox::new(20.0, 20.0, 5.0, 5.0);

        assert!((a.iou(&a) - 1.0).abs() < 1e-5);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-5);
        assert_eq!(a.iou(&disjoint), 0.0);
    }

    #[test]
    fn test_mirrored() {
        let bbox = BoundingBox::new(10.0, 5.0, 20.0, 8.0);
        assert_eq!(bbox.mirrored(100.0), BoundingBox::new(70.0, 5.0, 20.0, 8.0));
        assert_eq!(bbox.mirrored(100.0).mirrored(100.0), bbox);
    }

    #[test]
    fn test_empty_frame() {
        let frame = Frame::new(RgbImage::new(0, 0));
        assert!(frame.is_empty());
        assert!(Frame::from_raw(2, 2, vec![0; 3]).is_none());
        assert!(!Frame::from_raw(1, 1, vec![0; 3]).unwrap().is_empty());
    }
}
