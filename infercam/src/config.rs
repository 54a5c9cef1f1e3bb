//! Typed configuration of the inference loop.
//!
use std::{fmt, path::PathBuf, str::FromStr};

use image::imageops::FilterType;

/// What the model outputs and how it is post-processed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum Mode {
    /// Class probabilities, reported as top-K predictions.
    Classify,
    /// Transposed proposal matrix, reported as boxes after non-max suppression.
    Detect,
}

/// Resize policy, must match the preprocessing the model was trained with.
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum Interpolation {
    Nearest,
    Bilinear,
}

impl Interpolation {
    pub fn filter_type(&self) -> FilterType {
        match self {
            Interpolation::Nearest => FilterType::Nearest,
            Interpolation::Bilinear => FilterType::Triangle,
        }
    }
}

/// Numeric range the model expects its input pixels in.
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum Normalization {
    /// `[0, 1]`
    ZeroToOne,
    /// `[-1, 1]`
    MinusOneToOne,
    /// Per-channel mean/std of ImageNet.
    Imagenet,
}

/// Memory layout of the input tensor.
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum Layout {
    Nchw,
    Nhwc,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PreprocConfig {
    pub width: u32,
    pub height: u32,
    pub interpolation: Interpolation,
    pub normalization: Normalization,
    pub layout: Layout,
}

impl Default for PreprocConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 640,
            interpolation: Interpolation::Bilinear,
            normalization: Normalization::ZeroToOne,
            layout: Layout::Nchw,
        }
    }
}

impl PreprocConfig {
    /// Shape of the batched input tensor.
    pub fn input_shape(&self) -> [usize; 4] {
        let (width, height) = (self.width as usize, self.height as usize);
        match self.layout {
            Layout::Nchw => [1, 3, height, width],
            Layout::Nhwc => [1, height, width, 3],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectionConfig {
    /// Proposals whose best class score is below are rejected.
    pub confidence_threshold: f32,
    /// Boxes overlapping a kept box by more than this are suppressed.
    pub iou_threshold: f32,
    pub max_detections: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            iou_threshold: 0.45,
            max_detections: 20,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClassificationConfig {
    pub top_k: usize,
    /// Apply softmax first, for models emitting logits.
    pub softmax: bool,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            softmax: false,
        }
    }
}

/// Where the model artifact is loaded from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ModelSource {
    Path(PathBuf),
    Url(String),
}

impl FromStr for ModelSource {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with("http://") || s.starts_with("https://") {
            Ok(ModelSource::Url(s.to_owned()))
        } else {
            Ok(ModelSource::Path(PathBuf::from(s)))
        }
    }
}

impl fmt::Display for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelSource::Path(path) => write!(f, "{}", path.display()),
            ModelSource::Url(url) => write!(f, "{url}"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_model_source_from_str() {
        assert_eq!(
            "https://example.org/yolov8n.onnx".parse::<ModelSource>().unwrap(),
            ModelSource::Url("https://example.org/yolov8n.onnx".into())
        );
        assert_eq!(
            "models/yolov8n.onnx".parse::<ModelSource>().unwrap(),
            ModelSource::Path("models/yolov8n.onnx".into())
        );
    }

    #[test]
    fn test_input_shape() {
        let config = PreprocConfig {
            width: 320,
            height: 240,
            ..Default::default()
        };
        assert_eq!(config.input_shape(), [1, 3, 240, 320]);

        let config = PreprocConfig {
            layout: Layout::Nhwc,
            ..config
        };
        assert_eq!(config.input_shape(), [1, 240, 320, 3]);
    }

    #[test]
    fn test_detection_defaults() {
        let config = DetectionConfig::default();
        assert_eq!(config.confidence_threshold, 0.5);
        assert_eq!(config.iou_threshold, 0.45);
        assert_eq!(config.max_detections, 20);
    }
}
