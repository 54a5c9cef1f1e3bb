//! Frame to tensor conversion.
//!
use common::Frame;
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::{
    config::{Layout, Normalization, PreprocConfig},
    tensor::{ScopedTensor, TensorLedger},
};

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Resizes, normalizes and batches frames into the model's input shape.
pub struct Preprocessor {
    config: PreprocConfig,
}

impl Preprocessor {
    pub fn new(config: PreprocConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PreprocConfig {
        &self.config
    }

    /// Model input size as `(width, height)`.
    pub fn input_size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    /// Convert a frame into a scoped input tensor.
    ///
    /// Returns `None` if the frame has no pixels yet.
    pub fn run(&self, frame: &Frame, ledger: &TensorLedger) -> Option<ScopedTensor> {
        if frame.is_empty() {
            log::debug!("Skipping empty frame");
            return None;
        }

        let (width, height) = self.input_size();
        let resized: RgbImage = image::imageops::resize(
            frame.image(),
            width,
            height,
            self.config.interpolation.filter_type(),
        );

        let normalization = self.config.normalization;
        let tensor: Tensor = match self.config.layout {
            Layout::Nchw => tract_ndarray::Array4::from_shape_fn(
                (1, 3, height as usize, width as usize),
                |(_, c, y, x)| normalize(resized[(x as _, y as _)][c], c, normalization),
            )
            .into(),
            Layout::Nhwc => tract_ndarray::Array4::from_shape_fn(
                (1, height as usize, width as usize, 3),
                |(_, y, x, c)| normalize(resized[(x as _, y as _)][c], c, normalization),
            )
            .into(),
        };

        Some(ledger.scope(tensor))
    }
}

fn normalize(value: u8, channel: usize, normalization: Normalization) -> f32 {
    let value = value as f32;
    match normalization {
        Normalization::ZeroToOne => value / 255.0,
        Normalization::MinusOneToOne => value / 127.5 - 1.0,
        Normalization::Imagenet => {
            (value / 255.0 - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel]
        }
    }
}
