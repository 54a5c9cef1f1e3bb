//! Overlay rendering of tick results.
//!
use std::path::Path;

use anyhow::{Context, Result};
use bytes::Bytes;
use common::{Frame, Results};
use image::{Rgb, RgbImage};
use imageproc::{
    drawing::{draw_hollow_rect_mut, draw_text_mut},
    rect::Rect,
};
use rusttype::{Font, Scale};

use crate::postproc::Labels;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
const TEXT_SCALE: f32 = 16.0;

/// Draws results onto a fresh canvas per frame.
pub struct Renderer {
    mirror: bool,
    labels: Labels,
    font: Option<Font<'static>>,
}

impl Renderer {
    pub fn new(mirror: bool, labels: Labels) -> Self {
        Self {
            mirror,
            labels,
            font: None,
        }
    }

    /// Load a TrueType font, labels are only drawn with a font.
    pub fn load_font(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let font_data = std::fs::read(path)
            .with_context(|| format!("failed to read font {}", path.display()))?;
        let font = Font::try_from_vec(font_data)
            .with_context(|| format!("invalid font {}", path.display()))?;
        self.font = Some(font);
        Ok(())
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Render `results` over `frame`.
    ///
    /// The canvas starts from the current frame, so nothing of the previous overlay remains.
    /// Mirroring flips the frame and the box coordinates together.
    pub fn render(&self, frame: &Frame, results: &Results) -> RgbImage {
        let mut canvas = if self.mirror {
            image::imageops::flip_horizontal(frame.image())
        } else {
            frame.image().clone()
        };

        match results {
            Results::Detection(detections) => {
                for detection in detections {
                    let bbox = match self.mirror {
                        true => detection.bbox.mirrored(frame.width() as f32),
                        false => detection.bbox,
                    };
                    let (x, y) = (bbox.x.round() as i32, bbox.y.round() as i32);
                    let rect = Rect::at(x, y).of_size(
                        bbox.width.round().max(1.0) as u32,
                        bbox.height.round().max(1.0) as u32,
                    );
                    draw_hollow_rect_mut(&mut canvas, rect, BOX_COLOR);

                    let label = format!(
                        "{} {:.1}%",
                        self.labels.name(detection.class_id),
                        detection.confidence * 100.0
                    );
                    // Keep the label inside the canvas for boxes touching the top edge
                    self.draw_label(&mut canvas, x, (y - TEXT_SCALE as i32).max(0), &label);
                }
            }
            Results::Classification(predictions) => {
                for (line, prediction) in predictions.iter().enumerate() {
                    let label = format!(
                        "{} {:.1}%",
                        prediction.class_name,
                        prediction.probability * 100.0
                    );
                    let y = 4 + line as i32 * (TEXT_SCALE as i32 + 2);
                    self.draw_label(&mut canvas, 4, y, &label);
                }
            }
        }

        canvas
    }

    fn draw_label(&self, canvas: &mut RgbImage, x: i32, y: i32, text: &str) {
        if let Some(font) = &self.font {
            draw_text_mut(
                canvas,
                TEXT_COLOR,
                x,
                y,
                Scale::uniform(TEXT_SCALE),
                font,
                text,
            );
        }
    }
}

/// Encode a rendered canvas as JPEG.
pub fn encode_jpeg(canvas: &RgbImage, quality: i32) -> Result<Vec<u8>> {
    let buf = turbojpeg::compress_image(canvas, quality, turbojpeg::Subsamp::Sub2x2)
        .context("failed to compress canvas")?;
    Ok(buf.to_vec())
}

/// Wrap a JPEG into a part of a `multipart/x-mixed-replace` stream.
pub fn as_jpeg_stream_item(data: &[u8]) -> Bytes {
    Bytes::from(
        [
            "--frame\r\nContent-Type: image/jpeg\r\n\r\n".as_bytes(),
            data,
            "\r\n\r\n".as_bytes(),
        ]
        .concat(),
    )
}

#[cfg(test)]
mod test {
    use common::{BoundingBox, Detection, Prediction};

    use super::*;

    const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

    fn black_frame() -> Frame {
        let mut image = RgbImage::new(100, 50);
        image.put_pixel(0, 0, Rgb([255, 0, 0]));
        Frame::new(image)
    }

    fn results() -> Results {
        Results::Detection(vec![Detection {
            bbox: BoundingBox::new(10.0, 10.0, 20.0, 20.0),
            class_id: 0,
            confidence: 0.9,
        }])
    }

    #[test]
    fn test_draws_box() {
        let renderer = Renderer::new(false, Labels::default());
        let canvas = renderer.render(&black_frame(), &results());

        assert_eq!(canvas.dimensions(), (100, 50));
        assert_eq!(canvas.get_pixel(10, 20), &BOX_COLOR);
        assert_eq!(canvas.get_pixel(20, 20), &BLACK);
        assert_eq!(canvas.get_pixel(0, 0), &Rgb([255, 0, 0]));
    }

    #[test]
    fn test_mirrored_box_and_frame() {
        let renderer = Renderer::new(true, Labels::default());
        let canvas = renderer.render(&black_frame(), &results());

        // Box spans x in [70, 89] once mirrored
        assert_eq!(canvas.get_pixel(70, 20), &BOX_COLOR);
        assert_eq!(canvas.get_pixel(10, 20), &BLACK);
        assert_eq!(canvas.get_pixel(99, 0), &Rgb([255, 0, 0]));
        assert_eq!(canvas.get_pixel(0, 0), &BLACK);
    }

    #[test]
    fn test_previous_overlay_is_cleared() {
        let renderer = Renderer::new(false, Labels::default());
        let frame = black_frame();
        let _ = renderer.render(&frame, &results());
        let canvas = renderer.render(&frame, &Results::Detection(vec![]));

        assert_eq!(canvas.get_pixel(10, 20), &BLACK);
    }

    #[test]
    fn test_classification_without_font() {
        let renderer = Renderer::new(false, Labels::default());
        assert!(!renderer.has_font());

        let results = Results::Classification(vec![Prediction {
            class_name: "cat".into(),
            probability: 0.7,
        }]);
        let canvas = renderer.render(&black_frame(), &results);
        assert_eq!(&canvas, black_frame().image());
    }

    #[test]
    fn test_missing_font_file() {
        let mut renderer = Renderer::new(false, Labels::default());
        assert!(renderer.load_font("does/not/exist.ttf").is_err());
        assert!(!renderer.has_font());
    }

    #[test]
    fn test_stream_item() {
        let item = as_jpeg_stream_item(&[0xff, 0xd8]);
        assert!(item.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n"));
        assert!(item.ends_with(b"\xff\xd8\r\n\r\n"));
    }
}
