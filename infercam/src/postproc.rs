//! Conversion of raw model output into predictions and detections.
//!
use std::path::Path;

use anyhow::{bail, Context, Result};
use common::{BoundingBox, Detection, Prediction, Results};
use tract_onnx::prelude::*;
use tract_onnx::prelude::tract_ndarray::{Axis, Ix2};

use crate::{
    config::{ClassificationConfig, DetectionConfig},
    tensor::ScopedOutput,
};

/// Number of box attributes preceding the class scores of a proposal.
const BOX_ATTRIBUTES: usize = 4;

/// Class names indexed by class id.
#[derive(Clone, Debug, Default)]
pub struct Labels {
    names: Vec<String>,
}

impl Labels {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    /// Read one label per line, blank lines are skipped.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read labels {}", path.display()))?;
        let names = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect();
        Ok(Self { names })
    }

    pub fn name(&self, class_id: usize) -> String {
        self.names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{class_id}"))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Post-processing of the primary model output, per mode.
pub enum Postprocessor {
    Classification {
        labels: Labels,
        config: ClassificationConfig,
    },
    Detection {
        config: DetectionConfig,
        /// Model input size as `(width, height)`.
        input_size: (u32, u32),
    },
}

impl Postprocessor {
    /// Turn the engine outputs of a frame of `frame_size` into results.
    pub fn run(&self, outputs: &[ScopedOutput], frame_size: (u32, u32)) -> Result<Results> {
        let output = outputs.first().context("model returned no outputs")?;

        match self {
            Postprocessor::Classification { labels, config } => {
                let mut probabilities = output.as_slice::<f32>()?.to_vec();
                if config.softmax {
                    softmax(&mut probabilities);
                }
                Ok(Results::Classification(top_k(
                    &probabilities,
                    labels,
                    config.top_k,
                )))
            }
            Postprocessor::Detection { config, input_size } => {
                let scale = (
                    frame_size.0 as f32 / input_size.0 as f32,
                    frame_size.1 as f32 / input_size.1 as f32,
                );
                let detections = detect(output, scale, config)?;
                Ok(Results::Detection(detections.detections()))
            }
        }
    }
}

/// Pair probabilities with labels and keep the `k` most probable, descending.
pub fn top_k(probabilities: &[f32], labels: &Labels, k: usize) -> Vec<Prediction> {
    // NaN scores have no rank
    let mut ranked: Vec<(usize, f32)> = probabilities
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, probability)| !probability.is_nan())
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked.truncate(k);

    ranked
        .into_iter()
        .map(|(class_id, probability)| Prediction {
            class_name: labels.name(class_id),
            probability,
        })
        .collect()
}

/// Normalize logits into probabilities in place.
pub fn softmax(values: &mut [f32]) {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0;
    for value in values.iter_mut() {
        *value = (*value - max).exp();
        sum += *value;
    }
    if sum > 0.0 {
        values.iter_mut().for_each(|value| *value /= sum);
    }
}

/// Kept detections as parallel arrays.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionSet {
    pub boxes: Vec<BoundingBox>,
    pub scores: Vec<f32>,
    pub class_ids: Vec<usize>,
}

impl DetectionSet {
    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn detections(&self) -> Vec<Detection> {
        self.boxes
            .iter()
            .zip(self.scores.iter())
            .zip(self.class_ids.iter())
            .map(|((bbox, confidence), class_id)| Detection {
                bbox: *bbox,
                class_id: *class_id,
                confidence: *confidence,
            })
            .collect()
    }
}

impl FromIterator<Detection> for DetectionSet {
    fn from_iter<I: IntoIterator<Item = Detection>>(iter: I) -> Self {
        let mut set = DetectionSet::default();
        for detection in iter {
            set.boxes.push(detection.bbox);
            set.scores.push(detection.confidence);
            set.class_ids.push(detection.class_id);
        }
        set
    }
}

/// Decode a transposed proposal matrix and suppress duplicate detections.
pub fn detect(output: &Tensor, scale: (f32, f32), config: &DetectionConfig) -> Result<DetectionSet> {
    let candidates = decode_proposals(output, scale, config.confidence_threshold)?;
    log::trace!("{} proposals above confidence threshold", candidates.len());

    Ok(non_maximum_suppression(candidates, config.iou_threshold, config.max_detections)
        .into_iter()
        .collect())
}

/// Select the best class of every proposal and convert its box into frame coordinates.
///
/// The output layout is `[num_attributes, num_proposals]` with an optional leading batch
/// dimension of one, every proposal being `[cx, cy, w, h, class_score_0, ..]`. NaN scores are
/// ignored, proposals whose best score is below `min_confidence` are rejected.
pub fn decode_proposals(
    output: &Tensor,
    scale: (f32, f32),
    min_confidence: f32,
) -> Result<Vec<Detection>> {
    let view = output.to_array_view::<f32>()?;
    let view = match view.ndim() {
        2 => view,
        3 if view.shape()[0] == 1 => view.index_axis_move(Axis(0), 0),
        _ => bail!("unexpected detection output shape {:?}", output.shape()),
    };
    let proposals = view.into_dimensionality::<Ix2>()?;

    let num_attributes = proposals.nrows();
    if num_attributes <= BOX_ATTRIBUTES {
        bail!("detection output has no class scores, shape {:?}", output.shape());
    }

    let detections = proposals
        .columns()
        .into_iter()
        .filter_map(|proposal| {
            let (class_id, confidence) = proposal
                .iter()
                .skip(BOX_ATTRIBUTES)
                .copied()
                .enumerate()
                .filter(|(_, score)| !score.is_nan())
                .max_by(|a, b| a.1.total_cmp(&b.1))?;

            (confidence >= min_confidence).then(|| Detection {
                bbox: BoundingBox::from_center(
                    proposal[0],
                    proposal[1],
                    proposal[2],
                    proposal[3],
                    scale,
                ),
                class_id,
                confidence,
            })
        })
        .collect();

    Ok(detections)
}

/// Run greedy non-maximum-suppression on candidate detections.
///
/// Start with the most confident box and iterate over all other boxes in the order of sinking
/// confidence. Grow the selection only by candidates without an IoU above `max_iou` with any
/// already selected box, and stop once `max_kept` boxes are selected.
pub fn non_maximum_suppression(
    mut candidates: Vec<Detection>,
    max_iou: f32,
    max_kept: usize,
) -> Vec<Detection> {
    // Ascending, so the most confident candidate is popped first
    candidates.sort_by(|a, b| a.confidence.total_cmp(&b.confidence));

    let mut selected: Vec<Detection> = vec![];
    'candidates: while selected.len() < max_kept {
        match candidates.pop() {
            Some(candidate) => {
                for kept in selected.iter() {
                    if candidate.bbox.iou(&kept.bbox) > max_iou {
                        continue 'candidates;
                    }
                }

                selected.push(candidate)
            }
            None => break 'candidates,
        }
    }

    selected
}
