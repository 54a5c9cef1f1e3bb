//! Inference engine seam and its ONNX implementation.
//!
use std::path::Path;

use anyhow::{Context, Result};
use tract_onnx::prelude::*;

use crate::{config::ModelSource, utils::resolve_model_source};

type NnModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Raw output tensors of a model run.
pub type EngineOutputs = TVec<Arc<Tensor>>;

/// Runs a pretrained model on a preprocessed input tensor.
///
/// Errors abort the current tick only, there are no retries.
pub trait InferenceEngine: Send {
    fn is_ready(&self) -> bool {
        true
    }

    fn infer(&mut self, input: Tensor) -> Result<EngineOutputs>;
}

/// Output of a named internal node, exposed next to the primary output.
struct Inspection {
    node: String,
}

/// ONNX model optimized and run by `tract`.
pub struct TractEngine {
    model: NnModel,
    inspection: Option<Inspection>,
}

impl TractEngine {
    /// Load the model once from a path or URL.
    pub async fn load(
        source: &ModelSource,
        input_shape: [usize; 4],
        inspect_node: Option<&str>,
    ) -> Result<Self> {
        let path = resolve_model_source(source).await?;
        Self::from_path(path, input_shape, inspect_node)
    }

    pub fn from_path(
        path: impl AsRef<Path>,
        input_shape: [usize; 4],
        inspect_node: Option<&str>,
    ) -> Result<Self> {
        let path = path.as_ref();
        log::info!("Loading model {} with input {:?}", path.display(), input_shape);

        let input_fact = InferenceFact::dt_shape(f32::datum_type(), tvec!(
            input_shape[0],
            input_shape[1],
            input_shape[2],
            input_shape[3]
        ));
        let mut model = tract_onnx::onnx()
            .model_for_path(path)
            .with_context(|| format!("failed to read model {}", path.display()))?
            .with_input_fact(0, input_fact)?;

        let inspection = match inspect_node {
            Some(node) => expose_node_output(&mut model, node)?,
            None => None,
        };

        let model = model
            .into_optimized()
            .context("failed to optimize model")?
            .into_runnable()?;

        Ok(Self { model, inspection })
    }
}

impl InferenceEngine for TractEngine {
    fn infer(&mut self, input: Tensor) -> Result<EngineOutputs> {
        let mut outputs: EngineOutputs = self
            .model
            .run(tvec!(input.into()))?
            .into_iter()
            .map(|v| v.into_arc_tensor())
            .collect();

        if let Some(inspection) = &self.inspection {
            // The inspected node was appended as the last output
            if outputs.len() > 1 {
                if let Some(feature) = outputs.pop() {
                    log_feature_summary(&inspection.node, &feature);
                }
            }
        }

        Ok(outputs)
    }
}

/// Append the output of `node` to the model outputs.
///
/// A missing node only disables inspection, the primary output is unaffected.
fn expose_node_output(model: &mut InferenceModel, node: &str) -> Result<Option<Inspection>> {
    let node_id = match model.node_id_by_name(node) {
        Ok(node_id) => node_id,
        Err(_) => {
            log::warn!("Node {node} not found in model, feature inspection disabled");
            return Ok(None);
        }
    };

    let mut outlets = model.output_outlets()?.to_vec();
    outlets.push(OutletId::new(node_id, 0));
    model.set_output_outlets(&outlets)?;

    log::info!("Inspecting features of node {node}");
    Ok(Some(Inspection {
        node: node.to_owned(),
    }))
}

fn log_feature_summary(node: &str, feature: &Tensor) {
    match feature.as_slice::<f32>() {
        Ok(values) if !values.is_empty() => {
            let mean = values.iter().sum::<f32>() / values.len() as f32;
            log::debug!(
                "Feature {}: shape {:?}, mean activation {:.4}",
                node,
                feature.shape(),
                mean
            );
        }
        _ => log::debug!("Feature {}: shape {:?}", node, feature.shape()),
    }
}
