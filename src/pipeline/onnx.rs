//! Shared helpers for moving tensors in and out of ONNX Runtime.

use ndarray::{ArrayD, Dimension, IxDyn};
use ort::session::Session;
use ort::value::DynValue;

use crate::error::{Error, Result};

/// Extract an f32 tensor of dimensionality `D` from an ONNX value.
#[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
pub(crate) fn extract_array<D: Dimension>(value: &DynValue) -> Result<ndarray::Array<f32, D>> {
    let (shape_info, data) = value
        .try_extract_tensor::<f32>()
        .map_err(|source| Error::Inference { source })?;

    // Safe: tensor dimensions are always non-negative and within bounds
    let dims: Vec<usize> = shape_info.iter().map(|&x| x as usize).collect();

    let array = ArrayD::from_shape_vec(IxDyn(&dims), data.to_vec()).map_err(|_| {
        Error::ShapeMismatch {
            expected: format!("{dims:?}"),
            actual: "reshape failed".to_string(),
        }
    })?;

    array
        .into_dimensionality::<D>()
        .map_err(|_| Error::ShapeMismatch {
            expected: format!("{}D tensor", D::NDIM.unwrap_or(0)),
            actual: format!("{}D tensor", dims.len()),
        })
}

/// Whether the graph declares an input called `name`.
pub(crate) fn has_input(session: &Session, name: &str) -> bool {
    session.inputs.iter().any(|input| input.name == name)
}

/// Name of the first declared output among `candidates`, else the graph's first output.
pub(crate) fn pick_output(session: &Session, candidates: &[&str]) -> Result<String> {
    candidates
        .iter()
        .find(|c| session.outputs.iter().any(|o| o.name == **c))
        .map(|c| (*c).to_string())
        .or_else(|| session.outputs.first().map(|o| o.name.clone()))
        .ok_or_else(|| Error::ShapeMismatch {
            expected: format!("one of the outputs {candidates:?}"),
            actual: "no outputs".to_string(),
        })
}
