//! Saving and loading foreground latents.
//!
//! A latent file is a safetensors container with one BF16 tensor named
//! [`LATENT_TENSOR_NAME`] and no metadata, so writing the same latent twice
//! yields identical bytes.

use std::fs;
use std::path::{Path, PathBuf};

use half::{bf16, f16};
use ndarray::Array4;
use safetensors::tensor::{Dtype, TensorView};
use safetensors::SafeTensors;

use crate::error::{Error, Result};

use super::LatentTensor;

/// Name of the tensor inside a latent file.
pub const LATENT_TENSOR_NAME: &str = "z_fg";

/// Path of the foreground latent extracted from `target_image`:
/// `<save_dir>/z_fg_<stem>.pt`.
#[must_use]
pub fn latent_path(save_dir: &Path, target_image: &Path) -> PathBuf {
    let stem = target_image
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    save_dir.join(format!("z_fg_{stem}.pt"))
}

/// Write `latent` to `path` at bfloat16 precision.
///
/// # Errors
///
/// Returns [`Error::LatentWrite`] if serialization fails and [`Error::Io`] if
/// the file cannot be written.
pub fn save_latent(latent: &LatentTensor, path: &Path) -> Result<()> {
    let bytes: Vec<u8> = latent
        .iter()
        .flat_map(|&v| bf16::from_f32(v).to_le_bytes())
        .collect();

    let write_err = |source| Error::LatentWrite {
        path: path.to_path_buf(),
        source,
    };
    let view = TensorView::new(Dtype::BF16, latent.shape().to_vec(), &bytes).map_err(write_err)?;
    let encoded = safetensors::serialize([(LATENT_TENSOR_NAME, view)], None).map_err(write_err)?;

    fs::write(path, encoded)?;
    tracing::debug!("Wrote latent {:?} to {}", latent.shape(), path.display());
    Ok(())
}

/// Read a latent written by [`save_latent`], widened to f32.
///
/// BF16, F16 and F32 payloads are accepted.
///
/// # Errors
///
/// Returns [`Error::Deserialization`] if the file is missing, is not a
/// safetensors container, lacks the latent tensor, or the tensor is not 4D.
pub fn load_latent(path: &Path) -> Result<LatentTensor> {
    let fail = |reason: String| Error::Deserialization {
        path: path.to_path_buf(),
        reason,
    };

    let bytes = fs::read(path).map_err(|e| fail(e.to_string()))?;
    let tensors = SafeTensors::deserialize(&bytes).map_err(|e| fail(e.to_string()))?;
    let view = tensors
        .tensor(LATENT_TENSOR_NAME)
        .map_err(|e| fail(format!("no `{LATENT_TENSOR_NAME}` tensor: {e}")))?;

    let shape = view.shape().to_vec();
    if shape.len() != 4 {
        return Err(fail(format!("expected a 4D tensor, got shape {shape:?}")));
    }

    let data = view.data();
    let values: Vec<f32> = match view.dtype() {
        Dtype::BF16 => data
            .chunks_exact(2)
            .map(|b| bf16::from_le_bytes([b[0], b[1]]).to_f32())
            .collect(),
        Dtype::F16 => data
            .chunks_exact(2)
            .map(|b| f16::from_le_bytes([b[0], b[1]]).to_f32())
            .collect(),
        Dtype::F32 => data
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
        other => return Err(fail(format!("unsupported dtype {other:?}"))),
    };

    Array4::from_shape_vec((shape[0], shape[1], shape[2], shape[3]), values)
        .map_err(|e| fail(e.to_string()))
}
