//! Latent tensors and the masking operations performed on them.

mod store;

pub use store::{latent_path, load_latent, save_latent, LATENT_TENSOR_NAME};

use half::bf16;
use ndarray::{Array3, Array4, Zip};

use crate::error::{Error, Result};
use crate::image::MaskTensor;

/// Autoencoder latent in NCHW format, (1, 16, 64, 64) for 512x512 Flux inputs.
pub type LatentTensor = Array4<f32>;

/// Round every value through bfloat16, the precision latents are stored at.
#[must_use]
pub fn round_bf16(latent: &LatentTensor) -> LatentTensor {
    latent.mapv(|v| bf16::from_f32(v).to_f32())
}

/// Keep `latent` where `mask` is set and zero it elsewhere.
///
/// The mask's single channel is broadcast across the latent channels.
///
/// # Errors
///
/// Returns [`Error::ShapeMismatch`] if the mask cannot be broadcast.
pub fn apply_mask(latent: &LatentTensor, mask: &MaskTensor) -> Result<LatentTensor> {
    let zeros = LatentTensor::zeros(latent.raw_dim());
    select(mask, latent, &zeros)
}

/// Element-wise `where(mask, on_true, on_false)` with the mask broadcast over channels.
///
/// # Errors
///
/// Returns [`Error::ShapeMismatch`] if the operands disagree in shape.
pub fn select(
    mask: &MaskTensor,
    on_true: &LatentTensor,
    on_false: &LatentTensor,
) -> Result<LatentTensor> {
    if on_true.dim() != on_false.dim() {
        return Err(shape_mismatch(on_true, on_false));
    }
    let mask = mask
        .broadcast(on_true.raw_dim())
        .ok_or_else(|| Error::ShapeMismatch {
            expected: format!("mask broadcastable to {:?}", on_true.shape()),
            actual: format!("{:?}", mask.shape()),
        })?;

    Ok(Zip::from(&mask)
        .and(on_true)
        .and(on_false)
        .map_collect(|&m, &t, &f| if m { t } else { f }))
}

/// Pack a (1, C, H, W) latent into (1, H/2 * W/2, C * 4) patch tokens.
///
/// Tokens are row-major over the 2x2 patch grid; each token lists its
/// features channel-major, then patch row, then patch column.
///
/// # Errors
///
/// Returns [`Error::ShapeMismatch`] if H or W is odd.
pub fn pack_latents(latent: &LatentTensor) -> Result<Array3<f32>> {
    let (batch, channels, height, width) = latent.dim();
    if height % 2 != 0 || width % 2 != 0 {
        return Err(Error::ShapeMismatch {
            expected: "even latent height and width".to_string(),
            actual: format!("{:?}", latent.shape()),
        });
    }
    let (ph, pw) = (height / 2, width / 2);

    Ok(Array3::from_shape_fn(
        (batch, ph * pw, channels * 4),
        |(b, token, feature)| {
            let (row, col) = (token / pw, token % pw);
            let (c, dy, dx) = (feature / 4, (feature / 2) % 2, feature % 2);
            latent[[b, c, row * 2 + dy, col * 2 + dx]]
        },
    ))
}

/// Inverse of [`pack_latents`] for a latent of `height` x `width`.
///
/// # Errors
///
/// Returns [`Error::ShapeMismatch`] if the token count or feature width do
/// not describe that grid.
pub fn unpack_latents(tokens: &Array3<f32>, height: usize, width: usize) -> Result<LatentTensor> {
    let (batch, seq, features) = tokens.dim();
    let (ph, pw) = (height / 2, width / 2);
    if seq != ph * pw || features % 4 != 0 || height % 2 != 0 || width % 2 != 0 {
        return Err(Error::ShapeMismatch {
            expected: format!("{} tokens for a {height}x{width} latent", ph * pw),
            actual: format!("{:?}", tokens.shape()),
        });
    }

    Ok(LatentTensor::from_shape_fn(
        (batch, features / 4, height, width),
        |(b, c, y, x)| {
            let token = (y / 2) * pw + x / 2;
            let feature = c * 4 + (y % 2) * 2 + x % 2;
            tokens[[b, token, feature]]
        },
    ))
}

fn shape_mismatch(expected: &LatentTensor, actual: &LatentTensor) -> Error {
    Error::ShapeMismatch {
        expected: format!("{:?}", expected.shape()),
        actual: format!("{:?}", actual.shape()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(clippy::cast_precision_loss)]
    fn ramp(shape: (usize, usize, usize, usize)) -> LatentTensor {
        LatentTensor::from_shape_fn(shape, |(_, c, y, x)| (c * 1000 + y * 10 + x) as f32 * 0.01 - 3.0)
    }

    #[test]
    fn test_all_false_mask_zeroes_everything() {
        let latent = ramp((1, 16, 64, 64));
        let mask = MaskTensor::from_elem((1, 1, 64, 64), false);

        let z_fg = apply_mask(&latent, &mask).unwrap();
        assert!(z_fg.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_all_true_mask_is_identity() {
        let latent = ramp((1, 16, 64, 64));
        let mask = MaskTensor::from_elem((1, 1, 64, 64), true);

        assert_eq!(apply_mask(&latent, &mask).unwrap(), latent);
    }

    #[test]
    fn test_mask_broadcasts_across_channels() {
        let latent = ramp((1, 4, 8, 8));
        let mut mask = MaskTensor::from_elem((1, 1, 8, 8), false);
        mask[[0, 0, 3, 5]] = true;

        let z_fg = apply_mask(&latent, &mask).unwrap();
        for c in 0..4 {
            assert_eq!(z_fg[[0, c, 3, 5]], latent[[0, c, 3, 5]]);
            assert_eq!(z_fg[[0, c, 3, 4]], 0.0);
        }
        assert_eq!(z_fg.iter().filter(|&&v| v != 0.0).count(), 4);
    }

    #[test]
    fn test_mask_with_wrong_grid_is_rejected() {
        let latent = ramp((1, 4, 8, 8));
        let mask = MaskTensor::from_elem((1, 1, 4, 4), true);
        assert!(apply_mask(&latent, &mask).is_err());
    }

    #[test]
    fn test_round_bf16() {
        let latent = LatentTensor::from_elem((1, 1, 1, 3), 1.0 + 1.0 / 1024.0);
        let rounded = round_bf16(&latent);
        // bf16 keeps 8 significant bits, so the 2^-10 term is dropped.
        assert!(rounded.iter().all(|&v| v == 1.0));
        assert_eq!(round_bf16(&rounded), rounded);
    }

    #[test]
    fn test_pack_layout() {
        let latent = ramp((1, 2, 4, 6));
        let tokens = pack_latents(&latent).unwrap();
        assert_eq!(tokens.shape(), &[1, 6, 8]);

        // Token 4 is patch row 1, patch column 1: pixels (2..4, 2..4).
        assert_eq!(tokens[[0, 4, 0]], latent[[0, 0, 2, 2]]);
        assert_eq!(tokens[[0, 4, 1]], latent[[0, 0, 2, 3]]);
        assert_eq!(tokens[[0, 4, 2]], latent[[0, 0, 3, 2]]);
        assert_eq!(tokens[[0, 4, 7]], latent[[0, 1, 3, 3]]);
    }

    #[test]
    fn test_unpack_inverts_pack() {
        let latent = ramp((1, 16, 8, 10));
        let tokens = pack_latents(&latent).unwrap();
        assert_eq!(unpack_latents(&tokens, 8, 10).unwrap(), latent);
    }

    #[test]
    fn test_odd_grid_is_rejected() {
        assert!(pack_latents(&ramp((1, 1, 3, 4))).is_err());
        let tokens = Array3::<f32>::zeros((1, 5, 4));
        assert!(unpack_latents(&tokens, 4, 4).is_err());
    }
}
