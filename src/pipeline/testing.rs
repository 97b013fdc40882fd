//! In-process stand-ins for the pretrained networks.

use ndarray::{Array2, Array3, Array4};

use crate::error::Result;
use crate::image::{ImageTensor, MaskTensor};
use crate::latent::{select, LatentTensor};

use super::cache::{FeatureKey, StepInfo};
use super::conditioning::Conditioning;
use super::options::SamplingOptions;
use super::traits::{Autoencoder, Conditioner, Denoiser};

/// Average-pools 8x8 pixel blocks into 16 channels with distinct offsets.
/// Decoding repeats each latent value over its block.
pub struct PoolingAutoencoder;

impl Autoencoder for PoolingAutoencoder {
    #[allow(clippy::cast_precision_loss)]
    fn encode(&mut self, image: &ImageTensor) -> Result<LatentTensor> {
        let (_, _, h, w) = image.dim();
        Ok(Array4::from_shape_fn((1, 16, h / 8, w / 8), |(_, c, y, x)| {
            let mut sum = 0.0;
            for dy in 0..8 {
                for dx in 0..8 {
                    sum += image[[0, c % 3, y * 8 + dy, x * 8 + dx]];
                }
            }
            sum / 64.0 + c as f32 * 0.1 + 0.013
        }))
    }

    fn decode(&mut self, latent: &LatentTensor) -> Result<ImageTensor> {
        let (_, _, h, w) = latent.dim();
        Ok(Array4::from_shape_fn((1, 3, h * 8, w * 8), |(_, c, y, x)| {
            latent[[0, c, y / 8, x / 8]]
        }))
    }
}

/// Records prompts and returns zero-valued conditioning.
#[derive(Default)]
pub struct RecordingConditioner {
    pub prompts: Vec<String>,
}

impl Conditioner for RecordingConditioner {
    fn prepare(&mut self, latent: &LatentTensor, prompt: &str) -> Result<Conditioning> {
        self.prompts.push(prompt.to_string());
        let (_, _, h, w) = latent.dim();
        Ok(Conditioning::new(
            Array3::zeros((1, 8, 16)),
            Array2::zeros((1, 16)),
            h,
            w,
        ))
    }
}

/// Pastes the foreground latent into the background under the mask and
/// remembers the starting step and cache size it was handed.
#[derive(Default)]
pub struct PasteDenoiser {
    pub seen_start: Option<usize>,
    pub seen_cache_len: Option<usize>,
}

impl Denoiser for PasteDenoiser {
    fn denoise(
        &mut self,
        z_bg: &LatentTensor,
        z_fg: &LatentTensor,
        _cond: &Conditioning,
        mask: &MaskTensor,
        _opts: &SamplingOptions,
        info: &mut StepInfo,
    ) -> Result<LatentTensor> {
        self.seen_start = Some(info.t);
        self.seen_cache_len = Some(info.feature.len());

        let out = select(mask, z_fg, z_bg)?;
        info.feature.insert(FeatureKey::velocity(info.t), out.clone())?;
        Ok(out)
    }
}
