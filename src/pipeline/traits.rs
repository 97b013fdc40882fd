//! Capability interfaces over the pretrained networks.
//!
//! The pipelines only see these traits, so they run the same against ONNX
//! sessions and against in-process fakes.

use crate::error::Result;
use crate::image::{ImageTensor, MaskTensor};
use crate::latent::LatentTensor;

use super::cache::StepInfo;
use super::conditioning::Conditioning;
use super::options::SamplingOptions;

/// Maps images to latents and back.
pub trait Autoencoder {
    /// Encode a (1, 3, H, W) image in [-1, 1] into a normalized latent.
    ///
    /// # Errors
    ///
    /// Returns an error if inference fails.
    fn encode(&mut self, image: &ImageTensor) -> Result<LatentTensor>;

    /// Decode a normalized latent into a (1, 3, H, W) image, nominally in [-1, 1].
    ///
    /// # Errors
    ///
    /// Returns an error if inference fails.
    fn decode(&mut self, latent: &LatentTensor) -> Result<ImageTensor>;
}

/// Builds the text conditioning for a latent and a prompt.
pub trait Conditioner {
    /// # Errors
    ///
    /// Returns an error if tokenization or inference fails.
    fn prepare(&mut self, latent: &LatentTensor, prompt: &str) -> Result<Conditioning>;
}

/// Produces an edited latent from a background latent and a foreground latent.
pub trait Denoiser {
    /// Denoise starting from step `info.t`, regenerating the positions set in
    /// `mask` and keeping the rest anchored to `z_bg`. The denoiser owns the
    /// contents of `info.feature` for the duration of the call.
    ///
    /// # Errors
    ///
    /// Returns an error if inference fails or the inputs disagree in shape.
    fn denoise(
        &mut self,
        z_bg: &LatentTensor,
        z_fg: &LatentTensor,
        cond: &Conditioning,
        mask: &MaskTensor,
        opts: &SamplingOptions,
        info: &mut StepInfo,
    ) -> Result<LatentTensor>;
}
