//! Foreground latent extraction.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::image::{self, check_mask_fits, IMAGE_SIZE};
use crate::latent::{self, LatentTensor};
use crate::model::{Device, ModelCache};

use super::traits::Autoencoder;
use super::vae::OnnxAutoencoder;

/// Encodes a target image and keeps only the latent positions under a mask.
pub struct Extractor<A> {
    autoencoder: A,
}

impl<A: Autoencoder> Extractor<A> {
    #[must_use]
    pub const fn new(autoencoder: A) -> Self {
        Self { autoencoder }
    }

    /// Build the foreground latent for `target_image` under `mask`.
    ///
    /// The encoded latent is rounded to bf16 before masking, so positions
    /// under the mask equal the stored values exactly.
    ///
    /// # Errors
    ///
    /// Returns an error if either input cannot be loaded, the mask does not
    /// cover the latent grid, or encoding fails.
    pub fn extract(&mut self, target_image: &Path, mask: &Path) -> Result<LatentTensor> {
        tracing::info!("Loading target image: {}", target_image.display());
        let image_tensor = image::load_image(target_image, IMAGE_SIZE)?;
        let mask_tensor = image::load_mask(mask)?;

        tracing::info!("Encoding to latent space...");
        let z = latent::round_bf16(&self.autoencoder.encode(&image_tensor)?);
        check_mask_fits(&mask_tensor, &z, mask)?;

        let kept = mask_tensor.iter().filter(|&&m| m).count();
        tracing::debug!("Keeping {kept} of {} latent positions", mask_tensor.len());

        latent::apply_mask(&z, &mask_tensor)
    }

    /// Extract and save the foreground latent to `<save_dir>/z_fg_<name>.pt`.
    ///
    /// # Errors
    ///
    /// Returns an error if extraction fails or the file cannot be written.
    pub fn run(&mut self, target_image: &Path, mask: &Path, save_dir: &Path) -> Result<PathBuf> {
        let z_fg = self.extract(target_image, mask)?;

        fs::create_dir_all(save_dir)?;
        let save_path = latent::latent_path(save_dir, target_image);
        latent::save_latent(&z_fg, &save_path)?;

        tracing::info!("Saved foreground latent to {}", save_path.display());
        Ok(save_path)
    }
}

impl Extractor<OnnxAutoencoder> {
    /// Create an extractor backed by the ONNX autoencoder.
    ///
    /// # Errors
    ///
    /// Returns an error if the autoencoder cannot be loaded.
    pub fn load(cache: &ModelCache, device: Device) -> Result<Self> {
        Ok(Self::new(OnnxAutoencoder::load(cache, device)?))
    }
}
