//! Sampling options for the edit pipeline.

use crate::error::{Error, Result};

/// Prompt and diffusion parameters for one edit.
#[derive(Debug, Clone)]
pub struct SamplingOptions {
    /// Prompt describing the edited image.
    pub target_prompt: String,

    /// Number of denoising steps in the full schedule.
    pub denoise_num_steps: usize,

    /// Distilled guidance strength passed to the transformer.
    pub denoise_guidance: f32,

    /// Random seed for the initial noise. None for random.
    pub seed: Option<u64>,

    /// Regenerate the masked region from noise instead of starting from the
    /// foreground latent.
    pub re_init: bool,
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            target_prompt: String::new(),
            denoise_num_steps: 28,
            denoise_guidance: 5.5,
            seed: None,
            re_init: false,
        }
    }
}

impl SamplingOptions {
    /// Validate the options.
    ///
    /// # Errors
    ///
    /// Returns an error if any parameter is out of valid range.
    pub fn validate(&self) -> Result<()> {
        if self.denoise_num_steps == 0 {
            return Err(Error::invalid_parameter(
                "denoise_num_steps",
                "must be greater than 0",
            ));
        }

        if !(self.denoise_guidance.is_finite() && self.denoise_guidance > 0.0) {
            return Err(Error::invalid_parameter(
                "denoise_guidance",
                "must be a positive number",
            ));
        }

        Ok(())
    }
}
