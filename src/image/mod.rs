//! Image loading, mask loading, and saving utilities.

mod load;
mod mask;
mod save;

pub use load::load_image;
pub use mask::{check_mask_fits, load_mask, MaskTensor, MASK_THRESHOLD};
pub use save::save_image;

use ndarray::Array4;

/// Image tensor in NCHW format (batch, channels, height, width).
/// Values are normalized to [-1, 1] range for diffusion model compatibility.
pub type ImageTensor = Array4<f32>;

/// Working resolution of both pipelines.
pub const IMAGE_SIZE: u32 = 512;

/// Spatial resolution of the latent grid for [`IMAGE_SIZE`] inputs.
pub const LATENT_SIZE: u32 = 64;

/// Number of channels in RGB images.
pub const RGB_CHANNELS: usize = 3;
