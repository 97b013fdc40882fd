//! # kvedit
//!
//! Object injection for Flux-based latent diffusion, in two steps:
//!
//! 1. [`Extractor`] encodes a target image with the autoencoder, keeps only
//!    the latent positions selected by an RGBA mask, and saves that
//!    foreground latent next to other extracted latents.
//! 2. [`EditRunner`] encodes a source image, loads a saved foreground latent,
//!    and regenerates the masked region under a text prompt while the rest
//!    of the latent stays pinned to the source.
//!
//! The pretrained networks sit behind the [`Autoencoder`], [`Conditioner`]
//! and [`Denoiser`] traits. The shipped implementations run ONNX exports
//! through ONNX Runtime.
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use kvedit::model::{Device, ModelCache, ModelName};
//! use kvedit::{EditJob, Extractor, OnnxEditRunner, SamplingOptions};
//!
//! # fn main() -> kvedit::Result<()> {
//! let cache = ModelCache::new(None, ModelName::FluxDev, None)?;
//!
//! let mut extractor = Extractor::load(&cache, Device::Cpu)?;
//! let z_fg = extractor.run(Path::new("cat.png"), Path::new("cat_mask.png"), Path::new("latents"))?;
//!
//! let opts = SamplingOptions {
//!     target_prompt: "a cat sitting on the sofa".to_string(),
//!     ..SamplingOptions::default()
//! };
//! let job = EditJob::new("living_room.png", z_fg, "sofa_mask.png", "out/edited.png");
//! OnnxEditRunner::load(&cache, ModelName::FluxDev, Device::Cpu)?.run(&job, &opts)?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod image;
pub mod latent;
pub mod model;
pub mod pipeline;

pub use error::{Error, Result};
pub use pipeline::{
    run_edit_from_latent, Autoencoder, Conditioner, Denoiser, EditJob, EditRunner, Extractor,
    OnnxEditRunner, SamplingOptions,
};
