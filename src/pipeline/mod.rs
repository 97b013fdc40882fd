//! Foreground extraction and edit pipelines.

mod cache;
mod conditioning;
mod denoise;
mod edit;
mod extract;
mod onnx;
mod options;
#[cfg(test)]
mod testing;
mod traits;
mod vae;

pub use cache::{FeatureCache, FeatureKey, FeatureKind, StepInfo};
pub use conditioning::{img_ids, Conditioning, OnnxConditioner};
pub use denoise::{schedule, MaskedFlowDenoiser, OnnxTransformer, VelocityModel};
pub use edit::{run_edit_from_latent, EditJob, EditRunner, OnnxEditRunner, DEFAULT_QUALITY};
pub use extract::Extractor;
pub use options::SamplingOptions;
pub use traits::{Autoencoder, Conditioner, Denoiser};
pub use vae::OnnxAutoencoder;
