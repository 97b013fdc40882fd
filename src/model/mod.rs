//! Model file resolution, download, and ONNX session creation.

mod device;
mod loader;

pub use device::Device;
pub use loader::{ModelCache, ModelFile, ModelName};
