//! Flux autoencoder operations for encoding/decoding images.

use ndarray::Ix4;
use ort::session::Session;
use ort::value::Tensor;

use crate::error::{Error, Result};
use crate::image::ImageTensor;
use crate::latent::LatentTensor;
use crate::model::{Device, ModelCache, ModelFile};

use super::onnx::extract_array;
use super::traits::Autoencoder;

/// Flux latent scaling factor.
const SCALE_FACTOR: f32 = 0.3611;

/// Flux latent shift.
const SHIFT_FACTOR: f32 = 0.1159;

/// Map a raw encoder latent into the space the transformer works in.
fn normalize(raw: &LatentTensor) -> LatentTensor {
    (raw - SHIFT_FACTOR) * SCALE_FACTOR
}

/// Inverse of [`normalize`].
fn denormalize(latent: &LatentTensor) -> LatentTensor {
    latent / SCALE_FACTOR + SHIFT_FACTOR
}

/// Autoencoder backed by ONNX encoder and decoder sessions.
pub struct OnnxAutoencoder {
    encoder: Session,
    decoder: Session,
}

impl OnnxAutoencoder {
    /// Load the encoder and decoder.
    ///
    /// # Errors
    ///
    /// Returns an error if either model cannot be loaded.
    pub fn load(cache: &ModelCache, device: Device) -> Result<Self> {
        tracing::info!("Loading autoencoder encoder...");
        let encoder = cache.load_session(ModelFile::AeEncoder, device)?;

        tracing::info!("Loading autoencoder decoder...");
        let decoder = cache.load_session(ModelFile::AeDecoder, device)?;

        Ok(Self { encoder, decoder })
    }
}

impl Autoencoder for OnnxAutoencoder {
    fn encode(&mut self, image: &ImageTensor) -> Result<LatentTensor> {
        let input_value =
            Tensor::from_array(image.clone()).map_err(|source| Error::Inference { source })?;

        let outputs = self
            .encoder
            .run(ort::inputs![input_value])
            .map_err(|source| Error::Inference { source })?;

        let output = outputs
            .values()
            .next()
            .ok_or_else(|| Error::ShapeMismatch {
                expected: "latent output".to_string(),
                actual: "no output".to_string(),
            })?;

        let raw = extract_array::<Ix4>(&output)?;
        tracing::debug!("Encoded latent {:?}", raw.shape());

        Ok(normalize(&raw))
    }

    fn decode(&mut self, latent: &LatentTensor) -> Result<ImageTensor> {
        let input_value =
            Tensor::from_array(denormalize(latent)).map_err(|source| Error::Inference { source })?;

        let outputs = self
            .decoder
            .run(ort::inputs![input_value])
            .map_err(|source| Error::Inference { source })?;

        let output = outputs
            .values()
            .next()
            .ok_or_else(|| Error::ShapeMismatch {
                expected: "sample output".to_string(),
                actual: "no output".to_string(),
            })?;

        extract_array::<Ix4>(&output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{IMAGE_SIZE, RGB_CHANNELS};
    use crate::model::ModelName;

    /// Mean absolute reconstruction error allowed for a flat colour, in the
    /// [-1, 1] pixel range (about 6 levels out of 255).
    const ROUND_TRIP_TOLERANCE: f32 = 0.05;

    #[test]
    fn test_normalization_inverts() {
        let raw = LatentTensor::from_shape_fn((1, 16, 4, 4), |(_, c, y, x)| {
            #[allow(clippy::cast_precision_loss)]
            let v = (c + y * 4 + x) as f32;
            v * 0.25 - 2.0
        });
        let back = denormalize(&normalize(&raw));
        for (a, b) in raw.iter().zip(back.iter()) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_shift_maps_to_zero() {
        let raw = LatentTensor::from_elem((1, 16, 2, 2), SHIFT_FACTOR);
        assert!(normalize(&raw).iter().all(|&v| v.abs() < 1e-7));
    }

    #[test]
    #[ignore = "needs ONNX autoencoder exports in KVEDIT_MODEL_DIR"]
    fn test_onnx_round_trip_solid_colour() {
        let Some(root) = std::env::var_os("KVEDIT_MODEL_DIR") else {
            eprintln!("KVEDIT_MODEL_DIR not set, skipping");
            return;
        };
        let cache =
            ModelCache::new(Some(std::path::Path::new(&root)), ModelName::FluxDev, None).unwrap();
        let mut ae = OnnxAutoencoder::load(&cache, Device::Cpu).unwrap();

        let colour = [0.4_f32, -0.3, 0.1];
        let side = IMAGE_SIZE as usize;
        let image =
            ImageTensor::from_shape_fn((1, RGB_CHANNELS, side, side), |(_, c, _, _)| colour[c]);

        let latent = ae.encode(&image).unwrap();
        assert_eq!(latent.shape(), &[1, 16, side / 8, side / 8]);

        let decoded = ae.decode(&latent).unwrap();
        assert_eq!(decoded.shape(), image.shape());

        #[allow(clippy::cast_precision_loss)]
        let mae = (&decoded - &image).mapv(f32::abs).sum() / image.len() as f32;
        assert!(mae < ROUND_TRIP_TOLERANCE, "mean absolute error {mae}");
    }
}
