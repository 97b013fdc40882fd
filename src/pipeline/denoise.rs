//! Masked rectified-flow sampling over the Flux transformer.

use indicatif::{ProgressBar, ProgressStyle};
use ndarray::{Array1, Ix3};
use ort::session::Session;
use ort::value::Tensor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::error::{Error, Result};
use crate::image::MaskTensor;
use crate::latent::{pack_latents, select, unpack_latents, LatentTensor};
use crate::model::{Device, ModelCache, ModelFile, ModelName};

use super::cache::{FeatureKey, StepInfo};
use super::conditioning::Conditioning;
use super::onnx::{extract_array, has_input};
use super::options::SamplingOptions;
use super::traits::Denoiser;

/// Image token count where the schedule shift is `BASE_SHIFT`.
const BASE_SEQ_LEN: f32 = 256.0;
/// Image token count where the schedule shift is `MAX_SHIFT`.
const MAX_SEQ_LEN: f32 = 4096.0;
const BASE_SHIFT: f32 = 0.5;
const MAX_SHIFT: f32 = 1.15;

/// Timesteps from 1 (pure noise) to 0 (clean), `num_steps + 1` entries.
///
/// With `shift`, the schedule is bent towards high noise levels by an amount
/// growing linearly with the image token count.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn schedule(num_steps: usize, seq_len: usize, shift: bool) -> Vec<f32> {
    let n = num_steps as f32;
    let linear = (0..=num_steps).map(|i| 1.0 - i as f32 / n);

    if !shift {
        return linear.collect();
    }

    let slope = (MAX_SHIFT - BASE_SHIFT) / (MAX_SEQ_LEN - BASE_SEQ_LEN);
    let mu = slope.mul_add(seq_len as f32, BASE_SHIFT - slope * BASE_SEQ_LEN);
    linear.map(|t| time_shift(mu, t)).collect()
}

fn time_shift(mu: f32, t: f32) -> f32 {
    if t <= 0.0 {
        return 0.0;
    }
    let e = mu.exp();
    e / (e + (1.0 / t - 1.0))
}

/// Standard normal noise shaped like `like`.
pub(crate) fn gaussian_noise(like: &LatentTensor, rng: &mut StdRng) -> LatentTensor {
    LatentTensor::from_shape_simple_fn(like.raw_dim(), || rng.sample(StandardNormal))
}

/// Predicts the flow velocity (noise minus data) at a timestep.
pub trait VelocityModel {
    /// # Errors
    ///
    /// Returns an error if inference fails.
    fn predict(
        &mut self,
        x: &LatentTensor,
        cond: &Conditioning,
        t: f32,
        guidance: f32,
    ) -> Result<LatentTensor>;
}

/// Flux transformer running as an ONNX session.
pub struct OnnxTransformer {
    session: Session,
    takes_guidance: bool,
}

impl OnnxTransformer {
    /// Load the transformer.
    ///
    /// # Errors
    ///
    /// Returns an error if the model cannot be loaded.
    pub fn load(cache: &ModelCache, device: Device) -> Result<Self> {
        tracing::info!("Loading Flux transformer...");
        let session = cache.load_session(ModelFile::Transformer, device)?;
        let takes_guidance = has_input(&session, "guidance");
        Ok(Self {
            session,
            takes_guidance,
        })
    }
}

impl VelocityModel for OnnxTransformer {
    fn predict(
        &mut self,
        x: &LatentTensor,
        cond: &Conditioning,
        t: f32,
        guidance: f32,
    ) -> Result<LatentTensor> {
        let (_, _, height, width) = x.dim();
        let tensor = |result: ort::Result<_>| result.map_err(|source| Error::Inference { source });

        let hidden = tensor(Tensor::from_array(pack_latents(x)?))?;
        let txt = tensor(Tensor::from_array(cond.txt.clone()))?;
        let pooled = tensor(Tensor::from_array(cond.vec.clone()))?;
        let timestep = tensor(Tensor::from_array(Array1::from_vec(vec![t])))?;
        let img_ids = tensor(Tensor::from_array(cond.img_ids.clone()))?;
        let txt_ids = tensor(Tensor::from_array(cond.txt_ids.clone()))?;

        let outputs = if self.takes_guidance {
            let guidance = tensor(Tensor::from_array(Array1::from_vec(vec![guidance])))?;
            self.session.run(ort::inputs![
                "hidden_states" => hidden,
                "encoder_hidden_states" => txt,
                "pooled_projections" => pooled,
                "timestep" => timestep,
                "img_ids" => img_ids,
                "txt_ids" => txt_ids,
                "guidance" => guidance,
            ])
        } else {
            self.session.run(ort::inputs![
                "hidden_states" => hidden,
                "encoder_hidden_states" => txt,
                "pooled_projections" => pooled,
                "timestep" => timestep,
                "img_ids" => img_ids,
                "txt_ids" => txt_ids,
            ])
        }
        .map_err(|source| Error::Inference { source })?;

        let output = outputs
            .values()
            .next()
            .ok_or_else(|| Error::ShapeMismatch {
                expected: "velocity output".to_string(),
                actual: "no output".to_string(),
            })?;

        unpack_latents(&extract_array::<Ix3>(&output)?, height, width)
    }
}

/// Regenerates the masked region of a latent while pinning the rest to the
/// background's flow trajectory.
///
/// Each step records the velocity under [`FeatureKey::velocity`]. The
/// background anchor for a step is read from [`FeatureKey::background`] when
/// the cache already holds it and computed (then stored) otherwise.
pub struct MaskedFlowDenoiser<M> {
    model: M,
    shift_schedule: bool,
}

impl<M: VelocityModel> MaskedFlowDenoiser<M> {
    #[must_use]
    pub const fn new(model: M, shift_schedule: bool) -> Self {
        Self {
            model,
            shift_schedule,
        }
    }
}

impl MaskedFlowDenoiser<OnnxTransformer> {
    /// Load the transformer for `model`.
    ///
    /// # Errors
    ///
    /// Returns an error if the model cannot be loaded.
    pub fn load(cache: &ModelCache, model: ModelName, device: Device) -> Result<Self> {
        Ok(Self::new(
            OnnxTransformer::load(cache, device)?,
            model.shifts_schedule(),
        ))
    }
}

impl<M: VelocityModel> Denoiser for MaskedFlowDenoiser<M> {
    fn denoise(
        &mut self,
        z_bg: &LatentTensor,
        z_fg: &LatentTensor,
        cond: &Conditioning,
        mask: &MaskTensor,
        opts: &SamplingOptions,
        info: &mut StepInfo,
    ) -> Result<LatentTensor> {
        opts.validate()?;

        let (_, _, height, width) = z_bg.dim();
        let timesteps = schedule(
            opts.denoise_num_steps,
            (height / 2) * (width / 2),
            self.shift_schedule,
        );
        let num_steps = opts.denoise_num_steps;
        let start = info.t.min(num_steps - 1);
        tracing::debug!("Denoising steps {start}..{num_steps}, schedule {timesteps:?}");

        let mut rng = opts
            .seed
            .map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);
        let noise = gaussian_noise(z_bg, &mut rng);

        let foreground = if opts.re_init {
            LatentTensor::zeros(z_bg.raw_dim())
        } else {
            z_fg.clone()
        };
        let init = select(mask, &foreground, z_bg)?;

        let t0 = timesteps[start];
        let mut x = &noise * t0 + &init * (1.0 - t0);

        let pb = ProgressBar::new((num_steps - start) as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} Denoising [{bar:40.cyan/blue}] {pos}/{len}")
                .expect("valid template")
                .progress_chars("#>-"),
        );

        for step in start..num_steps {
            let (t_curr, t_prev) = (timesteps[step], timesteps[step + 1]);

            let velocity = self
                .model
                .predict(&x, cond, t_curr, opts.denoise_guidance)?;
            x = x + &velocity * (t_prev - t_curr);
            info.feature.insert(FeatureKey::velocity(step), velocity)?;

            let key = FeatureKey::background(step);
            let anchor = if let Some(cached) = info.feature.get(&key) {
                cached.clone()
            } else {
                let anchor = &noise * t_prev + z_bg * (1.0 - t_prev);
                info.feature.insert(key, anchor.clone())?;
                anchor
            };
            x = select(mask, &x, &anchor)?;

            pb.inc(1);
        }

        pb.finish_with_message("Denoising complete");
        Ok(x)
    }
}
