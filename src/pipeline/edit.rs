//! Edit pipeline: inject a saved foreground latent into a source image.

use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::image::{self, check_mask_fits, IMAGE_SIZE};
use crate::latent;
use crate::model::{Device, ModelCache, ModelName};

use super::cache::{FeatureCache, StepInfo};
use super::conditioning::OnnxConditioner;
use super::denoise::{MaskedFlowDenoiser, OnnxTransformer};
use super::options::SamplingOptions;
use super::traits::{Autoencoder, Conditioner, Denoiser};
use super::vae::OnnxAutoencoder;

/// Default JPEG quality for edited images.
pub const DEFAULT_QUALITY: u8 = 95;

/// Inputs and output of one edit.
#[derive(Debug, Clone)]
pub struct EditJob {
    /// Image the foreground is injected into.
    pub src_image: PathBuf,
    /// Foreground latent written by the extractor.
    pub z_fg: PathBuf,
    /// RGBA mask selecting the region to regenerate.
    pub mask: PathBuf,
    /// Where the edited image is written.
    pub output: PathBuf,
    /// Schedule index to start denoising from.
    pub t_step: usize,
    /// JPEG quality (1-100), ignored for other formats.
    pub quality: u8,
}

impl EditJob {
    #[must_use]
    pub fn new(
        src_image: impl Into<PathBuf>,
        z_fg: impl Into<PathBuf>,
        mask: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
    ) -> Self {
        Self {
            src_image: src_image.into(),
            z_fg: z_fg.into(),
            mask: mask.into(),
            output: output.into(),
            t_step: 0,
            quality: DEFAULT_QUALITY,
        }
    }
}

/// The networks an edit runs through.
pub struct EditRunner<A, C, D> {
    autoencoder: A,
    conditioner: C,
    denoiser: D,
}

/// Edit runner backed by ONNX sessions.
pub type OnnxEditRunner =
    EditRunner<OnnxAutoencoder, OnnxConditioner, MaskedFlowDenoiser<OnnxTransformer>>;

impl<A: Autoencoder, C: Conditioner, D: Denoiser> EditRunner<A, C, D> {
    #[must_use]
    pub const fn new(autoencoder: A, conditioner: C, denoiser: D) -> Self {
        Self {
            autoencoder,
            conditioner,
            denoiser,
        }
    }

    /// Run one edit and write the result to `job.output`.
    ///
    /// The output file is only touched after denoising succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Deserialization`] if the foreground latent is missing,
    /// corrupt, or shaped differently from the source latent, and the usual
    /// loading, inference, and IO errors otherwise.
    pub fn run(&mut self, job: &EditJob, opts: &SamplingOptions) -> Result<()> {
        opts.validate()?;

        tracing::info!("Encoding source image: {}", job.src_image.display());
        let src = image::load_image(&job.src_image, IMAGE_SIZE)?;
        let z_bg = self.autoencoder.encode(&src)?;

        tracing::info!("Loading foreground latent: {}", job.z_fg.display());
        let z_fg = latent::load_latent(&job.z_fg)?;
        if z_fg.dim() != z_bg.dim() {
            return Err(Error::Deserialization {
                path: job.z_fg.clone(),
                reason: format!(
                    "latent shape {:?} does not match the source latent {:?}",
                    z_fg.shape(),
                    z_bg.shape()
                ),
            });
        }

        let mask = image::load_mask(&job.mask)?;
        check_mask_fits(&mask, &z_bg, &job.mask)?;

        tracing::info!("Preparing conditioning for prompt {:?}", opts.target_prompt);
        let cond = self.conditioner.prepare(&z_bg, &opts.target_prompt)?;

        let mut info = StepInfo::new(job.t_step, FeatureCache::new(&z_bg));

        tracing::info!("Running diffusion...");
        let result = self
            .denoiser
            .denoise(&z_bg, &z_fg, &cond, &mask, opts, &mut info)?;

        tracing::info!("Decoding from latent space...");
        let decoded = self.autoencoder.decode(&result)?;

        tracing::info!("Saving output to: {}", job.output.display());
        image::save_image(&decoded, &job.output, job.quality)?;

        Ok(())
    }
}

impl OnnxEditRunner {
    /// Load the autoencoder, both prompt encoders, and the transformer.
    ///
    /// # Errors
    ///
    /// Returns an error if any model cannot be loaded.
    pub fn load(cache: &ModelCache, model: ModelName, device: Device) -> Result<Self> {
        tracing::info!("Loading {model} models on {device}");
        Ok(Self::new(
            OnnxAutoencoder::load(cache, device)?,
            OnnxConditioner::load(cache, model, device)?,
            MaskedFlowDenoiser::load(cache, model, device)?,
        ))
    }
}

/// Load the `model` networks onto `device` and run `job`.
///
/// # Errors
///
/// Returns an error if the models cannot be loaded or the edit fails.
pub fn run_edit_from_latent(
    job: &EditJob,
    opts: &SamplingOptions,
    cache: &ModelCache,
    model: ModelName,
    device: Device,
) -> Result<()> {
    let mut runner = OnnxEditRunner::load(cache, model, device)?;
    runner.run(job, opts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::latent::LatentTensor;
    use crate::pipeline::extract::Extractor;
    use crate::pipeline::testing::{PasteDenoiser, PoolingAutoencoder, RecordingConditioner};
    use ::image::{DynamicImage, Rgb, RgbImage, Rgba, RgbaImage};

    type FakeRunner = EditRunner<PoolingAutoencoder, RecordingConditioner, PasteDenoiser>;

    fn runner() -> FakeRunner {
        EditRunner::new(
            PoolingAutoencoder,
            RecordingConditioner::default(),
            PasteDenoiser::default(),
        )
    }

    struct Fixture {
        dir: tempfile::TempDir,
        src: PathBuf,
        target: PathBuf,
        mask: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("scene.png");
        let target = dir.path().join("object.png");
        let mask = dir.path().join("mask.png");

        DynamicImage::ImageRgb8(RgbImage::from_pixel(512, 512, Rgb([20, 120, 220])))
            .save(&src)
            .unwrap();
        DynamicImage::ImageRgb8(RgbImage::from_pixel(512, 512, Rgb([250, 10, 10])))
            .save(&target)
            .unwrap();
        let mask_img =
            RgbaImage::from_fn(512, 512, |x, _| Rgba([0, 0, 0, if x < 256 { 255 } else { 0 }]));
        DynamicImage::ImageRgba8(mask_img).save(&mask).unwrap();

        Fixture {
            dir,
            src,
            target,
            mask,
        }
    }

    fn opts() -> SamplingOptions {
        SamplingOptions {
            target_prompt: "a red cube on the table".to_string(),
            ..SamplingOptions::default()
        }
    }

    #[test]
    fn test_edit_injects_foreground() {
        let fx = fixture();
        let z_fg_path = Extractor::new(PoolingAutoencoder)
            .run(&fx.target, &fx.mask, fx.dir.path())
            .unwrap();

        let output = fx.dir.path().join("out").join("edited.png");
        let mut job = EditJob::new(&fx.src, &z_fg_path, &fx.mask, &output);
        job.t_step = 3;

        let mut runner = runner();
        runner.run(&job, &opts()).unwrap();

        assert_eq!(runner.conditioner.prompts, vec!["a red cube on the table"]);
        assert_eq!(runner.denoiser.seen_start, Some(3));
        assert_eq!(runner.denoiser.seen_cache_len, Some(0));

        let edited = ::image::open(&output).unwrap().to_rgb8();
        assert_eq!(edited.dimensions(), (512, 512));
        // Left half carries the object's red channel, right half the scene's.
        assert!(edited.get_pixel(10, 10)[0] > 200);
        assert!(edited.get_pixel(500, 10)[0] < 60);
    }

    #[test]
    fn test_output_is_always_working_resolution() {
        let fx = fixture();
        let z_fg_path = Extractor::new(PoolingAutoencoder)
            .run(&fx.target, &fx.mask, fx.dir.path())
            .unwrap();

        let wide_src = fx.dir.path().join("wide.png");
        DynamicImage::ImageRgb8(RgbImage::from_pixel(1024, 768, Rgb([20, 120, 220])))
            .save(&wide_src)
            .unwrap();

        let output = fx.dir.path().join("wide_edited.png");
        let job = EditJob::new(&wide_src, &z_fg_path, &fx.mask, &output);
        runner().run(&job, &opts()).unwrap();

        let edited = ::image::open(&output).unwrap().to_rgb8();
        assert_eq!(edited.dimensions(), (IMAGE_SIZE, IMAGE_SIZE));
    }

    #[test]
    fn test_missing_latent_leaves_output_untouched() {
        let fx = fixture();
        let output = fx.dir.path().join("out").join("edited.png");
        let job = EditJob::new(&fx.src, fx.dir.path().join("z_fg_absent.pt"), &fx.mask, &output);

        let mut runner = runner();
        let err = runner.run(&job, &opts()).unwrap_err();

        assert!(matches!(err, Error::Deserialization { .. }));
        assert!(!output.exists());
        assert!(!output.parent().unwrap().exists());
        assert!(runner.conditioner.prompts.is_empty());
    }

    #[test]
    fn test_existing_output_is_not_overwritten_on_failure() {
        let fx = fixture();
        let output = fx.dir.path().join("edited.png");
        std::fs::write(&output, b"previous result").unwrap();
        let job = EditJob::new(&fx.src, fx.dir.path().join("nope.pt"), &fx.mask, &output);

        assert!(runner().run(&job, &opts()).is_err());
        assert_eq!(std::fs::read(&output).unwrap(), b"previous result");
    }

    #[test]
    fn test_latent_shape_mismatch_is_deserialization_error() {
        let fx = fixture();
        let z_fg_path = fx.dir.path().join("z_fg_small.pt");
        latent::save_latent(&LatentTensor::zeros((1, 16, 32, 32)), &z_fg_path).unwrap();

        let job = EditJob::new(&fx.src, &z_fg_path, &fx.mask, fx.dir.path().join("o.png"));
        let err = runner().run(&job, &opts()).unwrap_err();
        assert!(matches!(err, Error::Deserialization { .. }));
    }

    #[test]
    fn test_invalid_options_fail_first() {
        let fx = fixture();
        let job = EditJob::new(&fx.src, "unused.pt", &fx.mask, fx.dir.path().join("o.png"));
        let bad = SamplingOptions {
            denoise_num_steps: 0,
            ..opts()
        };
        assert!(matches!(
            runner().run(&job, &bad),
            Err(Error::InvalidParameter { .. })
        ));
    }
}
