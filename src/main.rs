//! kvedit CLI - extract foreground latents and inject them into other images.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kvedit::model::{Device, ModelCache, ModelName};
use kvedit::{run_edit_from_latent, EditJob, Extractor, SamplingOptions};

/// Object injection for Flux latent diffusion.
#[derive(Parser, Debug)]
#[command(name = "kvedit")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding the ONNX models (defaults to the platform cache dir).
    #[arg(long, global = true, env = "KVEDIT_MODEL_DIR", value_name = "DIR")]
    model_dir: Option<PathBuf>,

    /// Base URL missing model files are downloaded from.
    #[arg(long, global = true, env = "KVEDIT_MODEL_URL", value_name = "URL")]
    model_url: Option<String>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Encode a target image and save only its masked foreground latent.
    Extract(ExtractArgs),
    /// Inject a saved foreground latent into a source image.
    Edit(EditArgs),
}

#[derive(Args, Debug)]
struct ModelArgs {
    /// Compute device: cpu, cuda or cuda:N.
    #[arg(long, default_value = "cuda")]
    device: Device,

    /// Model variant: flux-dev or flux-schnell.
    #[arg(long = "model_name", default_value = "flux-dev")]
    model_name: ModelName,
}

#[derive(Args, Debug)]
struct ExtractArgs {
    /// Target image with the object to inject.
    #[arg(long = "target_image", value_name = "PATH")]
    target_image: PathBuf,

    /// RGBA mask whose alpha marks the foreground region.
    #[arg(long, value_name = "PATH")]
    mask: PathBuf,

    /// Directory the foreground latent is written to.
    #[arg(long = "save_dir", default_value = "latents", value_name = "DIR")]
    save_dir: PathBuf,

    #[command(flatten)]
    model: ModelArgs,
}

#[derive(Args, Debug)]
struct EditArgs {
    /// Source image the object is injected into.
    #[arg(long = "src_image", value_name = "PATH")]
    src_image: PathBuf,

    /// Foreground latent written by `extract`.
    #[arg(long = "z_fg", value_name = "PATH")]
    z_fg: PathBuf,

    /// RGBA mask whose alpha marks the region to regenerate.
    #[arg(long, value_name = "PATH")]
    mask: PathBuf,

    /// Prompt describing the edited image.
    #[arg(long)]
    prompt: String,

    /// Output image path.
    #[arg(long, value_name = "PATH")]
    output: PathBuf,

    /// Schedule index to start denoising from.
    #[arg(long = "t_step", default_value = "0", value_name = "INT")]
    t_step: usize,

    /// Number of denoising steps.
    #[arg(long, default_value = "28", value_name = "INT")]
    steps: usize,

    /// Distilled guidance strength.
    #[arg(long, default_value = "5.5", value_name = "FLOAT")]
    guidance: f32,

    /// Random seed for reproducibility.
    #[arg(long, value_name = "INT")]
    seed: Option<u64>,

    /// Regenerate the masked region from noise instead of the foreground latent.
    #[arg(long = "re_init")]
    re_init: bool,

    /// Output JPEG quality (1-100).
    #[arg(short, long, default_value = "95", value_name = "INT")]
    quality: u8,

    #[command(flatten)]
    model: ModelArgs,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("kvedit={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    if let Err(err) = run(&cli) {
        tracing::error!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Command::Extract(args) => extract(cli, args),
        Command::Edit(args) => edit(cli, args),
    }
}

fn model_cache(cli: &Cli, model: ModelName) -> Result<ModelCache> {
    ModelCache::new(cli.model_dir.as_deref(), model, cli.model_url.clone())
        .context("Failed to prepare model directory")
}

fn extract(cli: &Cli, args: &ExtractArgs) -> Result<()> {
    let cache = model_cache(cli, args.model.model_name)?;

    let mut extractor =
        Extractor::load(&cache, args.model.device).context("Failed to load autoencoder")?;

    let save_path = extractor
        .run(&args.target_image, &args.mask, &args.save_dir)
        .context("Failed to extract foreground latent")?;

    println!("Foreground-only z_fg saved to: {}", save_path.display());
    Ok(())
}

fn edit(cli: &Cli, args: &EditArgs) -> Result<()> {
    let opts = SamplingOptions {
        target_prompt: args.prompt.clone(),
        denoise_num_steps: args.steps,
        denoise_guidance: args.guidance,
        seed: args.seed,
        re_init: args.re_init,
        ..SamplingOptions::default()
    };
    opts.validate().context("Invalid sampling options")?;

    let job = EditJob {
        t_step: args.t_step,
        quality: args.quality,
        ..EditJob::new(&args.src_image, &args.z_fg, &args.mask, &args.output)
    };

    let cache = model_cache(cli, args.model.model_name)?;
    run_edit_from_latent(&job, &opts, &cache, args.model.model_name, args.model.device)
        .context("Failed to run edit")?;

    println!("Saved: {}", job.output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_extract_flags_and_defaults() {
        let cli = Cli::try_parse_from([
            "kvedit",
            "extract",
            "--target_image",
            "cat.png",
            "--mask",
            "cat_mask.png",
        ])
        .unwrap();

        let Command::Extract(args) = cli.command else {
            panic!("expected extract");
        };
        assert_eq!(args.target_image, PathBuf::from("cat.png"));
        assert_eq!(args.mask, PathBuf::from("cat_mask.png"));
        assert_eq!(args.save_dir, PathBuf::from("latents"));
        assert_eq!(args.model.device, Device::CudaDefault);
        assert_eq!(args.model.model_name, ModelName::FluxDev);
    }

    #[test]
    fn test_extract_overrides() {
        let cli = Cli::try_parse_from([
            "kvedit",
            "extract",
            "--target_image",
            "cat.png",
            "--mask",
            "cat_mask.png",
            "--save_dir",
            "out",
            "--model_name",
            "flux-schnell",
            "--device",
            "cpu",
        ])
        .unwrap();

        let Command::Extract(args) = cli.command else {
            panic!("expected extract");
        };
        assert_eq!(args.save_dir, PathBuf::from("out"));
        assert_eq!(args.model.model_name, ModelName::FluxSchnell);
        assert_eq!(args.model.device, Device::Cpu);
    }

    #[test]
    fn test_extract_requires_target_image() {
        let err = Cli::try_parse_from(["kvedit", "extract", "--mask", "cat_mask.png"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_extract_rejects_unknown_model() {
        assert!(Cli::try_parse_from([
            "kvedit",
            "extract",
            "--target_image",
            "cat.png",
            "--mask",
            "cat_mask.png",
            "--model_name",
            "sd-1.5",
        ])
        .is_err());
    }

    #[test]
    fn test_edit_flags_and_defaults() {
        let cli = Cli::try_parse_from([
            "kvedit",
            "edit",
            "--src_image",
            "room.png",
            "--z_fg",
            "latents/z_fg_cat.pt",
            "--mask",
            "sofa_mask.png",
            "--prompt",
            "a cat on the sofa",
            "--output",
            "out/edited.jpg",
            "--t_step",
            "4",
            "--re_init",
        ])
        .unwrap();

        let Command::Edit(args) = cli.command else {
            panic!("expected edit");
        };
        assert_eq!(args.src_image, PathBuf::from("room.png"));
        assert_eq!(args.z_fg, PathBuf::from("latents/z_fg_cat.pt"));
        assert_eq!(args.t_step, 4);
        assert!(args.re_init);
        assert_eq!(args.steps, 28);
        assert!((args.guidance - 5.5).abs() < f32::EPSILON);
        assert_eq!(args.quality, 95);
        assert_eq!(args.seed, None);
        assert_eq!(args.model.device, Device::CudaDefault);
        assert_eq!(args.model.model_name, ModelName::FluxDev);
    }

    #[test]
    fn test_edit_t_step_defaults_to_zero() {
        let cli = Cli::try_parse_from([
            "kvedit",
            "edit",
            "--src_image",
            "room.png",
            "--z_fg",
            "z.pt",
            "--mask",
            "m.png",
            "--prompt",
            "p",
            "--output",
            "o.png",
        ])
        .unwrap();

        let Command::Edit(args) = cli.command else {
            panic!("expected edit");
        };
        assert_eq!(args.t_step, 0);
        assert!(!args.re_init);
    }
}
