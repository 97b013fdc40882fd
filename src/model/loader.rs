//! Model downloading and loading utilities.

use std::fmt;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use indicatif::{ProgressBar, ProgressStyle};
use ort::session::Session;

use crate::error::{Error, Result};

use super::Device;

/// Flux model variants the pipelines can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelName {
    #[default]
    FluxDev,
    FluxSchnell,
}

impl ModelName {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FluxDev => "flux-dev",
            Self::FluxSchnell => "flux-schnell",
        }
    }

    /// Number of T5 tokens the transformer attends to.
    #[must_use]
    pub const fn t5_max_length(self) -> usize {
        match self {
            Self::FluxDev => 512,
            Self::FluxSchnell => 256,
        }
    }

    /// Whether the timestep schedule is shifted towards high noise levels
    /// based on the image token count. Only the guidance-distilled model is.
    #[must_use]
    pub const fn shifts_schedule(self) -> bool {
        matches!(self, Self::FluxDev)
    }
}

impl FromStr for ModelName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "flux-dev" => Ok(Self::FluxDev),
            "flux-schnell" => Ok(Self::FluxSchnell),
            other => Err(Error::invalid_parameter(
                "model_name",
                format!("expected flux-dev or flux-schnell, got {other:?}"),
            )),
        }
    }
}

impl fmt::Display for ModelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Files making up one model variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFile {
    /// Autoencoder encoder - encodes images to latent space.
    AeEncoder,
    /// Autoencoder decoder - decodes latents to images.
    AeDecoder,
    /// CLIP text model - pooled prompt vector.
    Clip,
    /// T5 encoder - per-token prompt states.
    T5,
    /// Flux transformer - velocity prediction.
    Transformer,
    ClipTokenizer,
    T5Tokenizer,
}

impl ModelFile {
    #[must_use]
    pub const fn filename(self) -> &'static str {
        match self {
            Self::AeEncoder => "ae_encoder.onnx",
            Self::AeDecoder => "ae_decoder.onnx",
            Self::Clip => "clip.onnx",
            Self::T5 => "t5.onnx",
            Self::Transformer => "transformer.onnx",
            Self::ClipTokenizer => "clip_tokenizer.json",
            Self::T5Tokenizer => "t5_tokenizer.json",
        }
    }

    /// External weights file for graphs over the 2 GB protobuf limit.
    /// Must match the reference stored inside the ONNX file.
    #[must_use]
    pub const fn data_filename(self) -> Option<&'static str> {
        match self {
            Self::T5 => Some("t5.onnx_data"),
            Self::Transformer => Some("transformer.onnx_data"),
            _ => None,
        }
    }
}

/// Manages the model directory and downloads.
pub struct ModelCache {
    dir: PathBuf,
    base_url: Option<String>,
}

impl ModelCache {
    /// Create a cache for `model` under `root`.
    ///
    /// Without an explicit root the platform cache directory is used:
    /// - Windows: `%LOCALAPPDATA%\kvedit\models\<model>`
    /// - Linux: `~/.cache/kvedit/models/<model>`
    /// - macOS: `~/Library/Caches/kvedit/models/<model>`
    ///
    /// Missing files are fetched from `<base_url>/<filename>` when a base URL
    /// is given.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(root: Option<&Path>, model: ModelName, base_url: Option<String>) -> Result<Self> {
        let root = root.map_or_else(
            || {
                dirs::cache_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("kvedit")
                    .join("models")
            },
            Path::to_path_buf,
        );
        let dir = root.join(model.as_str());
        fs::create_dir_all(&dir)?;

        Ok(Self {
            dir,
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Get the path to a model file, downloading it and its external data if necessary.
    ///
    /// # Errors
    ///
    /// Returns an error if a file is missing and cannot be downloaded.
    pub fn get_path(&self, file: ModelFile) -> Result<PathBuf> {
        let path = self.dir.join(file.filename());
        self.ensure(&path, file.filename())?;

        if let Some(data_filename) = file.data_filename() {
            self.ensure(&self.dir.join(data_filename), data_filename)?;
        }

        Ok(path)
    }

    /// Load an ONNX session on `device`.
    ///
    /// # Errors
    ///
    /// Returns an error if the model cannot be found or loaded.
    pub fn load_session(&self, file: ModelFile, device: Device) -> Result<Session> {
        let path = self.get_path(file)?;
        let load_err = |source| Error::ModelLoad {
            name: file.filename().to_string(),
            source,
        };

        tracing::debug!("Loading {} on {device}", path.display());
        Session::builder()
            .map_err(load_err)?
            .with_execution_providers(device.execution_providers())
            .map_err(load_err)?
            .commit_from_file(&path)
            .map_err(load_err)
    }

    fn ensure(&self, path: &Path, name: &str) -> Result<()> {
        if path.exists() {
            return Ok(());
        }
        let Some(base) = &self.base_url else {
            return Err(Error::ModelMissing {
                path: path.to_path_buf(),
            });
        };
        download_file(&format!("{base}/{name}"), path, name)
    }
}

/// Download a file from a URL to a path with progress indication.
fn download_file(url: &str, path: &Path, name: &str) -> Result<()> {
    tracing::info!("Downloading {name} from {url}");

    let download_err = |source| Error::ModelDownload {
        name: name.to_string(),
        source,
    };
    let client = reqwest::blocking::Client::new();
    let response = client
        .get(url)
        .send()
        .and_then(reqwest::blocking::Response::error_for_status)
        .map_err(download_err)?;

    let pb = match response.content_length() {
        Some(total) => ProgressBar::new(total),
        None => ProgressBar::new_spinner(),
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            .expect("valid template")
            .progress_chars("#>-"),
    );
    pb.set_message(format!("Downloading {name}"));

    stream_to_file(response, path, &pb)?;
    pb.finish_with_message(format!("Downloaded {name}"));

    Ok(())
}

/// Sibling of `path` that holds a download in progress.
fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}

/// Copy `reader` into `path` through a `.part` file that is renamed into
/// place once complete and removed if the copy fails.
fn stream_to_file(reader: impl Read, path: &Path, pb: &ProgressBar) -> Result<()> {
    let temp_path = partial_path(path);
    let result = write_partial(reader, &temp_path, pb).and_then(|()| {
        fs::rename(&temp_path, path)?;
        Ok(())
    });

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

fn write_partial(mut reader: impl Read, temp_path: &Path, pb: &ProgressBar) -> Result<()> {
    let mut file = fs::File::create(temp_path)?;
    let mut downloaded = 0u64;
    let mut buffer = [0u8; 64 * 1024];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        file.write_all(&buffer[..bytes_read])?;
        downloaded += bytes_read as u64;
        pb.set_position(downloaded);
    }
    file.flush()?;

    Ok(())
}
