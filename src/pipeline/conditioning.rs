//! Prompt conditioning for the Flux transformer.

use ndarray::{Array2, Array3, Ix2, Ix3};
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;

use crate::error::{Error, Result};
use crate::latent::LatentTensor;
use crate::model::{Device, ModelCache, ModelFile, ModelName};

use super::onnx::{extract_array, pick_output};
use super::traits::Conditioner;

/// CLIP context length.
const CLIP_MAX_LENGTH: usize = 77;

/// Transformer inputs derived from a prompt and the latent grid.
#[derive(Debug, Clone)]
pub struct Conditioning {
    /// T5 hidden states, (1, L, 4096).
    pub txt: Array3<f32>,
    /// Text position ids, all zero, (L, 3).
    pub txt_ids: Array2<f32>,
    /// CLIP pooled prompt vector, (1, 768).
    pub vec: Array2<f32>,
    /// Latent patch position ids, (H/2 * W/2, 3).
    pub img_ids: Array2<f32>,
}

impl Conditioning {
    /// Assemble conditioning from encoder outputs for a latent of `height` x `width`.
    #[must_use]
    pub fn new(txt: Array3<f32>, vec: Array2<f32>, height: usize, width: usize) -> Self {
        let txt_ids = Array2::zeros((txt.dim().1, 3));
        Self {
            txt,
            txt_ids,
            vec,
            img_ids: img_ids(height, width),
        }
    }
}

/// Position ids for the 2x2 patch grid of a `height` x `width` latent:
/// column 0 is zero, column 1 the patch row, column 2 the patch column.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn img_ids(height: usize, width: usize) -> Array2<f32> {
    let pw = width / 2;
    Array2::from_shape_fn(((height / 2) * pw, 3), |(token, axis)| match axis {
        1 => (token / pw) as f32,
        2 => (token % pw) as f32,
        _ => 0.0,
    })
}

/// Tokenize `prompt`, truncating or padding to exactly `max_len` ids.
fn token_ids(
    tokenizer: &Tokenizer,
    name: &str,
    prompt: &str,
    max_len: usize,
    pad_id: u32,
) -> Result<Array2<i64>> {
    let encoding = tokenizer
        .encode(prompt, true)
        .map_err(|e| Error::Tokenizer {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

    let mut ids: Vec<i64> = encoding
        .get_ids()
        .iter()
        .take(max_len)
        .map(|&id| i64::from(id))
        .collect();
    ids.resize(max_len, i64::from(pad_id));

    Ok(Array2::from_shape_fn((1, max_len), |(_, i)| ids[i]))
}

fn load_tokenizer(cache: &ModelCache, file: ModelFile) -> Result<Tokenizer> {
    let path = cache.get_path(file)?;
    Tokenizer::from_file(&path).map_err(|e| Error::Tokenizer {
        name: file.filename().to_string(),
        reason: e.to_string(),
    })
}

/// CLIP + T5 prompt encoders running as ONNX sessions.
pub struct OnnxConditioner {
    clip: Session,
    clip_output: String,
    clip_tokenizer: Tokenizer,
    t5: Session,
    t5_output: String,
    t5_tokenizer: Tokenizer,
    t5_max_length: usize,
}

impl OnnxConditioner {
    /// Load both encoders and their tokenizers.
    ///
    /// # Errors
    ///
    /// Returns an error if any model or tokenizer cannot be loaded.
    pub fn load(cache: &ModelCache, model: ModelName, device: Device) -> Result<Self> {
        tracing::info!("Loading CLIP text encoder...");
        let clip = cache.load_session(ModelFile::Clip, device)?;
        let clip_output = pick_output(&clip, &["pooler_output", "text_embeds"])?;
        let clip_tokenizer = load_tokenizer(cache, ModelFile::ClipTokenizer)?;

        tracing::info!("Loading T5 encoder...");
        let t5 = cache.load_session(ModelFile::T5, device)?;
        let t5_output = pick_output(&t5, &["last_hidden_state"])?;
        let t5_tokenizer = load_tokenizer(cache, ModelFile::T5Tokenizer)?;

        Ok(Self {
            clip,
            clip_output,
            clip_tokenizer,
            t5,
            t5_output,
            t5_tokenizer,
            t5_max_length: model.t5_max_length(),
        })
    }

    fn encode_clip(&mut self, prompt: &str) -> Result<Array2<f32>> {
        let pad_id = self.clip_tokenizer.token_to_id("<|endoftext|>").unwrap_or(0);
        let ids = token_ids(&self.clip_tokenizer, "clip", prompt, CLIP_MAX_LENGTH, pad_id)?;
        let input = Tensor::from_array(ids).map_err(|source| Error::Inference { source })?;

        let outputs = self
            .clip
            .run(ort::inputs!["input_ids" => input])
            .map_err(|source| Error::Inference { source })?;

        extract_array::<Ix2>(&outputs[self.clip_output.as_str()])
    }

    fn encode_t5(&mut self, prompt: &str) -> Result<Array3<f32>> {
        let pad_id = self.t5_tokenizer.token_to_id("<pad>").unwrap_or(0);
        let ids = token_ids(&self.t5_tokenizer, "t5", prompt, self.t5_max_length, pad_id)?;
        let input = Tensor::from_array(ids).map_err(|source| Error::Inference { source })?;

        let outputs = self
            .t5
            .run(ort::inputs!["input_ids" => input])
            .map_err(|source| Error::Inference { source })?;

        extract_array::<Ix3>(&outputs[self.t5_output.as_str()])
    }
}

impl Conditioner for OnnxConditioner {
    fn prepare(&mut self, latent: &LatentTensor, prompt: &str) -> Result<Conditioning> {
        let (_, _, height, width) = latent.dim();

        let txt = self.encode_t5(prompt)?;
        let vec = self.encode_clip(prompt)?;
        tracing::debug!("Prompt conditioning: txt {:?}, vec {:?}", txt.shape(), vec.shape());

        Ok(Conditioning::new(txt, vec, height, width))
    }
}
