//! Image saving utilities.

use std::path::Path;

use image::{DynamicImage, ImageBuffer, Rgb};

use crate::error::{Error, Result};

use super::ImageTensor;

/// Save a tensor as an 8-bit RGB image file.
///
/// The tensor is:
/// 1. Clamped to [-1, 1] and denormalized to [0, 255]
/// 2. Rearranged from NCHW to HWC
/// 3. Saved to the specified path (format inferred from extension)
///
/// Parent directories are created when missing.
///
/// # Arguments
///
/// * `tensor` - NCHW tensor with values in [-1, 1]
/// * `path` - Output file path
/// * `quality` - JPEG quality (1-100), ignored for other formats
///
/// # Errors
///
/// Returns an error if the tensor is not a 3-channel image or the file
/// cannot be written.
pub fn save_image<P: AsRef<Path>>(tensor: &ImageTensor, path: P, quality: u8) -> Result<()> {
    let path = path.as_ref();

    let img = DynamicImage::ImageRgb8(tensor_to_image(tensor)?);

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("png")
        .to_lowercase();

    match extension.as_str() {
        "jpg" | "jpeg" => {
            let mut output = std::fs::File::create(path)?;
            let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut output, quality);
            img.write_with_encoder(encoder)
                .map_err(|source| Error::ImageSave {
                    path: path.to_path_buf(),
                    source,
                })?;
        }
        _ => {
            img.save(path).map_err(|source| Error::ImageSave {
                path: path.to_path_buf(),
                source,
            })?;
        }
    }

    Ok(())
}

/// Convert a normalized NCHW tensor to an RGB image.
#[allow(clippy::cast_possible_truncation)]
fn tensor_to_image(tensor: &ImageTensor) -> Result<ImageBuffer<Rgb<u8>, Vec<u8>>> {
    let (_, channels, height, width) = tensor.dim();
    if channels != 3 {
        return Err(Error::ShapeMismatch {
            expected: "3-channel image tensor".to_string(),
            actual: format!("{:?}", tensor.shape()),
        });
    }

    // Safe: decoder output dimensions are image dimensions and fit in u32
    let img = ImageBuffer::from_fn(width as u32, height as u32, |x, y| {
        let (x, y) = (x as usize, y as usize);
        Rgb([
            denormalize(tensor[[0, 0, y, x]]),
            denormalize(tensor[[0, 1, y, x]]),
            denormalize(tensor[[0, 2, y, x]]),
        ])
    });

    Ok(img)
}

/// Denormalize a value from [-1, 1] to [0, 255] with clamping.
#[inline]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn denormalize(value: f32) -> u8 {
    ((value.clamp(-1.0, 1.0) + 1.0) * 127.5) as u8
}
