//! Image loading utilities.

use std::path::Path;

use image::{imageops::FilterType, DynamicImage, ImageError};
use ndarray::Array4;

use crate::error::{Error, Result};

use super::{ImageTensor, RGB_CHANNELS};

/// Load an image from disk and convert to a normalized tensor.
///
/// The image is:
/// 1. Loaded from the specified path
/// 2. Converted to RGB if necessary
/// 3. Resized to `size`x`size`
/// 4. Normalized to [-1, 1] range
/// 5. Returned as NCHW tensor (1, 3, size, size)
///
/// # Errors
///
/// Returns [`Error::NotFound`] if the path does not exist and
/// [`Error::ImageLoad`] if the file cannot be decoded.
pub fn load_image<P: AsRef<Path>>(path: P, size: u32) -> Result<ImageTensor> {
    let path = path.as_ref();

    let img = open_image(path)?;

    Ok(image_to_tensor(&img, size))
}

/// Open and decode an image, separating missing files from decode failures.
pub(crate) fn open_image(path: &Path) -> Result<DynamicImage> {
    image::open(path).map_err(|source| match source {
        ImageError::IoError(ref io) if io.kind() == std::io::ErrorKind::NotFound => {
            Error::NotFound {
                path: path.to_path_buf(),
            }
        }
        source => Error::ImageLoad {
            path: path.to_path_buf(),
            source,
        },
    })
}

/// Bicubic resampling, the usual default of Python image libraries.
const RESIZE_FILTER: FilterType = FilterType::CatmullRom;

/// Convert a `DynamicImage` to a normalized NCHW tensor.
fn image_to_tensor(img: &DynamicImage, size: u32) -> ImageTensor {
    let rgb = img.to_rgb8();
    let resized = image::imageops::resize(&rgb, size, size, RESIZE_FILTER);

    let side = size as usize;
    let mut tensor = Array4::<f32>::zeros((1, RGB_CHANNELS, side, side));

    for (x, y, pixel) in resized.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..RGB_CHANNELS {
            // Normalize from [0, 255] to [-1, 1]
            tensor[[0, c, y, x]] = (f32::from(pixel[c]) / 127.5) - 1.0;
        }
    }

    tensor
}
