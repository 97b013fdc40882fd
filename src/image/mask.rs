//! Mask loading: RGBA image to a boolean latent-space mask.

use std::path::Path;

use image::{imageops::FilterType, DynamicImage};
use ndarray::Array4;

use crate::error::{Error, Result};
use crate::latent::LatentTensor;

use super::load::open_image;
use super::LATENT_SIZE;

/// Boolean mask in latent space, shaped (1, 1, h, w).
/// `true` marks foreground positions.
pub type MaskTensor = Array4<bool>;

/// Alpha values strictly above this are foreground.
pub const MASK_THRESHOLD: u8 = 128;

/// Load an RGBA mask and binarize its alpha channel at latent resolution.
///
/// The image is resized to 64x64 with nearest-neighbour sampling so alpha
/// values are never blended across the threshold.
///
/// # Errors
///
/// Returns [`Error::InvalidMask`] if the image has no alpha channel, and the
/// usual image loading errors if the file is missing or unreadable.
pub fn load_mask<P: AsRef<Path>>(path: P) -> Result<MaskTensor> {
    let path = path.as_ref();
    let img = open_image(path)?;
    mask_from_image(&img).map_err(|reason| Error::InvalidMask {
        path: path.to_path_buf(),
        reason,
    })
}

/// Check that a mask covers the same spatial grid as a latent.
///
/// # Errors
///
/// Returns [`Error::InvalidMask`] if the mask's height or width differ from
/// the latent's.
pub fn check_mask_fits(mask: &MaskTensor, latent: &LatentTensor, path: &Path) -> Result<()> {
    let (_, _, mh, mw) = mask.dim();
    let (_, _, lh, lw) = latent.dim();
    if (mh, mw) == (lh, lw) {
        return Ok(());
    }
    Err(Error::InvalidMask {
        path: path.to_path_buf(),
        reason: format!("mask is {mh}x{mw} but the latent grid is {lh}x{lw}"),
    })
}

fn mask_from_image(img: &DynamicImage) -> std::result::Result<MaskTensor, String> {
    if !img.color().has_alpha() {
        return Err(format!(
            "expected an image with an alpha channel, got {:?}",
            img.color()
        ));
    }
    if img.width() == 0 || img.height() == 0 {
        return Err("mask image is empty".to_string());
    }

    let rgba = img.to_rgba8();
    let resized = image::imageops::resize(&rgba, LATENT_SIZE, LATENT_SIZE, FilterType::Nearest);

    let side = LATENT_SIZE as usize;
    let mut mask = Array4::from_elem((1, 1, side, side), false);
    for (x, y, pixel) in resized.enumerate_pixels() {
        mask[[0, 0, y as usize, x as usize]] = pixel[3] > MASK_THRESHOLD;
    }

    Ok(mask)
}
