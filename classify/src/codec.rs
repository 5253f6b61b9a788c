//! Image decoding and resampling.
//!
//! Images are decoded to plain 8-bit RGB: any alpha channel is dropped and
//! no color profile is applied. Resizing always uses the bilinear
//! (triangle) filter of the `image` crate, to an exact target size, so the
//! same input and target always give the same pixels.

use std::path::Path;

use image::RgbImage;
use image::imageops::{self, FilterType};

use crate::errors::*;

/// Resampling filter used by `resize`.
pub const RESAMPLING_FILTER: FilterType = FilterType::Triangle;

/// Reads and decodes an image file (PNG, JPEG, and whatever else the `image`
/// crate is built with).
pub fn decode(path: impl AsRef<Path>) -> Result<RgbImage> {
    let path = path.as_ref();
    if !path.exists() {
        bail!(ClassifyError::Resource(format!("image not found: {path:?}")))
    }
    let image = image::open(path)
        .with_context(|| ClassifyError::Resource(format!("decoding image {path:?}")))?;
    debug!("decoded {:?} ({}x{}, {:?})", path, image.width(), image.height(), image.color());
    Ok(image.to_rgb8())
}

/// Decodes an in-memory encoded image.
pub fn decode_bytes(bytes: &[u8]) -> Result<RgbImage> {
    let image = image::load_from_memory(bytes)
        .context(ClassifyError::Resource("decoding in-memory image".into()))?;
    Ok(image.to_rgb8())
}

/// Resamples `image` to exactly `width`x`height`. Aspect ratio is not kept.
pub fn resize(image: &RgbImage, width: u32, height: u32) -> Result<RgbImage> {
    if width == 0 || height == 0 {
        bail!(ClassifyError::InvalidArgument(format!(
            "target size must be positive, got {width}x{height}"
        )))
    }
    if image.width() == 0 || image.height() == 0 {
        bail!(ClassifyError::InvalidArgument("can not resize an empty image".into()))
    }
    if image.dimensions() == (width, height) {
        return Ok(image.clone());
    }
    Ok(imageops::resize(image, width, height, RESAMPLING_FILTER))
}
