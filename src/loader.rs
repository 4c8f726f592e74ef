//! Decoding image files into single-channel intensity images.

use crate::error::{NucleusError, Result};
use crate::model::IntensityImage;
use image::{DynamicImage, ImageBuffer, ImageReader, Luma};
use std::path::Path;

/// File extensions the bundled decoders understand
pub const SUPPORTED_EXTENSIONS: &[&str] = &["tif", "tiff", "png", "jpg", "jpeg", "bmp"];

/// Load one channel of an image file as `f32` intensities
///
/// Gray images are used as they are. For colour images `channel` picks red,
/// green or blue (0, 1, 2); without it the luminance is used. Values are
/// scaled to [0, 1] by the sample type's range, so 16-bit and float data
/// keep their precision.
pub fn load_channel(path: &Path, channel: Option<usize>) -> Result<IntensityImage> {
    let reader = ImageReader::open(path).map_err(|e| {
        NucleusError::InvalidInput(format!("cannot open {}: {}", path.display(), e))
    })?;
    // Sniff the content, uploads may carry a meaningless extension
    let img = reader.with_guessed_format()?.decode()?;
    let image = select_channel(img, channel)?;

    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(NucleusError::InvalidInput(format!(
            "{} has zero dimension",
            path.display()
        )));
    }

    tracing::debug!(path = %path.display(), width, height, ?channel, "Loaded image");
    Ok(image)
}

/// Reduce a decoded image to the requested channel
pub fn select_channel(img: DynamicImage, channel: Option<usize>) -> Result<IntensityImage> {
    let is_color = img.color().has_color();

    match (is_color, channel) {
        (false, None | Some(0)) | (true, None) => Ok(img.to_luma32f()),
        (false, Some(c)) => Err(NucleusError::InvalidInput(format!(
            "channel {} requested from a single-channel image",
            c
        ))),
        (true, Some(c)) if c < 3 => {
            let rgb = img.to_rgb32f();
            Ok(ImageBuffer::from_fn(rgb.width(), rgb.height(), |x, y| {
                Luma([rgb.get_pixel(x, y)[c]])
            }))
        }
        (true, Some(c)) => Err(NucleusError::InvalidInput(format!(
            "channel {} out of range for a colour image (0-2)",
            c
        ))),
    }
}

/// True when the file name has one of the given extensions, ignoring case
pub fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(extension.trim_start_matches('.')))
        .unwrap_or(false)
}
