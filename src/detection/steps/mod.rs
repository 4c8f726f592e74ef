//! Individual detection stages

pub mod log_filter;
pub mod morphology;
pub mod segment;
pub mod threshold;

use crate::error::Result;
use crate::model::{BinaryMask, ClosingOptions};
use image::GrayImage;

/// Triangle threshold followed by morphological closing
///
/// Returns the cleaned mask and the selected threshold level, `None` when the
/// filtered image had no usable contrast.
pub fn binarize(filtered: &GrayImage, closing: ClosingOptions) -> Result<(BinaryMask, Option<u8>)> {
    let (mask, level) = threshold::apply(filtered)?;
    tracing::debug!(?level, foreground = mask.foreground_count(), "Thresholded");
    let mask = morphology::apply(mask, closing)?;
    Ok((mask, level))
}
