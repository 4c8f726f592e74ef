//! Values that flow between the detection stages and out to callers.

use crate::error::{NucleusError, Result};
use image::{GrayImage, ImageBuffer, Luma, Rgb, RgbImage};
use serde::{Deserialize, Serialize};

/// Single-channel intensity image handed to the pipeline
pub type IntensityImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Label image: 0 is background, anything else a region index
pub type LabelImage = ImageBuffer<Luma<u32>, Vec<u32>>;

/// Physical pixel size of an image series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub pixel_width: f64,
    pub pixel_height: f64,
    pub pixel_depth: f64,
    pub unit: String,
}

impl Calibration {
    /// Calibration with square pixels, expressed in microns
    pub fn isotropic(pixel_size: f64, pixel_depth: f64) -> Self {
        Self {
            pixel_width: pixel_size,
            pixel_height: pixel_size,
            pixel_depth,
            unit: "microns".to_string(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("pixel width", self.pixel_width),
            ("pixel height", self.pixel_height),
            ("pixel depth", self.pixel_depth),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(NucleusError::InvalidInput(format!(
                    "calibration {} must be a positive number, got {}",
                    name, value
                )));
            }
        }
        if self.pixel_width != self.pixel_height {
            return Err(NucleusError::InvalidInput(format!(
                "anisotropic pixels are not supported ({} x {})",
                self.pixel_width, self.pixel_height
            )));
        }
        Ok(())
    }

    /// Physical area covered by one pixel
    pub fn pixel_area(&self) -> f64 {
        self.pixel_width * self.pixel_height
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Self::isotropic(1.0, 1.0)
    }
}

/// Morphological closing applied after thresholding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosingOptions {
    /// Number of dilations, then the same number of erosions
    pub iterations: u8,
    /// Minimum number of opposite-valued 8-neighbours needed to flip a pixel
    pub count: u8,
}

impl Default for ClosingOptions {
    fn default() -> Self {
        Self {
            iterations: 4,
            count: 1,
        }
    }
}

/// Tunable parameters of a detection run. Immutable once a batch starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineParameters {
    /// LoG smoothing scale in pixels
    pub smoothing_sigma: f32,
    /// Smallest accepted nucleus, in square microns
    pub min_area_um2: f64,
    /// Largest accepted nucleus, in square microns
    pub max_area_um2: f64,
    pub closing: ClosingOptions,
    /// Treat enclosed background holes as part of the nucleus
    pub include_holes: bool,
}

impl Default for PipelineParameters {
    fn default() -> Self {
        Self {
            smoothing_sigma: 7.0,
            min_area_um2: 50.0,
            max_area_um2: f64::INFINITY,
            closing: ClosingOptions::default(),
            include_holes: true,
        }
    }
}

impl PipelineParameters {
    pub fn validate(&self) -> Result<()> {
        if !self.smoothing_sigma.is_finite() || self.smoothing_sigma <= 0.0 {
            return Err(NucleusError::InvalidParameters(format!(
                "smoothing sigma must be > 0, got {}",
                self.smoothing_sigma
            )));
        }
        if self.min_area_um2.is_nan() || self.min_area_um2 < 0.0 {
            return Err(NucleusError::InvalidParameters(format!(
                "minimum area must be >= 0, got {}",
                self.min_area_um2
            )));
        }
        if self.max_area_um2.is_nan() || self.min_area_um2 > self.max_area_um2 {
            return Err(NucleusError::InvalidParameters(format!(
                "minimum area {} exceeds maximum area {}",
                self.min_area_um2, self.max_area_um2
            )));
        }
        if !(1..=8).contains(&self.closing.count) {
            return Err(NucleusError::InvalidParameters(format!(
                "closing count must be between 1 and 8, got {}",
                self.closing.count
            )));
        }
        Ok(())
    }
}

/// Binary foreground/background image. Pixels are exactly 0 or 255.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryMask(GrayImage);

impl BinaryMask {
    pub const FOREGROUND: u8 = 255;

    /// All-background mask
    pub fn new(width: u32, height: u32) -> Self {
        Self(GrayImage::new(width, height))
    }

    /// Build a mask from any gray image, non-zero pixels become foreground
    pub fn from_gray(gray: GrayImage) -> Self {
        let mut gray = gray;
        for p in gray.iter_mut() {
            if *p != 0 {
                *p = Self::FOREGROUND;
            }
        }
        Self(gray)
    }

    pub fn from_fn<F>(width: u32, height: u32, mut f: F) -> Self
    where
        F: FnMut(u32, u32) -> bool,
    {
        Self(GrayImage::from_fn(width, height, |x, y| {
            if f(x, y) {
                Luma([Self::FOREGROUND])
            } else {
                Luma([0])
            }
        }))
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.0.dimensions()
    }

    pub fn is_foreground(&self, x: u32, y: u32) -> bool {
        self.0.get_pixel(x, y)[0] != 0
    }

    pub fn set(&mut self, x: u32, y: u32, foreground: bool) {
        let value = if foreground { Self::FOREGROUND } else { 0 };
        self.0.put_pixel(x, y, Luma([value]));
    }

    pub fn foreground_count(&self) -> usize {
        self.0.iter().filter(|&&p| p != 0).count()
    }

    pub fn as_gray(&self) -> &GrayImage {
        &self.0
    }
}

/// Shape measurements of one accepted nucleus
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NucleusDescriptor {
    /// 1-based, in raster discovery order within the image
    pub id: u32,
    pub area_pixels: f64,
    /// Area in square calibration units
    pub area_calibrated: f64,
    pub circularity: f64,
    pub aspect_ratio: f64,
    pub roundness: f64,
    pub solidity: f64,
    /// Boundary length in calibration units
    pub perimeter: f64,
    /// Best-fit ellipse axes in calibration units
    pub major_axis: f64,
    pub minor_axis: f64,
    /// Centroid in pixel coordinates
    pub centroid: (f64, f64),
}

/// Accepted regions painted with their descriptor id
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledOverlay {
    labels: LabelImage,
}

impl LabeledOverlay {
    pub fn new(labels: LabelImage) -> Self {
        Self { labels }
    }

    /// Overlay without any region drawn
    pub fn background(width: u32, height: u32) -> Self {
        Self::new(LabelImage::new(width, height))
    }

    pub fn labels(&self) -> &LabelImage {
        &self.labels
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.labels.dimensions()
    }

    pub fn id_at(&self, x: u32, y: u32) -> u32 {
        self.labels.get_pixel(x, y)[0]
    }

    pub fn is_background(&self) -> bool {
        self.labels.iter().all(|&l| l == 0)
    }

    /// RGB rendering: black background, one distinct color per id
    pub fn render(&self) -> RgbImage {
        let (width, height) = self.labels.dimensions();
        RgbImage::from_fn(width, height, |x, y| label_color(self.id_at(x, y)))
    }
}

/// Odd multiplier, so the map is a bijection on 24-bit values
const PALETTE_STEP: u32 = 0x9E_3779;

/// Scrambled 24-bit colour per id
///
/// Ids below 2^24 get pairwise distinct colours and only the background
/// is black. Consecutive ids land far apart in the high bits.
fn label_color(id: u32) -> Rgb<u8> {
    let [_, r, g, b] = (id.wrapping_mul(PALETTE_STEP) & 0xFF_FFFF).to_be_bytes();
    Rgb([r, g, b])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_default_parameters_are_valid() {
        let params = PipelineParameters::default();
        assert!(params.validate().is_ok());
        assert_eq!(params.smoothing_sigma, 7.0);
        assert_eq!(params.min_area_um2, 50.0);
        assert!(params.max_area_um2.is_infinite());
    }

    #[test]
    fn test_parameters_reject_inverted_area_range() {
        let params = PipelineParameters {
            min_area_um2: 100.0,
            max_area_um2: 10.0,
            ..Default::default()
        };
        assert!(matches!(
            params.validate(),
            Err(NucleusError::InvalidParameters(_))
        ));
    }

    #[test]
    fn test_parameters_reject_non_positive_sigma() {
        for sigma in [0.0, -1.0, f32::NAN] {
            let params = PipelineParameters {
                smoothing_sigma: sigma,
                ..Default::default()
            };
            assert!(params.validate().is_err(), "sigma {} accepted", sigma);
        }
    }

    #[test]
    fn test_calibration_requires_square_positive_pixels() {
        assert!(Calibration::isotropic(0.1, 0.5).validate().is_ok());
        assert!(Calibration::isotropic(0.0, 0.5).validate().is_err());

        let mut cal = Calibration::isotropic(0.1, 0.5);
        cal.pixel_height = 0.2;
        assert!(matches!(cal.validate(), Err(NucleusError::InvalidInput(_))));
    }

    #[test]
    fn test_mask_from_gray_normalizes_foreground() {
        let gray = GrayImage::from_fn(4, 1, |x, _| Luma([x as u8 * 3]));
        let mask = BinaryMask::from_gray(gray);
        assert!(!mask.is_foreground(0, 0));
        assert_eq!(mask.as_gray().get_pixel(1, 0)[0], BinaryMask::FOREGROUND);
        assert_eq!(mask.foreground_count(), 3);
    }

    #[test]
    fn test_render_keeps_background_black_and_ids_distinct() {
        let labels = LabelImage::from_fn(3, 1, |x, _| Luma([x]));
        let overlay = LabeledOverlay::new(labels);
        let rgb = overlay.render();
        assert_eq!(*rgb.get_pixel(0, 0), Rgb([0, 0, 0]));
        assert_ne!(rgb.get_pixel(1, 0), rgb.get_pixel(2, 0));
        assert_ne!(*rgb.get_pixel(1, 0), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_palette_never_repeats() {
        let colors: HashSet<Rgb<u8>> = (1..=5000).map(label_color).collect();
        assert_eq!(colors.len(), 5000);
        assert!(!colors.contains(&Rgb([0, 0, 0])));
        assert_ne!(label_color(10), label_color(620));
    }
}
