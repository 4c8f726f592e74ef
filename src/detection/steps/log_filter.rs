use crate::error::{NucleusError, Result};
use crate::model::IntensityImage;
use image::{GrayImage, Luma};
use imageproc::filter::{filter3x3, gaussian_blur_f32};

/// 4-neighbour Laplacian
const LAPLACIAN: [f32; 9] = [0.0, 1.0, 0.0, 1.0, -4.0, 1.0, 0.0, 1.0, 0.0];

/// Laplacian-of-Gaussian blob enhancement
///
/// Smooths with a Gaussian of standard deviation `sigma`, takes the
/// Laplacian, negates it so bright blobs give positive peaks and stretches
/// the response to the full 8-bit range. The input is left untouched.
pub fn apply(image: &IntensityImage, sigma: f32) -> Result<GrayImage> {
    let response = laplacian_of_gaussian(image, sigma)?;

    // Blurring a constant image leaves rounding noise that would otherwise
    // be stretched into full contrast
    let (low, high) = find_min_max(image);
    if !(high > low) {
        let (width, height) = image.dimensions();
        return Ok(GrayImage::new(width, height));
    }

    Ok(enhance(&response))
}

/// Scale-normalised, negated LoG response
pub fn laplacian_of_gaussian(image: &IntensityImage, sigma: f32) -> Result<IntensityImage> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(NucleusError::Filter(format!(
            "empty image ({}x{})",
            width, height
        )));
    }
    // gaussian_blur_f32 panics on a non-positive sigma
    if !sigma.is_finite() || sigma <= 0.0 {
        return Err(NucleusError::Filter(format!(
            "sigma must be > 0, got {}",
            sigma
        )));
    }

    let smoothed = gaussian_blur_f32(image, sigma);
    let scale = sigma * sigma;

    // Borders are replicated by the filter
    let mut response: IntensityImage = filter3x3::<_, f32, f32>(&smoothed, &LAPLACIAN);
    for pixel in response.pixels_mut() {
        pixel[0] *= -scale;
    }
    Ok(response)
}

/// Stretch a response linearly onto 0..=255
///
/// A flat response carries no contrast and maps to all zeros.
pub fn enhance(response: &IntensityImage) -> GrayImage {
    let (min_val, max_val) = find_min_max(response);
    let (width, height) = response.dimensions();

    if !(max_val > min_val) {
        return GrayImage::new(width, height);
    }

    let range = max_val - min_val;
    GrayImage::from_fn(width, height, |x, y| {
        let value = response.get_pixel(x, y)[0];
        let normalized = ((value - min_val) / range * 255.0) as u8;
        Luma([normalized])
    })
}

fn find_min_max(img: &IntensityImage) -> (f32, f32) {
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;

    for pixel in img.pixels() {
        let val = pixel[0];
        min = min.min(val);
        max = max.max(val);
    }

    (min, max)
}
