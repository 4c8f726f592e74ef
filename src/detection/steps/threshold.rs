use crate::error::{NucleusError, Result};
use crate::model::BinaryMask;
use image::GrayImage;
use imageproc::stats::histogram;

/// Global Triangle threshold with dark-background polarity
///
/// Returns the mask of pixels brighter than the selected level together with
/// the level itself. A histogram with fewer than two occupied bins has no
/// meaningful split and gives an all-background mask.
pub fn apply(image: &GrayImage) -> Result<(BinaryMask, Option<u8>)> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(NucleusError::Threshold(format!(
            "empty image ({}x{})",
            width, height
        )));
    }
    let level = triangle_level(&histogram(image).channels[0]);

    let mask = match level {
        Some(level) => BinaryMask::from_fn(width, height, |x, y| image.get_pixel(x, y)[0] > level),
        None => BinaryMask::new(width, height),
    };

    Ok((mask, level))
}

/// Triangle (Zack) threshold selection
///
/// Draws a line from the histogram peak to the far end of the longer tail
/// and picks the bin with the greatest distance below that line. Bins above
/// the returned level are foreground.
pub fn triangle_level(hist: &[u32; 256]) -> Option<u8> {
    let occupied = hist.iter().filter(|&&c| c > 0).count();
    if occupied < 2 {
        return None;
    }

    let last = hist.len() - 1;

    // One empty bin beyond each end of the occupied range, so the line
    // reaches zero frequency.
    let mut min = hist.iter().position(|&c| c > 0).unwrap_or(0);
    if min > 0 {
        min -= 1;
    }
    let mut min2 = hist.iter().rposition(|&c| c > 0).unwrap_or(last);
    if min2 < last {
        min2 += 1;
    }
    let mut max = 0;
    for (i, &count) in hist.iter().enumerate() {
        if count > hist[max] {
            max = i;
        }
    }

    let mut data: Vec<f64> = hist.iter().map(|&c| f64::from(c)).collect();

    let inverted = max - min < min2 - max;
    if inverted {
        data.reverse();
        min = last - min2;
        max = last - max;
    }

    if min == max {
        return Some(resolve(min, inverted, last));
    }

    // Line through (min, data[min]) and (max, data[max]) as nx*x + ny*y = d
    let mut nx = data[max];
    let mut ny = min as f64 - max as f64;
    let norm = (nx * nx + ny * ny).sqrt();
    nx /= norm;
    ny /= norm;
    let d = nx * min as f64 + ny * data[min];

    let mut split = min;
    let mut split_distance = 0.0;
    for (i, &count) in data.iter().enumerate().take(max + 1).skip(min + 1) {
        let distance = nx * i as f64 + ny * count - d;
        if distance > split_distance {
            split = i;
            split_distance = distance;
        }
    }
    let split = split.saturating_sub(1);

    Some(resolve(split, inverted, last))
}

fn resolve(split: usize, inverted: bool, last: usize) -> u8 {
    let level = if inverted { last - split } else { split };
    level.min(last) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_threshold_binarizes_image() {
        let img = GrayImage::from_fn(50, 50, |x, _| Luma([(x as u8 * 5).min(255)]));
        let (mask, level) = apply(&img).unwrap();

        assert!(level.is_some());
        for pixel in mask.as_gray().pixels() {
            assert!(
                pixel[0] == 0 || pixel[0] == 255,
                "Expected binary pixel, got {}",
                pixel[0]
            );
        }
    }

    #[test]
    fn test_bright_spot_on_dark_background_is_foreground() {
        // Large dark background with a small ramp of bright pixels
        let mut img = GrayImage::from_pixel(40, 40, Luma([10]));
        for x in 0..10 {
            for y in 0..4 {
                img.put_pixel(15 + x, 18 + y, Luma([100 + 15 * x as u8]));
            }
        }

        let (mask, level) = apply(&img).unwrap();
        let level = level.unwrap();

        assert!(level >= 10 && level < 100, "level {}", level);
        assert!(mask.is_foreground(20, 19));
        assert!(!mask.is_foreground(0, 0));
    }

    #[test]
    fn test_uniform_image_is_all_background() {
        let img = GrayImage::from_pixel(10, 10, Luma([128]));
        let (mask, level) = apply(&img).unwrap();
        assert_eq!(level, None);
        assert_eq!(mask.foreground_count(), 0);
    }

    #[test]
    fn test_empty_image_is_rejected() {
        let img = GrayImage::new(0, 4);
        assert!(matches!(apply(&img), Err(NucleusError::Threshold(_))));
    }

    #[test]
    fn test_level_from_image_matches_level_from_counts() {
        let img = GrayImage::from_fn(20, 20, |x, y| Luma([if x < 4 && y < 4 { 220 } else { 30 }]));
        let mut hist = [0u32; 256];
        hist[30] = 384;
        hist[220] = 16;

        let (mask, level) = apply(&img).unwrap();
        assert_eq!(level, triangle_level(&hist));
        assert_eq!(mask.foreground_count(), 16);
    }

    #[test]
    fn test_single_occupied_bin_has_no_level() {
        let mut hist = [0u32; 256];
        hist[0] = 1;
        assert_eq!(triangle_level(&hist), None);
        hist[255] = 1;
        assert!(triangle_level(&hist).is_some());
    }

    #[test]
    fn test_side_selection_follows_longer_tail() {
        // Peak near the top of the range with a long tail towards zero
        let mut hist = [0u32; 256];
        hist[240] = 1000;
        for (i, bin) in hist.iter_mut().enumerate().take(240).skip(20) {
            *bin = (i as u32) / 20;
        }
        let level = triangle_level(&hist).unwrap();
        assert!(level < 240, "level {}", level);
        assert!(level > 20, "level {}", level);
    }

    #[test]
    fn test_two_level_histogram_splits_between_levels() {
        let mut hist = [0u32; 256];
        hist[10] = 900;
        hist[200] = 100;
        let level = triangle_level(&hist).unwrap();
        assert!(level >= 10 && level < 200, "level {}", level);
    }
}
