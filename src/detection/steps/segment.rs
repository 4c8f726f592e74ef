use crate::detection::shape::{self, Moments};
use crate::error::{NucleusError, Result};
use crate::model::{BinaryMask, Calibration, LabelImage, LabeledOverlay, NucleusDescriptor};
use image::{imageops, GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};
use imageproc::point::Point;
use imageproc::region_labelling::{connected_components, Connectivity};
use std::f64::consts::PI;

/// Accepted region size, in pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AreaRange {
    pub min_pixels: f64,
    pub max_pixels: f64,
}

impl AreaRange {
    /// Convert bounds in square calibration units to pixel areas
    pub fn from_calibrated(min_area: f64, max_area: f64, calibration: &Calibration) -> Self {
        let pixel_area = calibration.pixel_area();
        Self {
            min_pixels: min_area / pixel_area,
            max_pixels: max_area / pixel_area,
        }
    }

    pub fn contains(&self, pixels: f64) -> bool {
        self.min_pixels <= pixels && pixels <= self.max_pixels
    }
}

/// Outcome of particle analysis on one mask
#[derive(Debug, Clone)]
pub struct Segmentation {
    /// Ordered by ascending id
    pub descriptors: Vec<NucleusDescriptor>,
    pub overlay: LabeledOverlay,
    /// Regions found but outside the area range
    pub rejected: usize,
}

#[derive(Debug, Clone, Copy)]
struct RegionBounds {
    pixel_count: usize,
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
}

/// Extract 8-connected particles, filter them by area and measure their shape
///
/// Region ids follow raster discovery order among accepted regions. With
/// `include_holes`, enclosed background is counted as part of the region.
pub fn apply(
    mask: &BinaryMask,
    calibration: &Calibration,
    area: AreaRange,
    include_holes: bool,
) -> Result<Segmentation> {
    let (width, height) = mask.dimensions();
    if width == 0 || height == 0 {
        return Err(NucleusError::Segmentation(format!(
            "empty mask ({}x{})",
            width, height
        )));
    }

    let filled;
    let mask = if include_holes {
        filled = fill_holes(mask);
        &filled
    } else {
        mask
    };

    let labels = label_foreground(mask);
    let regions = region_bounds(&labels);

    let mut remap = vec![0u32; regions.len() + 1];
    let mut descriptors = Vec::new();
    let mut rejected = 0;

    for (index, region) in regions.iter().enumerate() {
        let label = index as u32 + 1;
        if !area.contains(region.pixel_count as f64) {
            rejected += 1;
            continue;
        }
        let id = descriptors.len() as u32 + 1;
        remap[label as usize] = id;
        descriptors.push(measure(&labels, label, region, id, calibration)?);
    }

    tracing::debug!(
        regions = regions.len(),
        accepted = descriptors.len(),
        rejected,
        "Analyzed particles"
    );

    let overlay = LabeledOverlay::new(LabelImage::from_fn(width, height, |x, y| {
        Luma([remap[labels.get_pixel(x, y)[0] as usize]])
    }));

    Ok(Segmentation {
        descriptors,
        overlay,
        rejected,
    })
}

/// Turn background pockets that cannot reach the image border into foreground
///
/// Background is followed with 4-connectivity, the complement of the
/// 8-connected foreground.
pub fn fill_holes(mask: &BinaryMask) -> BinaryMask {
    let (width, height) = mask.dimensions();
    let background = connected_components(
        &framed(mask),
        Connectivity::Four,
        Luma([BinaryMask::FOREGROUND]),
    );
    // Everything touching the border joins the frame's component
    let outside = background.get_pixel(0, 0)[0];

    BinaryMask::from_fn(width, height, |x, y| {
        background.get_pixel(x + 1, y + 1)[0] != outside
    })
}

/// 8-connected foreground labels, consecutive from 1 in raster order
fn label_foreground(mask: &BinaryMask) -> LabelImage {
    let (width, height) = mask.dimensions();
    let labels = connected_components(&framed(mask), Connectivity::Eight, Luma([0u8]));
    LabelImage::from_fn(width, height, |x, y| *labels.get_pixel(x + 1, y + 1))
}

/// Copy of the mask inside a one pixel background frame
///
/// `connected_components` panics when every pixel of an image gets its own
/// label, which a 1x1 image always does. The frame also leaves raster
/// order of the inner pixels unchanged.
fn framed(mask: &BinaryMask) -> GrayImage {
    let (width, height) = mask.dimensions();
    let mut framed = GrayImage::new(width + 2, height + 2);
    imageops::replace(&mut framed, mask.as_gray(), 1, 1);
    framed
}

fn region_bounds(labels: &LabelImage) -> Vec<RegionBounds> {
    let mut regions: Vec<RegionBounds> = Vec::new();
    for (x, y, pixel) in labels.enumerate_pixels() {
        let label = pixel[0] as usize;
        if label == 0 {
            continue;
        }
        // Labels are consecutive from 1 in raster order
        if label > regions.len() {
            regions.push(RegionBounds {
                pixel_count: 0,
                min_x: x,
                min_y: y,
                max_x: x,
                max_y: y,
            });
        }
        let region = &mut regions[label - 1];
        region.pixel_count += 1;
        region.min_x = region.min_x.min(x);
        region.min_y = region.min_y.min(y);
        region.max_x = region.max_x.max(x);
        region.max_y = region.max_y.max(y);
    }
    regions
}

fn measure(
    labels: &LabelImage,
    label: u32,
    bounds: &RegionBounds,
    id: u32,
    calibration: &Calibration,
) -> Result<NucleusDescriptor> {
    let patch_width = bounds.max_x - bounds.min_x + 3;
    let patch_height = bounds.max_y - bounds.min_y + 3;

    // One pixel of padding keeps the border tracer inside the patch
    let mut patch = GrayImage::new(patch_width, patch_height);
    let mut moments = Moments::default();
    for y in bounds.min_y..=bounds.max_y {
        for x in bounds.min_x..=bounds.max_x {
            if labels.get_pixel(x, y)[0] == label {
                patch.put_pixel(x - bounds.min_x + 1, y - bounds.min_y + 1, Luma([255]));
                moments.add(x as f64, y as f64);
            }
        }
    }

    let border: Vec<Point<i32>> = find_contours::<i32>(&patch)
        .into_iter()
        .find(|contour| contour.border_type == BorderType::Outer)
        .map(|contour| contour.points)
        .ok_or_else(|| {
            NucleusError::Segmentation(format!("region {} has no outer border", label))
        })?;

    let area = moments.count();
    let perimeter = shape::chain_perimeter(&border);
    let ellipse = moments.ellipse();
    let hull_area = shape::convex_hull_area(&border);
    let pixel_size = calibration.pixel_width;

    Ok(NucleusDescriptor {
        id,
        area_pixels: area,
        area_calibrated: area * calibration.pixel_area(),
        circularity: shape::circularity(area, perimeter),
        aspect_ratio: (ellipse.major / ellipse.minor).max(1.0),
        roundness: (4.0 * area / (PI * ellipse.major * ellipse.major)).clamp(0.0, 1.0),
        solidity: area / hull_area,
        perimeter: perimeter * pixel_size,
        major_axis: ellipse.major * pixel_size,
        minor_axis: ellipse.minor * pixel_size,
        centroid: moments.centroid(),
    })
}
