//! Shape descriptors of a single region.
//!
//! Everything here works in pixel units; callers apply the calibration.

use imageproc::geometry::{contour_area, convex_hull};
use imageproc::point::Point;
use std::f64::consts::PI;

/// Running first and second order moments of a pixel set
#[derive(Debug, Clone, Copy, Default)]
pub struct Moments {
    count: f64,
    sum_x: f64,
    sum_y: f64,
    sum_xx: f64,
    sum_yy: f64,
    sum_xy: f64,
}

/// Best-fit ellipse axes, full lengths in pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ellipse {
    pub major: f64,
    pub minor: f64,
}

impl Moments {
    pub fn add(&mut self, x: f64, y: f64) {
        self.count += 1.0;
        self.sum_x += x;
        self.sum_y += y;
        self.sum_xx += x * x;
        self.sum_yy += y * y;
        self.sum_xy += x * y;
    }

    pub fn count(&self) -> f64 {
        self.count
    }

    pub fn centroid(&self) -> (f64, f64) {
        (self.sum_x / self.count, self.sum_y / self.count)
    }

    /// Ellipse with the same second moments, rescaled to the region area
    pub fn ellipse(&self) -> Ellipse {
        let (mx, my) = self.centroid();
        // Each pixel is a unit square, which adds 1/12 to both variances
        let xx = self.sum_xx / self.count - mx * mx + 1.0 / 12.0;
        let yy = self.sum_yy / self.count - my * my + 1.0 / 12.0;
        let xy = self.sum_xy / self.count - mx * my;

        let half_trace = (xx + yy) / 2.0;
        let spread = (((xx - yy) / 2.0).powi(2) + xy * xy).sqrt();
        let major_var = half_trace + spread;
        let minor_var = (half_trace - spread).max(f64::MIN_POSITIVE);

        let major = 4.0 * major_var.sqrt();
        let minor = 4.0 * minor_var.sqrt();
        let scale = (self.count / (PI * major * minor / 4.0)).sqrt();

        Ellipse {
            major: major * scale,
            minor: minor * scale,
        }
    }
}

/// Boundary length of a closed 8-connected border
///
/// Vossepoel-Smeulders weighting of the chain code: even steps count 0.980,
/// odd (diagonal) steps 1.406 and every change of direction -0.091.
pub fn chain_perimeter(border: &[Point<i32>]) -> f64 {
    if border.len() < 2 {
        return 0.0;
    }

    let codes: Vec<(i32, i32)> = border
        .iter()
        .zip(border.iter().cycle().skip(1))
        .map(|(a, b)| (b.x - a.x, b.y - a.y))
        .collect();

    let mut even = 0usize;
    let mut odd = 0usize;
    for &(dx, dy) in &codes {
        if dx != 0 && dy != 0 {
            odd += 1;
        } else {
            even += 1;
        }
    }
    let corners = codes
        .iter()
        .zip(codes.iter().cycle().skip(codes.len() - 1))
        .filter(|(current, previous)| current != previous)
        .count();

    0.980 * even as f64 + 1.406 * odd as f64 - 0.091 * corners as f64
}

/// `4π·area / perimeter²`, clamped to [0, 1]
///
/// Pixelation pushes small regions slightly above 1; a zero perimeter only
/// happens for single pixels, which count as perfectly round.
pub fn circularity(area: f64, perimeter: f64) -> f64 {
    if perimeter <= 0.0 {
        return 1.0;
    }
    (4.0 * PI * area / (perimeter * perimeter)).clamp(0.0, 1.0)
}

/// Area of the convex hull around the pixel squares of a border
pub fn convex_hull_area(border: &[Point<i32>]) -> f64 {
    let mut corners: Vec<Point<i32>> = border
        .iter()
        .flat_map(|p| {
            [
                Point::new(p.x, p.y),
                Point::new(p.x + 1, p.y),
                Point::new(p.x, p.y + 1),
                Point::new(p.x + 1, p.y + 1),
            ]
        })
        .collect();
    // Neighbouring pixels share corners; duplicates confuse the angular sort
    corners.sort_by_key(|p| (p.y, p.x));
    corners.dedup();
    let hull = convex_hull(corners);
    contour_area(&hull)
}
