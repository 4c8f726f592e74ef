use crate::error::{NucleusError, Result};
use crate::model::{BinaryMask, ClosingOptions};
use imageproc::distance_transform::Norm;
use imageproc::morphology::close;

const NEIGHBOURS: [(i64, i64); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// Morphological closing over the 3x3 neighbourhood
///
/// Runs `iterations` dilations then `iterations` erosions. With `count == 1`
/// this is plain binary closing and is delegated to imageproc; larger counts
/// only flip a pixel when at least `count` of its in-image neighbours
/// disagree with it. Pixels outside the image are ignored, so the image
/// border never erodes the mask.
pub fn apply(mask: BinaryMask, options: ClosingOptions) -> Result<BinaryMask> {
    if !(1..=8).contains(&options.count) {
        return Err(NucleusError::Morphology(format!(
            "neighbour count must be between 1 and 8, got {}",
            options.count
        )));
    }
    if options.iterations == 0 {
        return Ok(mask);
    }

    if options.count == 1 {
        let closed = close(mask.as_gray(), Norm::LInf, options.iterations);
        return Ok(BinaryMask::from_gray(closed));
    }

    let mut current = mask;
    for _ in 0..options.iterations {
        current = pass(&current, true, options.count);
    }
    for _ in 0..options.iterations {
        current = pass(&current, false, options.count);
    }
    Ok(current)
}

/// One dilation (`grow`) or erosion pass with a neighbour-count rule
fn pass(mask: &BinaryMask, grow: bool, count: u8) -> BinaryMask {
    let (width, height) = mask.dimensions();
    BinaryMask::from_fn(width, height, |x, y| {
        let foreground = mask.is_foreground(x, y);
        // Dilation only considers background pixels and vice versa
        if foreground == grow {
            return foreground;
        }
        let opposite = NEIGHBOURS
            .iter()
            .filter(|(dx, dy)| {
                let nx = x as i64 + dx;
                let ny = y as i64 + dy;
                nx >= 0
                    && ny >= 0
                    && nx < width as i64
                    && ny < height as i64
                    && mask.is_foreground(nx as u32, ny as u32) != foreground
            })
            .count();
        if opposite >= count as usize {
            !foreground
        } else {
            foreground
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring_with_gap() -> BinaryMask {
        // Square outline with a one pixel gap in the top edge
        BinaryMask::from_fn(20, 20, |x, y| {
            let on_edge = (x == 5 || x == 14) && (5..=14).contains(&y)
                || (y == 5 || y == 14) && (5..=14).contains(&x);
            on_edge && !(x == 10 && y == 5)
        })
    }

    #[test]
    fn test_closing_bridges_small_gap() {
        let closed = apply(ring_with_gap(), ClosingOptions { iterations: 1, count: 1 }).unwrap();
        assert!(closed.is_foreground(10, 5));
        assert!(!closed.is_foreground(0, 0));
    }

    #[test]
    fn test_closing_keeps_isolated_blob_shape() {
        let blob = BinaryMask::from_fn(30, 30, |x, y| (10..20).contains(&x) && (10..20).contains(&y));
        let closed = apply(blob.clone(), ClosingOptions::default()).unwrap();
        assert_eq!(closed, blob);
    }

    #[test]
    fn test_neighbour_rule_matches_imageproc_for_count_one() {
        let mask = ring_with_gap();
        let expected = apply(mask.clone(), ClosingOptions { iterations: 2, count: 1 }).unwrap();

        let mut current = mask;
        for _ in 0..2 {
            current = pass(&current, true, 1);
        }
        for _ in 0..2 {
            current = pass(&current, false, 1);
        }
        assert_eq!(current, expected);
    }

    #[test]
    fn test_count_rule_fills_pinhole_without_growing_edges() {
        let block = BinaryMask::from_fn(20, 20, |x, y| {
            (5..15).contains(&x) && (5..15).contains(&y) && !(x == 9 && y == 9)
        });
        let closed = apply(block, ClosingOptions { iterations: 1, count: 4 }).unwrap();

        assert!(closed.is_foreground(9, 9));
        assert!(closed.is_foreground(9, 5));
        // A straight edge only offers three neighbours, below the count
        assert!(!closed.is_foreground(9, 4));
    }

    #[test]
    fn test_zero_iterations_is_identity() {
        let mask = ring_with_gap();
        let out = apply(mask.clone(), ClosingOptions { iterations: 0, count: 1 }).unwrap();
        assert_eq!(out, mask);
    }

    #[test]
    fn test_rejects_invalid_count() {
        let mask = ring_with_gap();
        let result = apply(mask, ClosingOptions { iterations: 1, count: 9 });
        assert!(matches!(result, Err(NucleusError::Morphology(_))));
    }
}
