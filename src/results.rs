//! Persisting measurements and overlays.

use crate::detection::NucleiResult;
use crate::error::{NucleusError, Result};
use crate::model::{Calibration, LabeledOverlay};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tiff::encoder::{colortype, Rational, TiffEncoder};
use tiff::tags::ResolutionUnit;

/// Microns per centimetre, for the TIFF resolution tags
const MICRONS_PER_CM: f64 = 10_000.0;

pub const HEADER: [&str; 7] = [
    "Image name",
    "Nucleus ID",
    "Nucleus surface (µm2)",
    "Nucleus circularity",
    "Nucleus aspect ratio",
    "Nucleus roundness",
    "Nucleus solidity",
];

/// Tab-separated results table, one row per nucleus
pub struct ResultsTable<W: Write> {
    writer: W,
    rows: usize,
}

impl ResultsTable<BufWriter<File>> {
    /// Create (or truncate) the table file and write the header
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        Self::new(BufWriter::new(file))
    }
}

impl<W: Write> ResultsTable<W> {
    pub fn new(mut writer: W) -> Result<Self> {
        writeln!(writer, "{}", HEADER.join("\t"))?;
        writer.flush()?;
        Ok(Self { writer, rows: 0 })
    }

    /// Append the rows of one image and flush them
    pub fn append(&mut self, result: &NucleiResult) -> Result<usize> {
        for nucleus in &result.nuclei {
            writeln!(
                self.writer,
                "{}\t{}\t{}\t{}\t{}\t{}\t{}",
                result.image_name,
                nucleus.id,
                nucleus.area_calibrated,
                nucleus.circularity,
                nucleus.aspect_ratio,
                nucleus.roundness,
                nucleus.solidity
            )?;
        }
        self.writer.flush()?;
        self.rows += result.nuclei.len();
        Ok(result.nuclei.len())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

pub fn results_file_name(sigma: f32) -> String {
    format!("results_sigma-{}.tsv", sigma)
}

pub fn overlay_file_name(image_name: &str, sigma: f32) -> String {
    format!("{}_nuclei_sigma-{}.tif", image_name, sigma)
}

pub fn color_overlay_file_name(image_name: &str, sigma: f32) -> String {
    format!("{}_nuclei_sigma-{}_color.png", image_name, sigma)
}

/// Write an overlay as a 16-bit label TIFF
///
/// Each pixel holds its nucleus id, 0 for background. The pixel size goes
/// into the resolution tags as pixels per centimetre.
pub fn save_overlay(overlay: &LabeledOverlay, calibration: &Calibration, path: &Path) -> Result<()> {
    let (width, height) = overlay.dimensions();
    let ids = overlay
        .labels()
        .iter()
        .map(|&id| u16::try_from(id))
        .collect::<std::result::Result<Vec<u16>, _>>()
        .map_err(|_| {
            NucleusError::Internal(format!(
                "{}: more nuclei than a 16-bit label image holds",
                path.display()
            ))
        })?;

    let mut file = File::create(path)?;
    let mut encoder = TiffEncoder::new(&mut file)?;
    let mut image = encoder.new_image::<colortype::Gray16>(width, height)?;
    match pixels_per_cm(calibration) {
        Some(density) => image.resolution(ResolutionUnit::Centimeter, density),
        None => tracing::warn!(
            path = %path.display(),
            pixel_size = calibration.pixel_width,
            "Pixel size cannot be stored in the TIFF resolution tags"
        ),
    }
    image.write_data(&ids)?;
    Ok(())
}

/// Colour rendering of an overlay; the format follows the extension
pub fn save_color_overlay(overlay: &LabeledOverlay, path: &Path) -> Result<()> {
    overlay.render().save(path)?;
    Ok(())
}

/// Pixel density for a pixel size in microns, as a TIFF rational
fn pixels_per_cm(calibration: &Calibration) -> Option<Rational> {
    let density = MICRONS_PER_CM / calibration.pixel_width;
    if !density.is_finite() || density <= 0.0 {
        return None;
    }
    // Keep three decimals where the numerator allows it
    [1000u32, 1].into_iter().find_map(|d| {
        let n = (density * f64::from(d)).round();
        (1.0..=f64::from(u32::MAX)).contains(&n).then(|| Rational { n: n as u32, d })
    })
}
