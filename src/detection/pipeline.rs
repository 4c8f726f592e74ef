use crate::error::{NucleusError, Result};
use crate::model::{Calibration, IntensityImage, LabeledOverlay, NucleusDescriptor, PipelineParameters};
use serde::Serialize;
use std::time::Instant;

use super::steps::{self, segment::AreaRange};

/// Timing information for a single detection stage
#[derive(Debug, Clone, Serialize)]
pub struct StepTiming {
    pub name: String,
    pub time_ms: u64,
}

/// Everything produced for one image
#[derive(Debug, Clone, Serialize)]
pub struct NucleiResult {
    pub image_name: String,
    /// Level picked by the Triangle method, absent on a flat image
    pub threshold: Option<u8>,
    pub nuclei: Vec<NucleusDescriptor>,
    /// Label image of the accepted nuclei (not serialized)
    #[serde(skip)]
    pub overlay: LabeledOverlay,
    /// Total processing time in milliseconds
    pub total_time_ms: u64,
    pub steps: Vec<StepTiming>,
}

/// Detection pipeline bound to one calibration and parameter set
#[derive(Debug, Clone)]
pub struct Pipeline {
    params: PipelineParameters,
    calibration: Calibration,
    area_range: AreaRange,
}

impl Pipeline {
    /// Validates both inputs once, so a bad configuration fails before any
    /// image is touched
    pub fn new(params: PipelineParameters, calibration: Calibration) -> Result<Self> {
        params.validate()?;
        calibration.validate()?;
        let area_range =
            AreaRange::from_calibrated(params.min_area_um2, params.max_area_um2, &calibration);
        Ok(Self {
            params,
            calibration,
            area_range,
        })
    }

    pub fn params(&self) -> &PipelineParameters {
        &self.params
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    /// Run filter, binarization and segmentation on one image
    pub fn process(&self, image: IntensityImage, name: &str) -> Result<NucleiResult> {
        let start = Instant::now();
        let mut steps_timing = Vec::new();

        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(NucleusError::InvalidInput(format!(
                "{} has zero dimension ({}x{})",
                name, width, height
            )));
        }

        let sigma = self.params.smoothing_sigma;
        // The raw image is dropped once filtered
        let filtered = self.run_step("log_filter", image, &mut steps_timing, |img| {
            steps::log_filter::apply(&img, sigma)
        })?;

        let closing = self.params.closing;
        let (mask, threshold) = self.run_step("binarize", filtered, &mut steps_timing, |img| {
            steps::binarize(&img, closing)
        })?;

        let segmentation = self.run_step("segment", mask, &mut steps_timing, |mask| {
            steps::segment::apply(
                &mask,
                &self.calibration,
                self.area_range,
                self.params.include_holes,
            )
        })?;

        let total_time_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            image = name,
            ?threshold,
            nuclei = segmentation.descriptors.len(),
            rejected = segmentation.rejected,
            total_time_ms,
            "Processed image"
        );

        Ok(NucleiResult {
            image_name: name.to_string(),
            threshold,
            nuclei: segmentation.descriptors,
            overlay: segmentation.overlay,
            total_time_ms,
            steps: steps_timing,
        })
    }

    fn run_step<T, U, F>(
        &self,
        name: &str,
        input: T,
        timings: &mut Vec<StepTiming>,
        step_fn: F,
    ) -> Result<U>
    where
        F: FnOnce(T) -> Result<U>,
    {
        let step_start = Instant::now();
        let result = step_fn(input)?;
        let time_ms = step_start.elapsed().as_millis() as u64;
        tracing::debug!(step = name, time_ms, "Step finished");
        timings.push(StepTiming {
            name: name.to_string(),
            time_ms,
        });
        Ok(result)
    }
}

/// One-shot convenience over [`Pipeline`]
pub fn process_image(
    image: IntensityImage,
    name: &str,
    calibration: &Calibration,
    params: &PipelineParameters,
) -> Result<NucleiResult> {
    Pipeline::new(params.clone(), calibration.clone())?.process(image, name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn disk_image(size: u32, centres: &[(f32, f32)], radius: f32) -> IntensityImage {
        IntensityImage::from_fn(size, size, |x, y| {
            let inside = centres.iter().any(|&(cx, cy)| {
                ((x as f32 - cx).powi(2) + (y as f32 - cy).powi(2)).sqrt() <= radius
            });
            Luma([if inside { 200.0 / 255.0 } else { 20.0 / 255.0 }])
        })
    }

    fn permissive() -> PipelineParameters {
        PipelineParameters {
            min_area_um2: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_single_disk_is_one_round_nucleus() {
        let image = disk_image(128, &[(64.0, 64.0)], 10.0);
        let result = process_image(image, "disk", &Calibration::default(), &permissive()).unwrap();

        assert_eq!(result.nuclei.len(), 1);
        let nucleus = &result.nuclei[0];
        assert_eq!(nucleus.id, 1);
        assert!((nucleus.circularity - 1.0).abs() <= 0.05, "circularity {}", nucleus.circularity);
        assert!((nucleus.aspect_ratio - 1.0).abs() <= 0.1, "aspect ratio {}", nucleus.aspect_ratio);
        assert!(result.threshold.is_some());
        assert_eq!(result.overlay.id_at(64, 64), 1);
        assert_eq!(result.overlay.id_at(0, 0), 0);
    }

    #[test]
    fn test_repeated_runs_are_identical() {
        let pipeline = Pipeline::new(permissive(), Calibration::isotropic(0.5, 1.0)).unwrap();
        let image = disk_image(160, &[(40.0, 40.0), (115.0, 110.0)], 9.0);

        let first = pipeline.process(image.clone(), "a").unwrap();
        let second = pipeline.process(image, "a").unwrap();

        assert_eq!(first.nuclei, second.nuclei);
        assert_eq!(first.overlay, second.overlay);
        assert_eq!(first.threshold, second.threshold);
    }

    #[test]
    fn test_records_every_step() {
        let image = disk_image(64, &[(32.0, 32.0)], 8.0);
        let result = process_image(image, "steps", &Calibration::default(), &permissive()).unwrap();
        let names: Vec<&str> = result.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["log_filter", "binarize", "segment"]);
        assert_eq!(result.image_name, "steps");
    }

    #[test]
    fn test_min_area_can_reject_everything() {
        let image = disk_image(128, &[(64.0, 64.0)], 10.0);
        let params = PipelineParameters {
            min_area_um2: 10_000.0,
            ..Default::default()
        };
        let result = process_image(image, "small", &Calibration::default(), &params).unwrap();
        assert!(result.nuclei.is_empty());
        assert!(result.overlay.is_background());
    }

    #[test]
    fn test_uniform_image_has_no_nuclei() {
        let image = IntensityImage::from_pixel(50, 40, Luma([0.3]));
        let result = process_image(image, "flat", &Calibration::default(), &permissive()).unwrap();
        assert!(result.nuclei.is_empty());
        assert_eq!(result.threshold, None);
        assert_eq!(result.overlay.dimensions(), (50, 40));
    }

    #[test]
    fn test_single_pixel_image_has_no_nuclei() {
        let image = IntensityImage::from_pixel(1, 1, Luma([0.8]));
        let result = process_image(image, "dot", &Calibration::default(), &permissive()).unwrap();
        assert!(result.nuclei.is_empty());
        assert_eq!(result.threshold, None);
        assert_eq!(result.overlay.dimensions(), (1, 1));
        assert_eq!(result.steps.len(), 3);
    }

    #[test]
    fn test_one_pixel_wide_images_are_processed() {
        let row = IntensityImage::from_fn(40, 1, |x, _| Luma([if (15..25).contains(&x) { 0.9 } else { 0.1 }]));
        let result = process_image(row, "row", &Calibration::default(), &permissive()).unwrap();
        assert_eq!(result.overlay.dimensions(), (40, 1));
        for nucleus in &result.nuclei {
            assert!(nucleus.area_pixels >= 1.0);
        }

        let column = IntensityImage::from_pixel(1, 30, Luma([0.4]));
        let result = process_image(column, "column", &Calibration::default(), &permissive()).unwrap();
        assert!(result.nuclei.is_empty());
    }

    #[test]
    fn test_empty_image_is_rejected() {
        let image = IntensityImage::new(0, 0);
        let result = process_image(image, "empty", &Calibration::default(), &permissive());
        assert!(matches!(result, Err(NucleusError::InvalidInput(_))));
    }

    #[test]
    fn test_invalid_configuration_fails_at_construction() {
        let params = PipelineParameters {
            smoothing_sigma: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            Pipeline::new(params, Calibration::default()),
            Err(NucleusError::InvalidParameters(_))
        ));
        assert!(matches!(
            Pipeline::new(PipelineParameters::default(), Calibration::isotropic(-1.0, 1.0)),
            Err(NucleusError::InvalidInput(_))
        ));
    }
}
