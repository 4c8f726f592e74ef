//! Directory-wide processing with one results table per run.

use crate::config::BatchConfig;
use crate::detection::Pipeline;
use crate::error::{NucleusError, Result};
use crate::loader;
use crate::results::{self, ResultsTable};
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Counts reported at the end of a batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub processed: usize,
    pub failed: usize,
    pub nuclei: usize,
}

/// Non-hidden files of `dir` with the given extension, sorted by path
pub fn find_images(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let hidden = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.starts_with('.'))
            .unwrap_or(true);
        if hidden || !path.is_file() {
            continue;
        }
        if loader::has_extension(&path, extension) {
            images.push(path);
        }
    }
    images.sort();

    if images.is_empty() {
        return Err(NucleusError::InvalidInput(format!(
            "no .{} images found in {}",
            extension.trim_start_matches('.'),
            dir.display()
        )));
    }
    Ok(images)
}

/// Process every image of the input directory, one after another
///
/// Parameters are validated before anything is read or written. A failing
/// image is logged and counted, the run goes on with the next one.
pub fn run(config: &BatchConfig) -> Result<BatchSummary> {
    let start = Instant::now();
    let pipeline = Pipeline::new(config.params.clone(), config.calibration.clone())?;
    let images = find_images(&config.input_dir, &config.extension)?;

    fs::create_dir_all(&config.output_dir)?;
    let sigma = config.params.smoothing_sigma;
    let table_path = config.output_dir.join(results::results_file_name(sigma));
    let mut table = ResultsTable::create(&table_path)?;

    tracing::info!(
        images = images.len(),
        input = %config.input_dir.display(),
        output = %config.output_dir.display(),
        "Starting batch"
    );

    let mut summary = BatchSummary::default();
    for path in &images {
        match process_one(&pipeline, config, path, &mut table) {
            Ok(nuclei) => {
                summary.processed += 1;
                summary.nuclei += nuclei;
            }
            Err(e) => {
                tracing::error!(image = %path.display(), error = %e, "Failed to process image");
                summary.failed += 1;
            }
        }
    }

    tracing::info!(
        processed = summary.processed,
        failed = summary.failed,
        nuclei = summary.nuclei,
        elapsed_ms = start.elapsed().as_millis() as u64,
        results = %table_path.display(),
        "Batch finished"
    );
    Ok(summary)
}

fn process_one<W: Write>(
    pipeline: &Pipeline,
    config: &BatchConfig,
    path: &Path,
    table: &mut ResultsTable<W>,
) -> Result<usize> {
    let name = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| NucleusError::InvalidInput(format!("bad file name {}", path.display())))?;

    let image = loader::load_channel(path, config.channel)?;
    let result = pipeline.process(image, name)?;

    table.append(&result)?;
    let sigma = pipeline.params().smoothing_sigma;
    let overlay_path = config.output_dir.join(results::overlay_file_name(name, sigma));
    results::save_overlay(&result.overlay, &config.calibration, &overlay_path)?;
    let color_path = config.output_dir.join(results::color_overlay_file_name(name, sigma));
    results::save_color_overlay(&result.overlay, &color_path)?;

    Ok(result.nuclei.len())
}
