//! Nucleus detection and shape quantification
//!
//! LoG enhancement, Triangle thresholding with closing, then particle
//! analysis with calibrated size filtering.

pub mod pipeline;
pub mod shape;
pub mod steps;

pub use pipeline::{process_image, NucleiResult, Pipeline, StepTiming};
pub use steps::segment::AreaRange;
