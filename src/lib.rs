//! Detection of lamin-marked nuclei in 2D microscopy images and per-nucleus
//! shape descriptors (area, circularity, aspect ratio, roundness, solidity).

pub mod batch;
pub mod config;
pub mod detection;
pub mod error;
pub mod loader;
pub mod model;
pub mod results;
pub mod server;

pub use detection::{process_image, NucleiResult, Pipeline};
pub use error::{NucleusError, Result};
pub use model::{Calibration, NucleusDescriptor, PipelineParameters};
