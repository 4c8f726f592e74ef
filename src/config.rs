use crate::model::{Calibration, ClosingOptions, PipelineParameters};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "nucleus-forms")]
#[command(about = "Lamin nucleus detection and shape descriptors for microscopy images")]
#[command(version)]
pub struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Process every matching image of a directory
    Batch(BatchArgs),
    /// Serve detection over HTTP
    Serve(ServeArgs),
}

/// Detection parameters shared by both modes
#[derive(clap::Args, Debug, Clone)]
pub struct PipelineArgs {
    /// LoG smoothing scale in pixels
    #[arg(long, env = "NUCLEI_SIGMA", default_value = "7")]
    pub sigma: f32,

    /// Smallest nucleus area in µm²
    #[arg(long, env = "NUCLEI_MIN_AREA", default_value = "50")]
    pub min_area: f64,

    /// Largest nucleus area in µm²
    #[arg(long, env = "NUCLEI_MAX_AREA", default_value = "inf")]
    pub max_area: f64,

    /// Dilations (then erosions) of the closing step
    #[arg(long, default_value = "4")]
    pub close_iterations: u8,

    /// Opposite neighbours needed to flip a pixel during closing
    #[arg(long, default_value = "1", value_parser = clap::value_parser!(u8).range(1..=8))]
    pub close_count: u8,

    /// Keep enclosed holes out of the nucleus area
    #[arg(long)]
    pub no_fill_holes: bool,
}

#[derive(clap::Args, Debug, Clone)]
pub struct BatchArgs {
    /// Directory holding the images
    pub dir: PathBuf,

    /// Extension of the files to process
    #[arg(long, default_value = "tif")]
    pub extension: String,

    /// Channel to analyse in colour images (0 = red, 1 = green, 2 = blue)
    #[arg(long)]
    pub channel: Option<usize>,

    /// Pixel width in µm
    #[arg(long, env = "NUCLEI_PIXEL_SIZE")]
    pub pixel_size: f64,

    /// Voxel depth in µm
    #[arg(long, default_value = "1")]
    pub pixel_depth: f64,

    /// Output directory (default: <DIR>/Results)
    #[arg(long)]
    pub output: Option<PathBuf>,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ServeArgs {
    /// Host address to bind to
    #[arg(long, env = "NUCLEI_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "NUCLEI_PORT", default_value = "9393")]
    pub port: u16,

    /// Maximum upload size in bytes (default: 50MB)
    #[arg(long, env = "NUCLEI_MAX_FILE_SIZE", default_value = "52428800")]
    pub max_file_size: usize,

    /// Pixel width in µm used when a request does not give one
    #[arg(long, env = "NUCLEI_PIXEL_SIZE")]
    pub pixel_size: Option<f64>,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

impl From<PipelineArgs> for PipelineParameters {
    fn from(args: PipelineArgs) -> Self {
        Self {
            smoothing_sigma: args.sigma,
            min_area_um2: args.min_area,
            max_area_um2: args.max_area,
            closing: ClosingOptions {
                iterations: args.close_iterations,
                count: args.close_count,
            },
            include_holes: !args.no_fill_holes,
        }
    }
}

/// Batch run configuration
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub input_dir: PathBuf,
    pub extension: String,
    pub channel: Option<usize>,
    pub output_dir: PathBuf,
    pub calibration: Calibration,
    pub params: PipelineParameters,
}

impl From<BatchArgs> for BatchConfig {
    fn from(args: BatchArgs) -> Self {
        let output_dir = args
            .output
            .unwrap_or_else(|| args.dir.join("Results"));
        Self {
            output_dir,
            extension: args.extension,
            channel: args.channel,
            calibration: Calibration::isotropic(args.pixel_size, args.pixel_depth),
            params: args.pipeline.into(),
            input_dir: args.dir,
        }
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_file_size: usize,
    pub calibration: Calibration,
    pub params: PipelineParameters,
}

impl From<ServeArgs> for ServerConfig {
    fn from(args: ServeArgs) -> Self {
        Self {
            host: args.host,
            port: args.port,
            max_file_size: args.max_file_size,
            calibration: args
                .pixel_size
                .map(|size| Calibration::isotropic(size, 1.0))
                .unwrap_or_default(),
            params: args.pipeline.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_defaults() {
        let args = Args::try_parse_from(["nucleus-forms", "batch", "/data/plate1", "--pixel-size", "0.16"])
            .unwrap();
        let Command::Batch(batch) = args.command else {
            panic!("expected batch command");
        };
        let config = BatchConfig::from(batch);

        assert_eq!(config.extension, "tif");
        assert_eq!(config.output_dir, PathBuf::from("/data/plate1/Results"));
        assert_eq!(config.calibration, Calibration::isotropic(0.16, 1.0));
        assert_eq!(config.params, PipelineParameters::default());
    }

    #[test]
    fn test_pipeline_flags() {
        let args = Args::try_parse_from([
            "nucleus-forms",
            "batch",
            "in",
            "--pixel-size",
            "0.5",
            "--sigma",
            "3.5",
            "--min-area",
            "20",
            "--max-area",
            "400",
            "--close-count",
            "3",
            "--no-fill-holes",
            "--output",
            "out",
        ])
        .unwrap();
        let Command::Batch(batch) = args.command else {
            panic!("expected batch command");
        };
        let config = BatchConfig::from(batch);

        assert_eq!(config.output_dir, PathBuf::from("out"));
        assert_eq!(config.params.smoothing_sigma, 3.5);
        assert_eq!(config.params.min_area_um2, 20.0);
        assert_eq!(config.params.max_area_um2, 400.0);
        assert_eq!(config.params.closing.count, 3);
        assert!(!config.params.include_holes);
    }

    #[test]
    fn test_close_count_out_of_range_is_rejected() {
        let result = Args::try_parse_from([
            "nucleus-forms",
            "serve",
            "--close-count",
            "9",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_serve_without_pixel_size_uses_unit_calibration() {
        let args = Args::try_parse_from(["nucleus-forms", "serve", "--port", "8080"]).unwrap();
        let Command::Serve(serve) = args.command else {
            panic!("expected serve command");
        };
        let config = ServerConfig::from(serve);
        assert_eq!(config.port, 8080);
        assert_eq!(config.calibration, Calibration::default());
    }
}
