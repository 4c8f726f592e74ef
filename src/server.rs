use crate::config::ServerConfig;
use crate::detection::{Pipeline, StepTiming};
use crate::error::NucleusError;
use crate::loader;
use crate::model::{Calibration, NucleusDescriptor, PipelineParameters};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, State},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;

/// Room for the multipart framing and text fields around the file itself
const FORM_OVERHEAD: usize = 64 * 1024;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
}

/// Detection response
#[derive(Serialize)]
pub struct NucleiResponse {
    pub image_name: String,
    pub threshold: Option<u8>,
    pub calibration: Calibration,
    pub nuclei: Vec<NucleusDescriptor>,
    pub steps: Vec<StepTiming>,
    pub processing_time_ms: u64,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Server info response
#[derive(Serialize)]
pub struct InfoResponse {
    pub version: String,
    pub supported_formats: Vec<String>,
    pub default_parameters: PipelineParameters,
    pub default_calibration: Calibration,
    pub max_file_size_bytes: usize,
}

/// Build the router; split out so tests can drive it without a socket
pub fn app(config: ServerConfig) -> Router {
    let max_file_size = config.max_file_size;
    let state = AppState {
        config: Arc::new(config),
    };

    Router::new()
        .route("/nuclei", post(handle_nuclei))
        .route("/health", get(handle_health))
        .route("/info", get(handle_info))
        .layer(DefaultBodyLimit::max(max_file_size.saturating_add(FORM_OVERHEAD)))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP server
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    // Reject a bad default configuration at startup rather than per request
    Pipeline::new(config.params.clone(), config.calibration.clone())?;

    let addr = format!("{}:{}", config.host, config.port);
    let app = app(config);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Upload plus the per-request overrides
#[derive(Default)]
struct NucleiRequest {
    file_data: Option<Bytes>,
    file_name: Option<String>,
    content_type: Option<String>,
    name: Option<String>,
    sigma: Option<f32>,
    min_area: Option<f64>,
    max_area: Option<f64>,
    pixel_size: Option<f64>,
    channel: Option<usize>,
}

fn parse_field<T: FromStr>(field: &str, value: &str) -> Result<T, NucleusError> {
    value
        .trim()
        .parse()
        .map_err(|_| NucleusError::InvalidRequest(format!("Invalid {}: {:?}", field, value)))
}

async fn read_request(multipart: &mut Multipart) -> Result<NucleiRequest, NucleusError> {
    let mut request = NucleiRequest::default();

    // Parse multipart form
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| NucleusError::InvalidRequest(format!("Failed to parse multipart: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();

        if name == "file" {
            request.content_type = field.content_type().map(|s| s.to_string());
            request.file_name = field.file_name().map(|s| s.to_string());
            request.file_data = Some(field.bytes().await.map_err(|e| {
                NucleusError::InvalidRequest(format!("Failed to read file data: {}", e))
            })?);
            continue;
        }

        let text = field.text().await.map_err(|e| {
            NucleusError::InvalidRequest(format!("Invalid field {}: {}", name, e))
        })?;
        match name.as_str() {
            "name" => request.name = Some(text),
            "sigma" => request.sigma = Some(parse_field(&name, &text)?),
            "min_area" => request.min_area = Some(parse_field(&name, &text)?),
            "max_area" => request.max_area = Some(parse_field(&name, &text)?),
            "pixel_size" => request.pixel_size = Some(parse_field(&name, &text)?),
            "channel" => request.channel = Some(parse_field(&name, &text)?),
            _ => {
                // Ignore unknown fields
            }
        }
    }

    Ok(request)
}

/// Temp file suffix: the upload's own extension, else one from the mime type
fn upload_extension(file_name: Option<&str>, mime: Option<&str>) -> String {
    if let Some(ext) = file_name
        .and_then(|n| Path::new(n).extension())
        .and_then(|e| e.to_str())
    {
        return format!(".{}", ext.to_lowercase());
    }
    match mime.unwrap_or_default() {
        "image/png" => ".png",
        "image/jpeg" => ".jpg",
        "image/bmp" => ".bmp",
        "image/tiff" => ".tif",
        _ => ".tmp",
    }
    .to_string()
}

/// Handle detection requests
async fn handle_nuclei(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<NucleiResponse>, NucleusError> {
    let start = Instant::now();
    let request = read_request(&mut multipart).await?;

    // Validate file was provided
    let data = request.file_data.ok_or(NucleusError::MissingFile)?;

    // Check file size
    if data.len() > state.config.max_file_size {
        return Err(NucleusError::ImageTooLarge {
            size: data.len(),
            max: state.config.max_file_size,
        });
    }

    let defaults = &state.config.params;
    let params = PipelineParameters {
        smoothing_sigma: request.sigma.unwrap_or(defaults.smoothing_sigma),
        min_area_um2: request.min_area.unwrap_or(defaults.min_area_um2),
        max_area_um2: request.max_area.unwrap_or(defaults.max_area_um2),
        ..defaults.clone()
    };
    let calibration = match request.pixel_size {
        Some(size) => Calibration::isotropic(size, state.config.calibration.pixel_depth),
        None => state.config.calibration.clone(),
    };
    let pipeline = Pipeline::new(params, calibration)?;

    let image_name = request
        .name
        .clone()
        .or_else(|| {
            request
                .file_name
                .as_deref()
                .and_then(|n| Path::new(n).file_stem())
                .and_then(|s| s.to_str())
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| "upload".to_string());

    let extension = upload_extension(request.file_name.as_deref(), request.content_type.as_deref());

    // Write to temp file with proper extension
    let mut temp_file = tempfile::Builder::new().suffix(&extension).tempfile()?;
    temp_file.write_all(&data)?;

    let channel = request.channel;
    let name = image_name.clone();
    // Detection is CPU bound; run it off the async workers
    let result = tokio::task::spawn_blocking(move || {
        let image = loader::load_channel(temp_file.path(), channel)?;
        pipeline
            .process(image, &name)
            .map(|result| (result, pipeline.calibration().clone()))
    })
    .await
    .map_err(|e| NucleusError::Internal(format!("Detection task failed: {}", e)))?;
    let (result, calibration) = result?;

    let processing_time_ms = start.elapsed().as_millis() as u64;

    tracing::info!(
        "Detection completed in {}ms, image: {}, nuclei: {}",
        processing_time_ms,
        image_name,
        result.nuclei.len()
    );

    Ok(Json(NucleiResponse {
        image_name: result.image_name,
        threshold: result.threshold,
        calibration,
        nuclei: result.nuclei,
        steps: result.steps,
        processing_time_ms,
    }))
}

/// Handle health check requests
async fn handle_health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Handle info requests
async fn handle_info(State(state): State<AppState>) -> impl IntoResponse {
    Json(InfoResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        supported_formats: loader::SUPPORTED_EXTENSIONS
            .iter()
            .map(|s| s.to_string())
            .collect(),
        default_parameters: state.config.params.clone(),
        default_calibration: state.config.calibration.clone(),
        max_file_size_bytes: state.config.max_file_size,
    })
}
