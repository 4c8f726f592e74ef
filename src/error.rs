use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NucleusError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    #[error("Filter stage failed: {0}")]
    Filter(String),

    #[error("Threshold stage failed: {0}")]
    Threshold(String),

    #[error("Morphology stage failed: {0}")]
    Morphology(String),

    #[error("Segmentation stage failed: {0}")]
    Segmentation(String),

    #[error("Image too large: {size} bytes (max: {max} bytes)")]
    ImageTooLarge { size: usize, max: usize },

    #[error("Missing file in request")]
    MissingFile,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode TIFF: {0}")]
    TiffEncode(#[from] tiff::TiffError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, NucleusError>;

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for NucleusError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            NucleusError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "INVALID_INPUT"),
            NucleusError::InvalidParameters(_) => (StatusCode::BAD_REQUEST, "INVALID_PARAMETERS"),
            NucleusError::ImageDecode(_) => (StatusCode::BAD_REQUEST, "UNSUPPORTED_FORMAT"),
            NucleusError::Filter(_)
            | NucleusError::Threshold(_)
            | NucleusError::Morphology(_)
            | NucleusError::Segmentation(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "PROCESSING_ERROR")
            }
            NucleusError::ImageTooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, "IMAGE_TOO_LARGE"),
            NucleusError::MissingFile => (StatusCode::BAD_REQUEST, "MISSING_FILE"),
            NucleusError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            NucleusError::Io(_) | NucleusError::TiffEncode(_) | NucleusError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        };

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let cases = [
            (NucleusError::MissingFile, StatusCode::BAD_REQUEST),
            (
                NucleusError::InvalidParameters("sigma".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                NucleusError::ImageTooLarge { size: 10, max: 5 },
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
            (
                NucleusError::Segmentation("boom".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(error.into_response().status(), status);
        }
    }

    #[test]
    fn test_stage_name_in_message() {
        let err = NucleusError::Filter("empty image".into());
        assert_eq!(err.to_string(), "Filter stage failed: empty image");
    }
}
