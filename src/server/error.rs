//! Maps engine and aggregator failures onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::PipelineError;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    #[serde(rename = "errorKind")]
    pub error_kind: &'static str,
    pub message: String,
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self {
            PipelineError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            PipelineError::InvalidArgument(_) => (StatusCode::BAD_REQUEST, "INVALID_ARGUMENT"),
            PipelineError::Database(_) | PipelineError::Serialization(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL")
            }
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            log::error!("request failed: {}", self);
        }

        (
            status,
            Json(ErrorBody {
                error_kind: kind,
                message: self.to_string(),
            }),
        )
            .into_response()
    }
}
