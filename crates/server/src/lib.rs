//! HTTP front end for the receipt pipeline.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tillscan_ocr::{DecodeError, ExtractionResult, MediaType, RawDocument, ReceiptPipeline, TextRecognizer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

pub type DynRecognizer = Arc<dyn TextRecognizer>;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<ReceiptPipeline<DynRecognizer>>,
}

impl AppState {
    pub fn new(pipeline: ReceiptPipeline<DynRecognizer>) -> Self {
        Self { pipeline: Arc::new(pipeline) }
    }
}

pub fn build_router(state: AppState) -> Router {
    let limit = state.pipeline.max_document_bytes();
    Router::new()
        .route("/health", get(health_check))
        .route("/extract", post(extract))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn start_server(addr: &str, state: AppState) -> Result<(), std::io::Error> {
    tracing::info!(addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, build_router(state)).await
}

async fn health_check() -> &'static str {
    "ok"
}

/// Raw document body in, extraction result out. The media type comes from `Content-Type`.
async fn extract(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ExtractionResult>, ApiError> {
    let mime = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let media_type = MediaType::from_mime(mime)
        .ok_or_else(|| DecodeError::UnsupportedMediaType(mime.to_string()))?;

    let result = state.pipeline.run(RawDocument::new(body.to_vec(), media_type)).await?;
    Ok(Json(result))
}

pub struct ApiError(DecodeError);

impl From<DecodeError> for ApiError {
    fn from(e: DecodeError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0 {
            DecodeError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            DecodeError::UnsupportedMediaType(_) | DecodeError::NoRasterizer => {
                StatusCode::UNSUPPORTED_MEDIA_TYPE
            }
            DecodeError::Empty
            | DecodeError::Image(_)
            | DecodeError::Pdf(_)
            | DecodeError::NoPages => StatusCode::UNPROCESSABLE_ENTITY,
            DecodeError::Io(_) | DecodeError::Aborted(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        warn!(status = status.as_u16(), error = %self.0, "document rejected");
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}
