//! HTTP API
//!
//! axum routes adapting HTTP requests onto [`StorageService`]. Upload
//! bodies are streamed into the chunk pipeline, never buffered whole.

use axum::body::Body;
use axum::extract::multipart::Field;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use futures::{future, stream, StreamExt};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};
use uuid::Uuid;

use super::storage::StorageService;
use crate::error::{Result, StratusError};
use crate::metrics::gather_system_metrics;
use crate::protocol::{CopyObjectRequest, DeleteObjectRequest, UploadResponse};
use crate::runtime::ShutdownSignal;

#[derive(Clone)]
pub struct AppState {
    service: Arc<StorageService>,
}

/// Body of `POST /api/files/upload`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadFileResponse {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    folder_id: Option<String>,
}

/// Build the API router
pub fn router(service: Arc<StorageService>) -> Router {
    Router::new()
        .route("/api/files/upload", post(upload_file))
        .route("/api/copy", post(copy_object))
        .route(
            "/api/objects/*key",
            put(put_object).get(get_object).delete(delete_object),
        )
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::disable())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AppState { service })
}

/// Serve `router` until `shutdown` fires
pub async fn serve(listener: TcpListener, router: Router, shutdown: ShutdownSignal) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("HTTP API listening on {}", addr);
    }

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.recv().await })
        .await
        .map_err(|e| StratusError::Internal {
            message: format!("HTTP server error: {}", e),
        })
}

/// Object key for an uploaded file: `{uuid}_{filename}`
pub fn object_key(file_name: &str) -> String {
    let base = file_name
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or(file_name);
    format!("{}_{}", Uuid::new_v4(), base)
}

fn guess_content_type(name: &str) -> String {
    mime_guess::from_path(name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

fn status_for(error: &StratusError) -> StatusCode {
    match error {
        StratusError::ObjectNotFound { .. } => StatusCode::NOT_FOUND,
        StratusError::InvalidMessage { .. } | StratusError::IncompleteStream { .. } => {
            StatusCode::BAD_REQUEST
        }
        StratusError::ShutdownInProgress => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::BAD_GATEWAY,
    }
}

fn error_response(error: &StratusError) -> Response {
    (
        status_for(error),
        Json(json!({ "success": false, "message": error.to_string() })),
    )
        .into_response()
}

fn bad_request(message: impl Into<String>) -> Response {
    error_response(&StratusError::InvalidMessage {
        reason: message.into(),
    })
}

fn upload_result(response: UploadResponse, key: String, folder_id: Option<String>) -> Response {
    let status = if response.success {
        StatusCode::CREATED
    } else if response.client_error {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::BAD_GATEWAY
    };
    let body = UploadFileResponse {
        success: response.success,
        message: response.message,
        key: response.success.then_some(key),
        folder_id,
    };
    (status, Json(body)).into_response()
}

async fn upload_file(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let mut folder_id = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return bad_request(format!("malformed multipart body: {}", e)),
        };

        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("folderId") => match field.text().await {
                Ok(text) => folder_id = Some(text),
                Err(e) => return bad_request(format!("unreadable folderId: {}", e)),
            },
            Some("file") => return upload_field(&state, field, folder_id).await,
            other => debug!("Skipping form field {:?}", other),
        }
    }

    bad_request("No file provided for upload")
}

async fn upload_field(state: &AppState, field: Field<'_>, folder_id: Option<String>) -> Response {
    let Some(file_name) = field
        .file_name()
        .map(str::to_owned)
        .filter(|name| !name.trim().is_empty())
    else {
        return bad_request("No file provided for upload");
    };
    let content_type = field
        .content_type()
        .map(str::to_owned)
        .unwrap_or_else(|| guess_content_type(&file_name));

    let mut body = Box::pin(field.map(|chunk| {
        chunk.map_err(|e| StratusError::InvalidMessage {
            reason: format!("file field: {}", e),
        })
    }));

    // An empty file never reaches the store
    let first = loop {
        match body.next().await {
            Some(Ok(chunk)) if chunk.is_empty() => continue,
            Some(Ok(chunk)) => break chunk,
            Some(Err(e)) => return error_response(&e),
            None => return bad_request("No file provided for upload"),
        }
    };

    let key = object_key(&file_name);
    info!(
        "Uploading {} as {} ({}, folder {:?})",
        file_name, key, content_type, folder_id
    );

    let chunks = stream::once(future::ready(Ok(first))).chain(body);
    let response = state
        .service
        .upload_bytes(&key, &content_type, chunks)
        .await;
    upload_result(response, key, folder_id)
}

async fn put_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
        .unwrap_or_else(|| guess_content_type(&key));

    let chunks = Box::pin(body.into_data_stream().map(|chunk| {
        chunk.map_err(|e| StratusError::InvalidMessage {
            reason: format!("request body: {}", e),
        })
    }));

    let response = state
        .service
        .upload_bytes(&key, &content_type, chunks)
        .await;
    upload_result(response, key, None)
}

async fn get_object(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    match state.service.download_object(&key).await {
        Ok(data) => ([(header::CONTENT_TYPE, guess_content_type(&key))], data).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn delete_object(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    let response = state.service.delete_object(DeleteObjectRequest { key }).await;
    let status = if response.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };
    (status, Json(response)).into_response()
}

async fn copy_object(
    State(state): State<AppState>,
    Json(request): Json<CopyObjectRequest>,
) -> Response {
    let response = state.service.copy_object(request).await;
    let status = if response.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };
    (status, Json(response)).into_response()
}

async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        gather_system_metrics(),
    )
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "stratus",
    }))
}
