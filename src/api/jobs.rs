//! Job endpoints: uploads, estimate, submission, history and export.

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Extension, Multipart, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

use super::auth::AuthUser;
use super::error_response;
use super::routes::AppState;
use crate::labeler::{JobSummary, JobView, Quote, Submission, UploadReceipt};
use crate::records::RecordKind;

const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

pub fn routes(max_upload_bytes: usize) -> Router<Arc<AppState>> {
    let upload = Router::new()
        .route("/current/files/:kind", post(upload_file))
        .layer(DefaultBodyLimit::max(max_upload_bytes));

    Router::new()
        .route("/", get(list_jobs))
        .route("/current", get(current_job).delete(clear_current))
        .route("/current/estimate", get(estimate))
        .route("/current/submit", post(submit))
        .merge(upload)
        .route("/:id", get(get_job))
        .route("/:id/export", get(export))
}

async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<JobSummary>>, (StatusCode, String)> {
    state
        .labeler
        .jobs(&user.id)
        .map(Json)
        .map_err(error_response)
}

async fn current_job(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Option<JobView>>, (StatusCode, String)> {
    state
        .labeler
        .current_job(&user.id)
        .map(Json)
        .map_err(error_response)
}

async fn clear_current(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<JobView>, (StatusCode, String)> {
    state.labeler.clear(&user.id).map(Json).map_err(error_response)
}

/// Accepts the first multipart field as the spreadsheet.
async fn upload_file(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(kind): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<UploadReceipt>, (StatusCode, String)> {
    let kind: RecordKind = kind.parse().map_err(|e| (StatusCode::BAD_REQUEST, e))?;

    let field = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                "Expected a spreadsheet file in the request".to_string(),
            )
        })?;

    let file_name = field.file_name().unwrap_or("upload").to_string();
    let bytes = field
        .bytes()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    tracing::debug!(
        "Received {} upload {} ({} bytes) from {}",
        kind,
        file_name,
        bytes.len(),
        user.id
    );

    state
        .labeler
        .ingest(&user.id, kind, &bytes)
        .map(Json)
        .map_err(error_response)
}

async fn estimate(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Quote>, (StatusCode, String)> {
    state
        .labeler
        .estimate(&user.id)
        .map(Json)
        .map_err(error_response)
}

async fn submit(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Submission>, (StatusCode, String)> {
    state
        .labeler
        .submit(&user.id)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn get_job(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobView>, (StatusCode, String)> {
    state
        .labeler
        .job(&user.id, id)
        .map(Json)
        .map_err(error_response)
}

async fn export(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Response, (StatusCode, String)> {
    let file = state.labeler.export(&user.id, id).map_err(error_response)?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(XLSX_CONTENT_TYPE),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!("attachment; filename=\"{}\"", file.file_name))
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?,
    );

    Ok((headers, file.bytes).into_response())
}
