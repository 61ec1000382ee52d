use std::io;
use std::sync::Arc;

use axum::{
    extract::{
        multipart::{Field, MultipartRejection},
        Multipart, State,
    },
    http::{header::CONTENT_LENGTH, StatusCode},
    response::IntoResponse,
    Json,
};
use futures::TryStreamExt;
use serde::Serialize;
use stowage_core::{ByteStream, UploadRequest, UploadResult};
use utoipa::ToSchema;

use crate::error::{ErrorResponse, HttpAppError};
use crate::state::AppState;

/// Multipart field that carries the file.
pub const FILE_FIELD: &str = "file";

#[derive(Debug, Serialize, ToSchema)]
pub struct UploadResponse {
    pub message: String,
    /// Name the file was stored under
    pub filename: String,
}

/// Multipart body accepted by `POST /upload`. Documentation only.
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct UploadForm {
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
}

#[utoipa::path(
    post,
    path = "/upload",
    tag = "upload",
    request_body(
        content = UploadForm,
        content_type = "multipart/form-data",
        description = "Multipart form with a single `file` field"
    ),
    responses(
        (status = 201, description = "File stored", body = UploadResponse),
        (status = 400, description = "Invalid file or interrupted upload", body = ErrorResponse),
        (status = 401, description = "Missing or invalid credentials", body = ErrorResponse),
        (status = 429, description = "Host overloaded or too many concurrent uploads", body = ErrorResponse),
        (status = 503, description = "Storage circuit open", body = ErrorResponse),
        (status = 500, description = "Storage write failed", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state, multipart))]
pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<impl IntoResponse, HttpAppError> {
    let mut multipart = match multipart {
        Ok(multipart) => multipart,
        Err(rejection) => {
            tracing::debug!(error = %rejection, "Request is not a multipart upload");
            return respond(state.pipeline.process(None).await);
        }
    };

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                tracing::debug!(error = %err, "Malformed multipart body");
                break;
            }
        };

        // Other fields are skipped unread.
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let request = upload_request(field);
        return respond(state.pipeline.process(Some(request)).await);
    }

    respond(state.pipeline.process(None).await)
}

/// Describe a multipart file part without reading its body.
fn upload_request(field: Field<'_>) -> UploadRequest<'_> {
    let name = field.file_name().map(str::to_string);
    let content_type = field.content_type().map(str::to_string);
    let declared_size = field
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(0);

    let stream: ByteStream<'_> = Box::pin(field.map_err(io::Error::other));

    UploadRequest {
        name,
        declared_size,
        content_type,
        stream: Some(stream),
    }
}

fn respond(result: UploadResult) -> Result<(StatusCode, Json<UploadResponse>), HttpAppError> {
    let stored = result.into_result()?;
    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            message: "Upload successful".to_string(),
            filename: stored.persisted_name,
        }),
    ))
}
