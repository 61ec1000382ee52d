//! HTTP error response conversion
//!
//! Handlers return `Result<impl IntoResponse, HttpAppError>`. Any [`AppError`]
//! converts into `HttpAppError` with `?` and renders with a consistent status,
//! body and log line.

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use stowage_core::{AppError, Config, ErrorMetadata, LogLevel};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Client-facing message
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    /// Machine-readable error code for programmatic handling
    pub code: String,
    /// Whether this error is recoverable (can be retried)
    pub recoverable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

impl ErrorResponse {
    fn from_app_error(error: &AppError, include_details: bool) -> Self {
        Self {
            message: error.client_message(),
            details: include_details.then(|| error.detailed_message()),
            error_type: include_details.then(|| error.error_type().to_string()),
            code: error.error_code().to_string(),
            recoverable: error.is_recoverable(),
            suggested_action: error.suggested_action().map(String::from),
        }
    }
}

/// Wrapper that lets `AppError` (from stowage-core) implement `IntoResponse`.
#[derive(Debug)]
pub struct HttpAppError(pub AppError);

impl From<AppError> for HttpAppError {
    fn from(err: AppError) -> Self {
        HttpAppError(err)
    }
}

impl From<anyhow::Error> for HttpAppError {
    fn from(err: anyhow::Error) -> Self {
        HttpAppError(AppError::from(err))
    }
}

fn log_error(error: &AppError) {
    let error_type = error.error_type();
    match error.log_level() {
        LogLevel::Debug => {
            tracing::debug!(error = %error, error_type = error_type, "Error occurred");
        }
        LogLevel::Warn => {
            tracing::warn!(error = %error, error_type = error_type, "Error occurred");
        }
        LogLevel::Error => {
            tracing::error!(error = %error, error_type = error_type, "Error occurred");
        }
    }
}

/// Whether error bodies may carry `details` and `error_type`.
#[derive(Clone, Copy, Debug)]
pub struct ErrorDetailPolicy {
    pub expose_details: bool,
}

impl ErrorDetailPolicy {
    /// Details are hidden in production.
    pub fn from_config(config: &Config) -> Self {
        Self {
            expose_details: !config.is_production(),
        }
    }
}

/// Strips details from error bodies rendered by [`HttpAppError`] when the
/// policy forbids them.
pub async fn error_detail_middleware(
    State(policy): State<ErrorDetailPolicy>,
    request: Request,
    next: Next,
) -> Response {
    let response = next.run(request).await;
    if policy.expose_details {
        return response;
    }

    let Some(body) = response
        .extensions()
        .get::<ErrorResponse>()
        .filter(|body| body.details.is_some() || body.error_type.is_some())
        .cloned()
    else {
        return response;
    };

    let (mut parts, _) = response.into_parts();
    parts.headers.remove(header::CONTENT_LENGTH);
    let body = ErrorResponse {
        details: None,
        error_type: None,
        ..body
    };
    Response::from_parts(parts, Json(body).into_response().into_body())
}

impl IntoResponse for HttpAppError {
    fn into_response(self) -> Response {
        let app_error = &self.0;

        let status = StatusCode::from_u16(app_error.http_status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        log_error(app_error);

        // Sensitive errors never show details; production strips the rest in
        // `error_detail_middleware`.
        let body = ErrorResponse::from_app_error(app_error, !app_error.is_sensitive());

        let mut response = (status, Json(body.clone())).into_response();
        response.extensions_mut().insert(body);

        match app_error {
            AppError::RateLimited { retry_after_secs } => {
                if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                    response.headers_mut().insert(header::RETRY_AFTER, value);
                }
            }
            AppError::Unauthorized(_) => {
                response.headers_mut().insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static("Basic realm=\"stowage\", charset=\"UTF-8\""),
                );
            }
            _ => {}
        }

        response
    }
}
