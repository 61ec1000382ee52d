//! Route configuration and setup

use std::any::Any;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::Request,
    middleware::{from_fn, from_fn_with_state},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use stowage_core::AppError;
use stowage_infra::{get_request_id, request_id_middleware};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{basic_auth_middleware, BasicAuthState};
use crate::error::{error_detail_middleware, ErrorDetailPolicy, HttpAppError};
use crate::handlers;
use crate::middleware::{admission_middleware, rate_limit_middleware, HttpRateLimiter};
use crate::state::AppState;

/// Build the application router.
///
/// Layers from the outside in: request id, trace span, error detail policy,
/// panic catcher, rate limiter. The upload route additionally runs basic auth
/// (when configured) and the admission gate before its body is read.
pub fn setup_routes(state: Arc<AppState>) -> Router {
    let rate_limiter = HttpRateLimiter::new(
        state.config.http_rate_limit_per_window(),
        state.config.http_rate_limit_window(),
    )
    .with_trusted_proxies(state.config.trusted_proxy_count());
    if !rate_limiter.is_enabled() {
        tracing::info!("HTTP rate limiting disabled");
    }

    let detail_policy = ErrorDetailPolicy::from_config(&state.config);

    let trace_layer = TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
        let request_id = get_request_id(request).unwrap_or_default();
        tracing::info_span!(
            "http_request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    });

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .merge(upload_routes(&state))
        .with_state(state)
        .route(
            "/api/openapi.json",
            get(|| async { Json(crate::api_doc::get_openapi_spec()) }),
        )
        .layer(from_fn_with_state(rate_limiter, rate_limit_middleware))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(from_fn_with_state(detail_policy, error_detail_middleware))
        .layer(trace_layer)
        .layer(from_fn(request_id_middleware))
}

fn upload_routes(state: &Arc<AppState>) -> Router<Arc<AppState>> {
    // Bodies are streamed to storage and bounded there, not buffered here.
    let router = Router::new()
        .route("/upload", post(handlers::upload::upload_file))
        .layer(DefaultBodyLimit::disable())
        .route_layer(from_fn_with_state(state.gate.clone(), admission_middleware));

    match state.config.basic_auth() {
        Some(credentials) => {
            tracing::info!("Basic auth enabled for uploads");
            router.route_layer(from_fn_with_state(
                BasicAuthState::new(credentials.clone()),
                basic_auth_middleware,
            ))
        }
        None => router,
    }
}

fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());

    tracing::error!(panic = %message, "Request handler panicked");

    HttpAppError(AppError::Internal(message)).into_response()
}
