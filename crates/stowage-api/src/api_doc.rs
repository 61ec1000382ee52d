//! OpenAPI documentation, served at `/api/openapi.json`.

use utoipa::OpenApi;

use crate::error;
use crate::handlers;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Stowage API",
        version = "0.1.0",
        description = "File upload service with load-based admission control, bounded concurrency and circuit-protected streaming writes."
    ),
    paths(
        handlers::upload::upload_file,
        handlers::health::health_check,
    ),
    components(schemas(
        handlers::upload::UploadForm,
        handlers::upload::UploadResponse,
        handlers::health::HealthResponse,
        handlers::health::UploadsHealth,
        handlers::health::DependencyHealth,
        error::ErrorResponse,
    )),
    tags(
        (name = "upload", description = "File uploads"),
        (name = "health", description = "Service health")
    )
)]
pub struct ApiDoc;

pub fn get_openapi_spec() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}
