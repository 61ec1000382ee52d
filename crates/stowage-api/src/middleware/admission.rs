use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use stowage_infra::AdmissionGate;

use crate::error::HttpAppError;

/// Turn uploads away before their body is read while the host is saturated.
pub async fn admission_middleware(
    State(gate): State<AdmissionGate>,
    request: Request,
    next: Next,
) -> Response {
    if let Err(err) = gate.check_capacity() {
        return HttpAppError(err).into_response();
    }
    next.run(request).await
}
