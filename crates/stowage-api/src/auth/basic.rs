//! Optional HTTP Basic authentication for the upload route.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use stowage_core::{AppError, BasicAuthCredentials};
use subtle::ConstantTimeEq;

use crate::error::HttpAppError;

#[derive(Clone)]
pub struct BasicAuthState {
    credentials: Arc<BasicAuthCredentials>,
}

impl BasicAuthState {
    pub fn new(credentials: BasicAuthCredentials) -> Self {
        Self {
            credentials: Arc::new(credentials),
        }
    }

    fn verify(&self, username: &str, password: &str) -> bool {
        // Both comparisons always run.
        let user_ok = secure_compare(username, &self.credentials.username);
        let pass_ok = secure_compare(password, &self.credentials.password);
        user_ok & pass_ok
    }
}

fn secure_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Decode `Basic <base64(user:pass)>` into its two parts.
fn parse_basic_header(value: &str) -> Option<(String, String)> {
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

pub async fn basic_auth_middleware(
    State(auth): State<BasicAuthState>,
    request: Request,
    next: Next,
) -> Response {
    let credentials = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_basic_header);

    match credentials {
        Some((username, password)) if auth.verify(&username, &password) => next.run(request).await,
        Some(_) => {
            tracing::warn!(path = %request.uri().path(), "Rejected upload with invalid credentials");
            HttpAppError(AppError::Unauthorized("Invalid credentials".to_string())).into_response()
        }
        None => HttpAppError(AppError::Unauthorized("Authentication required".to_string()))
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> BasicAuthState {
        BasicAuthState::new(BasicAuthCredentials {
            username: "uploader".to_string(),
            password: "s3cret".to_string(),
        })
    }

    #[test]
    fn test_parse_basic_header() {
        let header = format!("Basic {}", STANDARD.encode("uploader:s3cret"));
        assert_eq!(
            parse_basic_header(&header),
            Some(("uploader".to_string(), "s3cret".to_string()))
        );

        // Passwords may contain colons.
        let header = format!("basic {}", STANDARD.encode("u:a:b"));
        assert_eq!(
            parse_basic_header(&header),
            Some(("u".to_string(), "a:b".to_string()))
        );

        assert_eq!(parse_basic_header("Bearer abc"), None);
        assert_eq!(parse_basic_header("Basic !!!"), None);
    }

    #[test]
    fn test_verify() {
        let auth = state();
        assert!(auth.verify("uploader", "s3cret"));
        assert!(!auth.verify("uploader", "wrong"));
        assert!(!auth.verify("someone", "s3cret"));
        assert!(!auth.verify("", ""));
    }
}
