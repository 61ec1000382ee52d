//! Upload policy checks.
//!
//! Checks run in a fixed order and stop at the first failure, so a client
//! always sees the most fundamental problem with its request first.

use crate::config::UploadPolicy;
use crate::models::UploadRequest;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("File is required.")]
    MissingFile,

    #[error("File with a valid name is required.")]
    MissingName,

    #[error("File stream is required.")]
    MissingStream,

    #[error("File size exceeds {}MB limit.", format_megabytes(.max_bytes))]
    TooLarge { declared_bytes: u64, max_bytes: u64 },

    #[error("Only {label} files are allowed.")]
    DisallowedType {
        label: String,
        received: Option<String>,
    },

    #[error("File must have a {allowed} extension.")]
    DisallowedExtension { allowed: String },
}

/// Render a byte count in MiB without trailing zeros (`1`, `1.5`, `0.25`).
fn format_megabytes(bytes: &u64) -> String {
    let megabytes = *bytes as f64 / BYTES_PER_MB;
    let rendered = format!("{:.2}", megabytes);
    rendered
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

/// Strip parameters (`; charset=...`) and case from a media type.
pub fn normalize_mime_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
        .to_lowercase()
}

/// Stateless policy checks over the declared metadata of an upload.
#[derive(Debug, Clone)]
pub struct Validator {
    policy: UploadPolicy,
}

impl Validator {
    pub fn new(policy: UploadPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &UploadPolicy {
        &self.policy
    }

    pub fn validate(&self, request: Option<&UploadRequest<'_>>) -> Result<(), ValidationError> {
        let request = request.ok_or(ValidationError::MissingFile)?;

        match request.name.as_deref() {
            Some(name) if !name.trim().is_empty() => {}
            _ => return Err(ValidationError::MissingName),
        }

        if request.stream.is_none() {
            return Err(ValidationError::MissingStream);
        }

        if request.declared_size > self.policy.max_file_size_bytes {
            return Err(ValidationError::TooLarge {
                declared_bytes: request.declared_size,
                max_bytes: self.policy.max_file_size_bytes,
            });
        }

        let content_type = request.content_type.as_deref().map(normalize_mime_type);
        if content_type.as_deref() != Some(self.policy.allowed_content_type.as_str()) {
            return Err(ValidationError::DisallowedType {
                label: self.policy.type_label(),
                received: content_type,
            });
        }

        if request.extension().as_deref() != Some(self.policy.allowed_extension.as_str()) {
            return Err(ValidationError::DisallowedExtension {
                allowed: self.policy.allowed_extension.clone(),
            });
        }

        Ok(())
    }
}
