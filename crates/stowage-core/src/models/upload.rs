use std::fmt;
use std::io;
use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;

use crate::error::AppError;

/// Readable byte source of an upload. Read-side failures surface as `io::Error`.
pub type ByteStream<'a> = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + 'a>>;

/// One incoming file as declared by the client.
///
/// `declared_size` is advisory: it is what the client claims, not what will be
/// read from `stream`.
pub struct UploadRequest<'a> {
    pub name: Option<String>,
    pub declared_size: u64,
    pub content_type: Option<String>,
    pub stream: Option<ByteStream<'a>>,
}

impl<'a> UploadRequest<'a> {
    pub fn new(
        name: impl Into<String>,
        content_type: impl Into<String>,
        declared_size: u64,
        stream: ByteStream<'a>,
    ) -> Self {
        Self {
            name: Some(name.into()),
            declared_size,
            content_type: Some(content_type.into()),
            stream: Some(stream),
        }
    }

    /// Lower-cased extension of the declared name including the dot, if any.
    pub fn extension(&self) -> Option<String> {
        let name = self.name.as_deref()?;
        let file_name = name.rsplit(['/', '\\']).next().unwrap_or(name);
        let dot = file_name.rfind('.')?;
        if dot == 0 && file_name.len() == 1 {
            return None;
        }
        Some(file_name[dot..].to_lowercase())
    }
}

impl fmt::Debug for UploadRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadRequest")
            .field("name", &self.name)
            .field("declared_size", &self.declared_size)
            .field("content_type", &self.content_type)
            .field("stream", &self.stream.as_ref().map(|_| "<stream>"))
            .finish()
    }
}

/// A file that reached durable storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredUpload {
    pub persisted_name: String,
    pub bytes_written: u64,
}

/// Outcome of one pass through the upload pipeline.
#[derive(Debug)]
pub enum UploadResult {
    Success(StoredUpload),
    /// Turned away by policy, capacity or the circuit breaker before any write
    Rejected(AppError),
    /// The write was attempted and did not complete
    Failed(AppError),
}

impl UploadResult {
    pub fn from_error(err: AppError) -> Self {
        if err.is_rejection() {
            UploadResult::Rejected(err)
        } else {
            UploadResult::Failed(err)
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, UploadResult::Success(_))
    }

    pub fn into_result(self) -> Result<StoredUpload, AppError> {
        match self {
            UploadResult::Success(stored) => Ok(stored),
            UploadResult::Rejected(err) | UploadResult::Failed(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::ValidationError;

    fn named(name: &str) -> UploadRequest<'static> {
        UploadRequest {
            name: Some(name.to_string()),
            declared_size: 0,
            content_type: None,
            stream: None,
        }
    }

    #[test]
    fn extension_is_lowercased_with_dot() {
        assert_eq!(named("Report.CSV").extension().as_deref(), Some(".csv"));
        assert_eq!(named("a.b.csv").extension().as_deref(), Some(".csv"));
        assert_eq!(named("dir/x.csv").extension().as_deref(), Some(".csv"));
    }

    #[test]
    fn extension_missing() {
        assert_eq!(named("README").extension(), None);
        assert_eq!(named(".").extension(), None);
    }

    #[test]
    fn result_classification() {
        let rejected = UploadResult::from_error(ValidationError::MissingFile.into());
        assert!(matches!(rejected, UploadResult::Rejected(_)));

        let failed = UploadResult::from_error(AppError::Storage("disk".to_string()));
        assert!(matches!(failed, UploadResult::Failed(_)));
        assert!(!failed.is_success());
    }
}
