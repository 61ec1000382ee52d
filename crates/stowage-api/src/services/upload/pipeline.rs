use std::sync::Arc;
use std::time::Instant;

use stowage_core::{AppError, ByteStream, StoredUpload, UploadRequest, UploadResult, ValidationError, Validator};
use stowage_infra::{AdmissionGate, BreakerError, CircuitBreaker, SourceWait, UploadLimiter};
use stowage_storage::{Storage, StorageError};

/// Runs one upload through validation, the concurrency limiter, the admission
/// gate and the circuit-protected write, in that order.
///
/// A request that fails validation never takes a slot and never reaches
/// storage. The slot is released on every path, including cancellation.
#[derive(Clone)]
pub struct UploadPipeline {
    validator: Validator,
    limiter: UploadLimiter,
    gate: AdmissionGate,
    breaker: Arc<CircuitBreaker>,
    storage: Arc<dyn Storage>,
}

impl UploadPipeline {
    pub fn new(
        validator: Validator,
        limiter: UploadLimiter,
        gate: AdmissionGate,
        breaker: Arc<CircuitBreaker>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        Self {
            validator,
            limiter,
            gate,
            breaker,
            storage,
        }
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    #[tracing::instrument(
        skip(self, request),
        fields(
            file_name = request.as_ref().and_then(|r| r.name.as_deref()).unwrap_or(""),
            declared_size = request.as_ref().map(|r| r.declared_size).unwrap_or(0)
        )
    )]
    pub async fn process(&self, request: Option<UploadRequest<'_>>) -> UploadResult {
        let start = Instant::now();
        match self.run(request).await {
            Ok(stored) => {
                tracing::info!(
                    persisted_name = %stored.persisted_name,
                    bytes_written = stored.bytes_written,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Upload persisted"
                );
                UploadResult::Success(stored)
            }
            Err(err) => {
                let result = UploadResult::from_error(err);
                if let UploadResult::Rejected(ref err) = result {
                    tracing::debug!(error = %err, "Upload rejected");
                }
                result
            }
        }
    }

    async fn run(&self, request: Option<UploadRequest<'_>>) -> Result<StoredUpload, AppError> {
        self.validator.validate(request.as_ref())?;

        let Some(UploadRequest {
            name: Some(name),
            stream: Some(stream),
            ..
        }) = request
        else {
            return Err(AppError::Internal(
                "validated upload is missing its name or stream".to_string(),
            ));
        };

        let _slot = self.limiter.try_acquire()?;
        self.gate.check_capacity()?;

        let max_bytes = self.validator.policy().max_file_size_bytes;
        // A slow client is not a slow backend.
        let client_wait = SourceWait::new();
        let stream: ByteStream<'_> = Box::pin(client_wait.track(stream));
        let stored = self
            .breaker
            .fire_excluding(
                self.storage.persist_stream(&name, stream, Some(max_bytes)),
                &client_wait,
            )
            .await
            .map_err(|err| map_breaker_error(err, max_bytes))?;

        Ok(StoredUpload {
            persisted_name: stored.key,
            bytes_written: stored.bytes_written,
        })
    }
}

fn map_breaker_error(err: BreakerError<StorageError>, max_bytes: u64) -> AppError {
    match err {
        BreakerError::Open => AppError::CircuitOpen,
        BreakerError::Timeout(timeout) => AppError::StorageTimeout {
            timeout_ms: timeout.as_millis() as u64,
        },
        BreakerError::Inner(err) => map_storage_error(err, max_bytes),
    }
}

fn map_storage_error(err: StorageError, max_bytes: u64) -> AppError {
    match err {
        StorageError::InvalidKey(msg) => AppError::InvalidFilename(msg),
        StorageError::SourceInterrupted(msg) => AppError::UploadInterrupted(msg),
        // The body turned out larger than declared; only a lower bound is known.
        StorageError::SizeLimitExceeded { limit } => AppError::Validation(ValidationError::TooLarge {
            declared_bytes: limit.saturating_add(1),
            max_bytes,
        }),
        StorageError::WriteFailed(msg) => AppError::Storage(msg),
        StorageError::IoError(err) => AppError::Storage(err.to_string()),
        StorageError::ConfigError(msg) => AppError::Storage(msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::io;
    use std::time::Duration;
    use stowage_core::{AdmissionConfig, CircuitBreakerConfig, UploadPolicy};
    use stowage_infra::{CircuitState, StaticHostMetrics, SystemLoadSnapshot};
    use stowage_storage::{LocalStorage, StorageResult, StoredFile};
    use tempfile::TempDir;

    const MB: u64 = 1024 * 1024;

    struct Harness {
        pipeline: UploadPipeline,
        limiter: UploadLimiter,
        breaker: Arc<CircuitBreaker>,
        metrics: Arc<StaticHostMetrics>,
        dir: TempDir,
    }

    fn breaker_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            timeout: Duration::from_secs(5),
            ..CircuitBreakerConfig::default()
        }
    }

    async fn harness_with(capacity: usize, storage: Option<Arc<dyn Storage>>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let storage = match storage {
            Some(storage) => storage,
            None => Arc::new(LocalStorage::new(dir.path()).await.unwrap()),
        };
        let limiter = UploadLimiter::new(capacity);
        let metrics = Arc::new(StaticHostMetrics::idle());
        let gate = AdmissionGate::new(AdmissionConfig::default(), metrics.clone());
        let breaker = Arc::new(CircuitBreaker::new("storage", breaker_config()));
        let validator = Validator::new(UploadPolicy::new(MB, "text/csv", ".csv"));

        Harness {
            pipeline: UploadPipeline::new(
                validator,
                limiter.clone(),
                gate,
                breaker.clone(),
                storage,
            ),
            limiter,
            breaker,
            metrics,
            dir,
        }
    }

    async fn harness() -> Harness {
        harness_with(2, None).await
    }

    fn stream(chunks: &[&str]) -> ByteStream<'static> {
        let chunks: Vec<io::Result<Bytes>> = chunks
            .iter()
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk.as_bytes())))
            .collect();
        Box::pin(futures::stream::iter(chunks))
    }

    fn csv(name: &str, declared_size: u64, body: ByteStream<'static>) -> UploadRequest<'static> {
        UploadRequest::new(name, "text/csv", declared_size, body)
    }

    fn files_in(dir: &TempDir) -> Vec<String> {
        std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    struct FailingStorage;

    #[async_trait]
    impl Storage for FailingStorage {
        async fn persist_stream(
            &self,
            _name: &str,
            _stream: ByteStream<'_>,
            _max_bytes: Option<u64>,
        ) -> StorageResult<StoredFile> {
            Err(StorageError::WriteFailed("disk full".to_string()))
        }

        async fn exists(&self, _key: &str) -> StorageResult<bool> {
            Ok(false)
        }

        async fn is_writable(&self) -> bool {
            false
        }

        fn backend_type(&self) -> &'static str {
            "failing"
        }
    }

    #[tokio::test]
    async fn test_valid_upload_is_persisted() {
        let h = harness().await;
        let result = h
            .pipeline
            .process(Some(csv("sample.csv", 16, stream(&["id,name\n", "1,alpha\n"]))))
            .await;

        let stored = result.into_result().unwrap();
        assert_eq!(stored.persisted_name, "sample.csv");
        assert_eq!(stored.bytes_written, 16);
        assert_eq!(
            std::fs::read(h.dir.path().join("sample.csv")).unwrap(),
            b"id,name\n1,alpha\n"
        );
        assert_eq!(h.limiter.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_missing_request_is_rejected() {
        let h = harness().await;
        match h.pipeline.process(None).await {
            UploadResult::Rejected(AppError::Validation(ValidationError::MissingFile)) => {}
            other => panic!("expected MissingFile rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_validation_runs_before_slot_acquisition() {
        // No slots at all: a failing validation must still report itself.
        let h = harness_with(0, None).await;
        let result = h
            .pipeline
            .process(Some(csv("big.csv", 2 * MB, stream(&["x"]))))
            .await;

        match result {
            UploadResult::Rejected(AppError::Validation(ValidationError::TooLarge {
                max_bytes,
                ..
            })) => assert_eq!(max_bytes, MB),
            other => panic!("expected TooLarge, got {:?}", other),
        }
        assert!(files_in(&h.dir).is_empty());
    }

    #[tokio::test]
    async fn test_concurrency_limit_rejects() {
        let h = harness_with(1, None).await;
        let _held = h.limiter.try_acquire().unwrap();

        let result = h
            .pipeline
            .process(Some(csv("sample.csv", 1, stream(&["x"]))))
            .await;
        assert!(matches!(
            result,
            UploadResult::Rejected(AppError::ConcurrencyLimitReached { capacity: 1 })
        ));
        assert!(files_in(&h.dir).is_empty());
    }

    #[tokio::test]
    async fn test_overloaded_host_rejects_and_releases_slot() {
        let h = harness().await;
        h.metrics.set(SystemLoadSnapshot {
            free_memory_bytes: 1,
            total_memory_bytes: 100,
            load_average_one: 0.0,
            cpu_count: 4,
        });

        let result = h
            .pipeline
            .process(Some(csv("sample.csv", 1, stream(&["x"]))))
            .await;
        assert!(matches!(
            result,
            UploadResult::Rejected(AppError::HostOverloaded { .. })
        ));
        assert_eq!(h.limiter.in_flight(), 0);
        assert!(files_in(&h.dir).is_empty());
    }

    #[tokio::test]
    async fn test_open_circuit_rejects_without_writing() {
        let h = harness().await;
        let _ = h
            .breaker
            .fire(async { Err::<(), _>(StorageError::WriteFailed("boom".into())) })
            .await;
        assert_eq!(h.breaker.state(), CircuitState::Open);

        let result = h
            .pipeline
            .process(Some(csv("sample.csv", 1, stream(&["x"]))))
            .await;
        assert!(matches!(result, UploadResult::Rejected(AppError::CircuitOpen)));
        assert!(files_in(&h.dir).is_empty());
        assert_eq!(h.limiter.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_actual_size_is_enforced_without_tripping() {
        let h = harness().await;
        let chunk = "a".repeat(512 * 1024);

        // Declares 1 byte, sends 1.5MB.
        let result = h
            .pipeline
            .process(Some(csv(
                "liar.csv",
                1,
                stream(&[&chunk[..], &chunk[..], &chunk[..]]),
            )))
            .await;

        match result {
            UploadResult::Rejected(AppError::Validation(err)) => {
                assert_eq!(err.to_string(), "File size exceeds 1MB limit.");
            }
            other => panic!("expected TooLarge, got {:?}", other),
        }
        assert!(files_in(&h.dir).is_empty());
        assert_eq!(h.breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_interrupted_source_fails_without_tripping() {
        let h = harness().await;
        let body: ByteStream<'static> = Box::pin(futures::stream::iter(vec![
            Ok(Bytes::from_static(b"id,name\n")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "client went away")),
        ]));

        let result = h.pipeline.process(Some(csv("sample.csv", 8, body))).await;
        assert!(matches!(
            result,
            UploadResult::Failed(AppError::UploadInterrupted(_))
        ));
        assert_eq!(h.breaker.state(), CircuitState::Closed);
        assert!(files_in(&h.dir).is_empty());
    }

    #[tokio::test]
    async fn test_storage_failure_fails_and_trips_breaker() {
        let h = harness_with(2, Some(Arc::new(FailingStorage))).await;

        let result = h
            .pipeline
            .process(Some(csv("sample.csv", 1, stream(&["x"]))))
            .await;
        assert!(matches!(result, UploadResult::Failed(AppError::Storage(_))));
        assert_eq!(h.breaker.state(), CircuitState::Open);
        assert_eq!(h.limiter.in_flight(), 0);

        let result = h
            .pipeline
            .process(Some(csv("sample.csv", 1, stream(&["x"]))))
            .await;
        assert!(matches!(result, UploadResult::Rejected(AppError::CircuitOpen)));
    }

    #[tokio::test]
    async fn test_traversal_name_is_contained() {
        let h = harness().await;
        let result = h
            .pipeline
            .process(Some(csv("../../etc/evil.csv", 1, stream(&["x"]))))
            .await;

        let stored = result.into_result().unwrap();
        assert_eq!(stored.persisted_name, "evil.csv");
        assert!(h.dir.path().join("evil.csv").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_client_does_not_time_out_storage() {
        let h = harness().await;
        let (tx, rx) = futures::channel::mpsc::unbounded::<io::Result<Bytes>>();
        let feeder = tokio::spawn(async move {
            for _ in 0..12 {
                tokio::time::sleep(Duration::from_secs(1)).await;
                tx.unbounded_send(Ok(Bytes::from_static(b"1,row\n"))).unwrap();
            }
        });

        // Twelve seconds end to end against a five second storage timeout.
        let result = h
            .pipeline
            .process(Some(csv("slow.csv", 72, Box::pin(rx))))
            .await;
        feeder.await.unwrap();

        let stored = result.into_result().unwrap();
        assert_eq!(stored.bytes_written, 72);
        assert_eq!(h.breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_long_name_is_stored_with_extension() {
        let h = harness().await;
        let name = format!("{}.csv", "a".repeat(250));

        let stored = h
            .pipeline
            .process(Some(csv(&name, 1, stream(&["x"]))))
            .await
            .into_result()
            .unwrap();

        assert!(stored.persisted_name.ends_with(".csv"));
        assert!(h.dir.path().join(&stored.persisted_name).exists());
        assert_eq!(h.breaker.state(), CircuitState::Closed);

        let next = h
            .pipeline
            .process(Some(csv("sample.csv", 1, stream(&["x"]))))
            .await;
        assert!(next.into_result().is_ok());
    }

    #[tokio::test]
    async fn test_repeated_dots_are_accepted() {
        let h = harness().await;
        for name in ["report..v2.csv", "data...csv"] {
            let stored = h
                .pipeline
                .process(Some(csv(name, 1, stream(&["x"]))))
                .await
                .into_result()
                .unwrap();
            assert_eq!(stored.persisted_name, name);
        }
    }

    #[test]
    fn test_storage_error_mapping() {
        assert!(matches!(
            map_storage_error(StorageError::InvalidKey("..".into()), MB),
            AppError::InvalidFilename(_)
        ));
        assert!(matches!(
            map_breaker_error(BreakerError::Timeout(Duration::from_millis(250)), MB),
            AppError::StorageTimeout { timeout_ms: 250 }
        ));
        assert!(matches!(
            map_breaker_error(BreakerError::Open, MB),
            AppError::CircuitOpen
        ));
    }
}
