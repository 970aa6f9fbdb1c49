use std::future::Future;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use text_similarity_backend_core::EmbeddingBackend as CoreBackend;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{instrument, Span};

pub use text_similarity_backend_core::{BackendError, Embedding, EmbeddingApi, EmbeddingBackend};

#[cfg(feature = "http")]
use text_similarity_backend_http::{HttpBackend, HttpBackendConfig};

/// Embedding provider settings
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Base url of the embedding server
    pub url: String,
    pub api: EmbeddingApi,
    pub model: Option<String>,
    pub api_token: Option<String>,
    /// Maximum number of inputs sent to the provider in one call
    pub max_batch_size: Option<usize>,
    pub truncate: bool,
    /// Deadline for a single `embed` or `health` call, queueing included
    pub timeout: Option<Duration>,
}

/// Shared handle on the embedding provider.
///
/// The provider is owned by a single worker thread. Every clone talks to the same worker, so
/// calls from concurrent requests are serialized.
#[derive(Debug, Clone)]
pub struct Backend {
    /// Channel to communicate with the background thread
    backend_sender: mpsc::Sender<BackendCommand>,
    /// Health status
    health_receiver: watch::Receiver<bool>,
    _backend_thread: Arc<BackendThread>,
    pub max_batch_size: Option<usize>,
    timeout: Option<Duration>,
}

impl Backend {
    pub async fn new(config: BackendConfig) -> Result<Self, BackendError> {
        let timeout = config.timeout;
        let backend = init_backend(config).await?;
        Ok(Self::from_backend(backend, timeout))
    }

    /// Wrap an already started provider
    pub fn from_backend(backend: Box<dyn CoreBackend + Send>, timeout: Option<Duration>) -> Self {
        let (backend_sender, backend_receiver) = mpsc::channel(8);
        let max_batch_size = backend.max_batch_size();

        let (health_sender, health_receiver) = watch::channel(false);
        let _backend_thread =
            Arc::new(BackendThread::new(backend, backend_receiver, health_sender));

        Self {
            backend_sender,
            health_receiver,
            _backend_thread,
            max_batch_size,
            timeout,
        }
    }

    #[instrument(skip(self))]
    pub async fn health(&self) -> Result<(), BackendError> {
        if *self.health_receiver.borrow() {
            // The backend is healthy. Only do a basic health check by calling the
            // the underlying health method.
            self.with_deadline(async {
                let (sender, receiver) = oneshot::channel();
                self.send(BackendCommand::Health(Span::current(), sender))
                    .await?;
                receiver.await.map_err(|_| worker_dropped())?
            })
            .await
        } else {
            // The backend is un-healthy or only just started. Do a more advanced health check
            // by embedding a test input
            self.embed(vec!["health".to_string()]).await.map(|_| ())
        }
    }

    #[instrument(skip(self))]
    pub fn health_watcher(&self) -> watch::Receiver<bool> {
        self.health_receiver.clone()
    }

    #[instrument(skip_all, fields(inputs = inputs.len()))]
    pub async fn embed(
        &self,
        inputs: Vec<String>,
    ) -> Result<(Vec<Embedding>, Duration), BackendError> {
        self.with_deadline(async {
            let (sender, receiver) = oneshot::channel();
            self.send(BackendCommand::Embed(inputs, Span::current(), sender))
                .await?;
            receiver.await.map_err(|_| worker_dropped())?
        })
        .await
    }

    async fn send(&self, command: BackendCommand) -> Result<(), BackendError> {
        self.backend_sender
            .send(command)
            .await
            .map_err(|_| worker_dropped())
    }

    async fn with_deadline<T>(
        &self,
        request: impl Future<Output = Result<T, BackendError>>,
    ) -> Result<T, BackendError> {
        match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, request)
                .await
                .map_err(|_| {
                    let err = BackendError::Timeout(timeout);
                    tracing::error!("{err}");
                    err
                })?,
            None => request.await,
        }
    }
}

fn worker_dropped() -> BackendError {
    BackendError::Inference("Backend worker stopped without sending a response".to_string())
}

#[allow(unused, unreachable_code)]
async fn init_backend(config: BackendConfig) -> Result<Box<dyn CoreBackend + Send>, BackendError> {
    if cfg!(feature = "http") {
        #[cfg(feature = "http")]
        {
            tracing::info!("Connecting to {} embedding server at {}", config.api, config.url);

            let http_config = HttpBackendConfig {
                url: config.url,
                api: config.api,
                model: config.model,
                api_token: config.api_token,
                max_batch_size: config.max_batch_size,
                truncate: config.truncate,
                timeout: config.timeout,
            };

            // The backend owns its own runtime: build it outside of the async context
            let backend = std::thread::spawn(move || HttpBackend::new(http_config))
                .join()
                .map_err(|_| {
                    BackendError::Start("HTTP backend management thread failed".to_string())
                })?;

            return match backend {
                Ok(b) => Ok(Box::new(b)),
                Err(err) => {
                    tracing::error!("Could not start HTTP backend: {err}");
                    Err(err)
                }
            };
        }
    }

    Err(BackendError::NoBackend)
}

#[derive(Debug)]
struct BackendThread(Option<JoinHandle<()>>);

impl BackendThread {
    fn new(
        backend: Box<dyn CoreBackend + Send>,
        mut backend_receiver: mpsc::Receiver<BackendCommand>,
        health_sender: watch::Sender<bool>,
    ) -> Self {
        let handle = std::thread::spawn(move || {
            while let Some(cmd) = backend_receiver.blocking_recv() {
                let start = Instant::now();
                // Callers that hit their deadline while queued are gone: skip their work.
                // Health is published before answering so callers observe it right away
                match cmd {
                    BackendCommand::Health(_, sender) if sender.is_closed() => {
                        tracing::debug!("Skipping health check: caller is gone");
                    }
                    BackendCommand::Embed(_, _, sender) if sender.is_closed() => {
                        tracing::debug!("Skipping embedding: caller is gone");
                    }
                    BackendCommand::Health(span, sender) => {
                        let _span = span.entered();
                        let result = backend.health();
                        let _ = health_sender.send(result.is_ok());
                        let _ = sender.send(result);
                    }
                    BackendCommand::Embed(inputs, span, sender) => {
                        let _span = span.entered();
                        let result = backend.embed(inputs).map(|e| (e, start.elapsed()));
                        let _ = health_sender.send(result.is_ok());
                        let _ = sender.send(result);
                    }
                };
            }
        });
        Self(Some(handle))
    }
}

impl Drop for BackendThread {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            let _ = handle.join();
        }
    }
}

enum BackendCommand {
    Health(Span, oneshot::Sender<Result<(), BackendError>>),
    Embed(
        Vec<String>,
        Span,
        oneshot::Sender<Result<(Vec<Embedding>, Duration), BackendError>>,
    ),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct LengthBackend {
        calls: Arc<AtomicUsize>,
        delay: Duration,
    }

    impl CoreBackend for LengthBackend {
        fn health(&self) -> Result<(), BackendError> {
            Ok(())
        }

        fn embed(&self, inputs: Vec<String>) -> Result<Vec<Embedding>, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            Ok(inputs.iter().map(|i| vec![i.len() as f32]).collect())
        }
    }

    struct FailingBackend;

    impl CoreBackend for FailingBackend {
        fn health(&self) -> Result<(), BackendError> {
            Err(BackendError::Unhealthy)
        }

        fn embed(&self, _inputs: Vec<String>) -> Result<Vec<Embedding>, BackendError> {
            Err(BackendError::Inference("model exploded".to_string()))
        }
    }

    fn length_backend(delay: Duration, timeout: Option<Duration>) -> (Backend, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let backend = Backend::from_backend(
            Box::new(LengthBackend {
                calls: calls.clone(),
                delay,
            }),
            timeout,
        );
        (backend, calls)
    }

    #[tokio::test]
    async fn test_embed_preserves_order() {
        let (backend, calls) = length_backend(Duration::ZERO, None);

        let (embeddings, _) = backend
            .embed(vec!["a".to_string(), "abc".to_string(), "ab".to_string()])
            .await
            .unwrap();

        assert_eq!(embeddings, vec![vec![1.0], vec![3.0], vec![2.0]]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_health_embeds_until_first_success() {
        let (backend, calls) = length_backend(Duration::ZERO, None);
        assert!(!*backend.health_watcher().borrow());

        backend.health().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(*backend.health_watcher().borrow());

        // Healthy: forwarded to the provider health method, no new embedding
        backend.health().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deadline_is_a_timeout_error() {
        let (backend, _) =
            length_backend(Duration::from_millis(500), Some(Duration::from_millis(20)));

        let err = backend.embed(vec!["a".to_string()]).await.unwrap_err();
        assert!(matches!(err, BackendError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_expired_requests_are_skipped() {
        let (backend, calls) =
            length_backend(Duration::from_millis(300), Some(Duration::from_millis(100)));

        let results = tokio::join!(
            backend.embed(vec!["a".to_string()]),
            backend.embed(vec!["b".to_string()]),
            backend.embed(vec!["c".to_string()]),
            backend.embed(vec!["d".to_string()]),
        );
        for result in [results.0, results.1, results.2, results.3] {
            assert!(matches!(result, Err(BackendError::Timeout(_))));
        }

        // Let the worker drain its queue
        tokio::time::sleep(Duration::from_millis(500)).await;
        // Only the call already running when the callers gave up reached the provider
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_provider_error_is_forwarded() {
        let backend = Backend::from_backend(Box::new(FailingBackend), None);

        let err = backend.embed(vec!["a".to_string()]).await.unwrap_err();
        assert_eq!(err.to_string(), "model exploded");
        assert!(backend.health().await.is_err());
        assert!(!*backend.health_watcher().borrow());
    }
}
