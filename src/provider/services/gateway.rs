//! Backend registry, retry policy, and fallback for chat generation,
//! prompt completion and embedding.

use super::ResponseStream;
use crate::cancel::{self, CancellationToken};
use crate::config::ProviderSettings;
use crate::error::{Classify, ErrorClass};
use crate::provider::domain::{
    BackendId, CallOutcome, CompletionRequest, EmbeddingRequest, Embeddings, GenerateRequest,
    ModelResponse, ProviderCall, ProviderDomainError,
};
use crate::provider::ports::{BackendError, BackendHealth, ChunkStream, ModelBackend};
use crate::retry::{BackoffPolicy, FullJitter, JitterSource, Sleeper, TokioSleeper};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Service-level errors for provider calls.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Request validation failed.
    #[error(transparent)]
    Domain(#[from] ProviderDomainError),

    /// No backend is registered under the identifier.
    #[error("unknown model backend: {0}")]
    UnknownBackend(BackendId),

    /// A backend is already registered under the identifier.
    #[error("model backend {0} is already registered")]
    DuplicateBackend(BackendId),

    /// Transient failures persisted past the retry ceiling.
    #[error("backend {} still failing after {} attempts: {source}", call.backend(), call.attempts())]
    RetriesExhausted {
        /// Diagnostic record of the call.
        call: Box<ProviderCall>,
        /// Last failure.
        source: BackendError,
    },

    /// The backend rejected the request; retrying unchanged will not help.
    #[error("backend {} rejected the request: {source}", call.backend())]
    Rejected {
        /// Diagnostic record of the call.
        call: Box<ProviderCall>,
        /// Backend failure.
        source: BackendError,
    },

    /// An open stream failed part-way.
    #[error("stream from backend {} interrupted: {source}", call.backend())]
    Interrupted {
        /// Diagnostic record of the call.
        call: Box<ProviderCall>,
        /// Backend failure.
        source: BackendError,
    },

    /// A non-generation backend query failed.
    #[error("backend {backend} query failed: {source}")]
    Query {
        /// Backend queried.
        backend: BackendId,
        /// Backend failure.
        source: BackendError,
    },

    /// Every backend in the fallback order failed.
    #[error("all {} fallback backends failed", failures.len())]
    FallbackExhausted {
        /// Failures in the order the backends were tried.
        failures: Vec<ProviderError>,
    },

    /// Fallback generation was requested without a fallback order.
    #[error("no fallback order configured")]
    NoFallbackConfigured,

    /// The caller cancelled before a result was available.
    #[error("call to backend {0} cancelled")]
    Cancelled(BackendId),

    /// Internal state lock was poisoned.
    #[error("provider registry lock poisoned")]
    LockPoisoned,
}

impl Classify for ProviderError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Domain(_)
            | Self::UnknownBackend(_)
            | Self::NoFallbackConfigured => ErrorClass::Validation,
            Self::DuplicateBackend(_) => ErrorClass::Conflict,
            Self::RetriesExhausted { .. } => ErrorClass::Unavailable,
            Self::Rejected { .. } => ErrorClass::Fatal,
            Self::Interrupted { source, .. } | Self::Query { source, .. } => {
                if source.is_transient() {
                    ErrorClass::Unavailable
                } else {
                    ErrorClass::Fatal
                }
            }
            Self::FallbackExhausted { failures } => {
                if failures.iter().any(|failure| failure.class().is_retryable()) {
                    ErrorClass::Unavailable
                } else {
                    ErrorClass::Fatal
                }
            }
            Self::Cancelled(_) => ErrorClass::Cancelled,
            Self::LockPoisoned => ErrorClass::Internal,
        }
    }

    fn entity_id(&self) -> Option<String> {
        match self {
            Self::UnknownBackend(backend)
            | Self::DuplicateBackend(backend)
            | Self::Cancelled(backend)
            | Self::Query { backend, .. } => Some(backend.to_string()),
            Self::RetriesExhausted { call, .. }
            | Self::Rejected { call, .. }
            | Self::Interrupted { call, .. } => Some(call.backend().to_string()),
            Self::FallbackExhausted { failures } => {
                failures.last().and_then(Classify::entity_id)
            }
            Self::Domain(_) | Self::NoFallbackConfigured | Self::LockPoisoned => None,
        }
    }
}

/// Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// What a generation produced.
#[derive(Debug)]
pub enum Generation {
    /// The whole response at once.
    Complete {
        /// Generated response.
        response: ModelResponse,
        /// Diagnostic record of the call.
        call: ProviderCall,
    },
    /// A lazy chunk sequence.
    Streaming(ResponseStream),
}

impl Generation {
    /// Returns the record of the call.
    #[must_use]
    pub const fn call(&self) -> &ProviderCall {
        match self {
            Self::Complete { call, .. } => call,
            Self::Streaming(stream) => stream.call(),
        }
    }

    /// Resolves to a complete response, draining a stream if necessary.
    ///
    /// # Errors
    ///
    /// Returns the first error a stream yields.
    pub async fn into_response(self) -> ProviderResult<ModelResponse> {
        match self {
            Self::Complete { response, .. } => Ok(response),
            Self::Streaming(stream) => stream.collect_response().await,
        }
    }
}

/// Embedding vectors with the record of the call that produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedded {
    /// Vectors, index-aligned with the request's texts.
    pub embeddings: Embeddings,
    /// Diagnostic record of the call.
    pub call: ProviderCall,
}

enum Opened {
    Complete(ModelResponse),
    Stream(ChunkStream),
}

impl Opened {
    fn into_generation(self, call: ProviderCall, cancel: &CancellationToken) -> Generation {
        match self {
            Self::Complete(response) => Generation::Complete { response, call },
            Self::Stream(chunks) => {
                Generation::Streaming(ResponseStream::new(chunks, call, cancel.clone()))
            }
        }
    }
}

async fn open(
    backend: &dyn ModelBackend,
    request: &GenerateRequest,
) -> Result<Opened, BackendError> {
    if request.is_streaming() {
        backend.stream(request).await.map(Opened::Stream)
    } else {
        backend.complete(request).await.map(Opened::Complete)
    }
}

async fn open_prompt(
    backend: &dyn ModelBackend,
    request: &CompletionRequest,
) -> Result<Opened, BackendError> {
    if request.is_streaming() {
        backend.stream_prompt(request).await.map(Opened::Stream)
    } else {
        backend.complete_prompt(request).await.map(Opened::Complete)
    }
}

/// Registry of model backends with retry and fallback.
pub struct ModelGateway {
    backends: RwLock<HashMap<BackendId, Arc<dyn ModelBackend>>>,
    fallback_order: Vec<BackendId>,
    max_attempts: u32,
    backoff: BackoffPolicy,
    jitter: Arc<dyn JitterSource>,
    sleeper: Arc<dyn Sleeper>,
}

impl ModelGateway {
    /// Creates an empty gateway.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Domain`] when the fallback order names a
    /// blank backend.
    pub fn new(settings: &ProviderSettings) -> ProviderResult<Self> {
        let fallback_order = settings
            .fallback_order
            .iter()
            .map(|id| BackendId::new(id.as_str()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            backends: RwLock::new(HashMap::new()),
            fallback_order,
            max_attempts: settings.retry.max_attempts.max(1),
            backoff: settings.retry.backoff.policy(),
            jitter: Arc::new(FullJitter),
            sleeper: Arc::new(TokioSleeper),
        })
    }

    /// Replaces the jitter source used between retries.
    #[must_use]
    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    /// Replaces the sleeper used between retries.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Registers a backend under its own identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::DuplicateBackend`] when the identifier is
    /// taken.
    pub fn register(&self, backend: Arc<dyn ModelBackend>) -> ProviderResult<()> {
        let backend_id = backend.id().clone();
        let mut backends = self
            .backends
            .write()
            .map_err(|_| ProviderError::LockPoisoned)?;
        if backends.contains_key(&backend_id) {
            return Err(ProviderError::DuplicateBackend(backend_id));
        }
        tracing::info!(backend = %backend_id, "model backend registered");
        backends.insert(backend_id, backend);
        Ok(())
    }

    /// Returns registered backend identifiers in sorted order.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::LockPoisoned`] when the registry lock is
    /// poisoned.
    pub fn backends(&self) -> ProviderResult<Vec<BackendId>> {
        let mut ids: Vec<BackendId> = self
            .backends
            .read()
            .map_err(|_| ProviderError::LockPoisoned)?
            .keys()
            .cloned()
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Generates with one backend, retrying transient failures.
    ///
    /// Streaming requests are retried only until the stream opens; failures
    /// after that arrive on the stream.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::RetriesExhausted`] when transient failures
    /// outlast the ceiling, [`ProviderError::Rejected`] on the first
    /// non-transient failure, and [`ProviderError::Cancelled`] when `cancel`
    /// fires.
    pub async fn generate(
        &self,
        backend_id: &BackendId,
        request: &GenerateRequest,
        cancel: &CancellationToken,
    ) -> ProviderResult<Generation> {
        let backend = self.backend(backend_id)?;
        let call = ProviderCall::new(backend_id.clone(), request);
        let (opened, finished) = self
            .retrying(call, cancel, || open(backend.as_ref(), request))
            .await?;
        Ok(opened.into_generation(finished, cancel))
    }

    /// Continues a raw prompt with one backend, retrying like
    /// [`Self::generate`].
    ///
    /// # Errors
    ///
    /// Same as [`Self::generate`].
    pub async fn generate_completion(
        &self,
        backend_id: &BackendId,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> ProviderResult<Generation> {
        let backend = self.backend(backend_id)?;
        let call = ProviderCall::for_completion(backend_id.clone(), request);
        let (opened, finished) = self
            .retrying(call, cancel, || open_prompt(backend.as_ref(), request))
            .await?;
        Ok(opened.into_generation(finished, cancel))
    }

    /// Embeds texts with one backend, retrying like [`Self::generate`].
    ///
    /// # Errors
    ///
    /// Same as [`Self::generate`]. A backend that returns a different
    /// number of vectors than texts is reported as
    /// [`ProviderError::Rejected`].
    pub async fn embed(
        &self,
        backend_id: &BackendId,
        request: &EmbeddingRequest,
        cancel: &CancellationToken,
    ) -> ProviderResult<Embedded> {
        let backend = self.backend(backend_id)?;
        let call = ProviderCall::for_embedding(backend_id.clone(), request);
        let (vectors, mut finished) = self
            .retrying(call, cancel, || backend.embed(request))
            .await?;
        if vectors.len() != request.texts().len() {
            finished.finish(CallOutcome::FatalError);
            return Err(ProviderError::Rejected {
                call: Box::new(finished),
                source: BackendError::Malformed(format!(
                    "expected {} vectors, got {}",
                    request.texts().len(),
                    vectors.len()
                )),
            });
        }
        Ok(Embedded {
            embeddings: Embeddings {
                model: request.model().to_owned(),
                vectors,
            },
            call: finished,
        })
    }

    /// Tries each backend of the fallback order until one succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::NoFallbackConfigured`] when the order is
    /// empty, [`ProviderError::Cancelled`] when `cancel` fires, and
    /// [`ProviderError::FallbackExhausted`] with every failure otherwise.
    pub async fn generate_with_fallback(
        &self,
        request: &GenerateRequest,
        cancel: &CancellationToken,
    ) -> ProviderResult<Generation> {
        self.across_fallback(|backend_id| self.generate(backend_id, request, cancel))
            .await
    }

    /// Prompt completion across the fallback order.
    ///
    /// # Errors
    ///
    /// Same as [`Self::generate_with_fallback`].
    pub async fn generate_completion_with_fallback(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> ProviderResult<Generation> {
        self.across_fallback(|backend_id| self.generate_completion(backend_id, request, cancel))
            .await
    }

    /// Embedding across the fallback order.
    ///
    /// # Errors
    ///
    /// Same as [`Self::generate_with_fallback`].
    pub async fn embed_with_fallback(
        &self,
        request: &EmbeddingRequest,
        cancel: &CancellationToken,
    ) -> ProviderResult<Embedded> {
        self.across_fallback(|backend_id| self.embed(backend_id, request, cancel))
            .await
    }

    async fn across_fallback<'a, T, F, Fut>(&'a self, mut attempt: F) -> ProviderResult<T>
    where
        F: FnMut(&'a BackendId) -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        if self.fallback_order.is_empty() {
            return Err(ProviderError::NoFallbackConfigured);
        }

        let mut failures = Vec::new();
        for backend_id in &self.fallback_order {
            match attempt(backend_id).await {
                Ok(value) => return Ok(value),
                Err(err @ ProviderError::Cancelled(_)) => return Err(err),
                Err(err) => {
                    tracing::info!(backend = %backend_id, error = %err, "falling back to next backend");
                    failures.push(err);
                }
            }
        }
        Err(ProviderError::FallbackExhausted { failures })
    }

    async fn retrying<T, F, Fut>(
        &self,
        mut call: ProviderCall,
        cancel: &CancellationToken,
        mut attempt: F,
    ) -> ProviderResult<(T, ProviderCall)>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        loop {
            call.record_attempt();
            let Ok(outcome) = cancel::guard(cancel, attempt()).await else {
                return Err(ProviderError::Cancelled(call.backend().clone()));
            };

            match outcome {
                Ok(value) => {
                    call.finish(CallOutcome::Success);
                    tracing::debug!(
                        backend = %call.backend(),
                        model = call.model(),
                        attempts = call.attempts(),
                        streaming = call.streaming(),
                        "model call succeeded"
                    );
                    return Ok((value, call));
                }
                Err(source) if source.is_transient() && call.attempts() < self.max_attempts => {
                    let delay = self
                        .backoff
                        .delay(call.attempts().saturating_sub(1), self.jitter.as_ref());
                    tracing::warn!(
                        backend = %call.backend(),
                        attempt = call.attempts(),
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %source,
                        "transient model backend failure; retrying"
                    );
                    if cancel::guard(cancel, self.sleeper.sleep(delay)).await.is_err() {
                        return Err(ProviderError::Cancelled(call.backend().clone()));
                    }
                }
                Err(source) if source.is_transient() => {
                    call.finish(CallOutcome::RetryableError);
                    tracing::warn!(
                        backend = %call.backend(),
                        attempts = call.attempts(),
                        error = %source,
                        "model backend retries exhausted"
                    );
                    return Err(ProviderError::RetriesExhausted {
                        call: Box::new(call),
                        source,
                    });
                }
                Err(source) => {
                    call.finish(CallOutcome::FatalError);
                    tracing::warn!(
                        backend = %call.backend(),
                        error = %source,
                        "model backend rejected request"
                    );
                    return Err(ProviderError::Rejected {
                        call: Box::new(call),
                        source,
                    });
                }
            }
        }
    }

    /// Lists the models a backend serves.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::UnknownBackend`] or [`ProviderError::Query`].
    pub async fn list_models(&self, backend_id: &BackendId) -> ProviderResult<Vec<String>> {
        let backend = self.backend(backend_id)?;
        backend
            .list_models()
            .await
            .map_err(|source| ProviderError::Query {
                backend: backend_id.clone(),
                source,
            })
    }

    /// Returns whether a backend serves `model`. A backend that cannot list
    /// its models is treated as not serving it.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::UnknownBackend`] when the backend is absent.
    pub async fn is_model_available(
        &self,
        backend_id: &BackendId,
        model: &str,
    ) -> ProviderResult<bool> {
        match self.list_models(backend_id).await {
            Ok(models) => Ok(models.iter().any(|served| served == model)),
            Err(ProviderError::Query { source, .. }) => {
                tracing::debug!(backend = %backend_id, error = %source, "model listing failed");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Checks every registered backend.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::LockPoisoned`] when the registry lock is
    /// poisoned.
    pub async fn health(&self) -> ProviderResult<Vec<BackendHealth>> {
        let mut backends: Vec<Arc<dyn ModelBackend>> = self
            .backends
            .read()
            .map_err(|_| ProviderError::LockPoisoned)?
            .values()
            .cloned()
            .collect();
        backends.sort_by(|left, right| left.id().cmp(right.id()));
        Ok(futures::future::join_all(backends.iter().map(|backend| backend.health())).await)
    }

    fn backend(&self, backend_id: &BackendId) -> ProviderResult<Arc<dyn ModelBackend>> {
        self.backends
            .read()
            .map_err(|_| ProviderError::LockPoisoned)?
            .get(backend_id)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownBackend(backend_id.clone()))
    }
}
