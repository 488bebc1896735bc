//! Gateway tests covering retry classification, streaming, and fallback.

use std::sync::Arc;
use std::time::Duration;

use crate::cancel::CancellationToken;
use crate::config::ProviderSettings;
use crate::error::{Classify, ErrorClass};
use crate::provider::adapters::scripted::{ScriptedBackend, ScriptedReply};
use crate::provider::domain::{
    BackendId, CallOutcome, CompletionRequest, EmbeddingRequest, GenerateRequest, ModelResponse,
    StreamChunk, TokenUsage,
};
use crate::provider::ports::BackendError;
use crate::provider::services::{Generation, ModelGateway, ProviderError};
use crate::retry::{NoJitter, RecordingSleeper};
use futures::StreamExt;
use rstest::{fixture, rstest};

const MODEL: &str = "llama3";

struct Harness {
    gateway: ModelGateway,
    sleeper: RecordingSleeper,
    local: ScriptedBackend,
}

fn backend_id(value: &str) -> BackendId {
    BackendId::new(value).expect("backend id is valid")
}

fn scripted(id: &str) -> ScriptedBackend {
    ScriptedBackend::new(backend_id(id), [MODEL.to_owned()])
}

fn build_harness(settings: &ProviderSettings) -> Harness {
    let sleeper = RecordingSleeper::new();
    let gateway = ModelGateway::new(settings)
        .expect("settings are valid")
        .with_jitter(Arc::new(NoJitter))
        .with_sleeper(Arc::new(sleeper.clone()));
    let local = scripted("local");
    gateway
        .register(Arc::new(local.clone()))
        .expect("registration should succeed");
    Harness {
        gateway,
        sleeper,
        local,
    }
}

#[fixture]
fn harness() -> Harness {
    build_harness(&ProviderSettings::default())
}

fn request() -> GenerateRequest {
    GenerateRequest::prompt(MODEL, "tell me about rust").expect("request is valid")
}

fn complete(generation: Generation) -> ModelResponse {
    match generation {
        Generation::Complete { response, .. } => response,
        Generation::Streaming(_) => panic!("expected a complete response"),
    }
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn complete_request_returns_whole_response(harness: Harness) {
    let generation = harness
        .gateway
        .generate(&backend_id("local"), &request(), &CancellationToken::new())
        .await
        .expect("generation should succeed");

    assert_eq!(generation.call().attempts(), 1);
    assert_eq!(generation.call().outcome(), Some(CallOutcome::Success));
    let response = complete(generation);
    assert_eq!(response.content, "tell me about rust");
    assert_eq!(response.usage, Some(TokenUsage::new(4, 4)));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn transient_failures_are_retried_with_backoff(harness: Harness) {
    harness
        .local
        .push_failures(&BackendError::Unreachable("refused".to_owned()), 2);

    let generation = harness
        .gateway
        .generate(&backend_id("local"), &request(), &CancellationToken::new())
        .await
        .expect("third attempt should succeed");

    assert_eq!(generation.call().attempts(), 3);
    assert_eq!(harness.local.call_count(), 3);
    assert_eq!(
        harness.sleeper.delays(),
        vec![Duration::from_millis(200), Duration::from_millis(400)]
    );
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn exhausted_retries_surface_as_unavailable(harness: Harness) {
    harness
        .local
        .push_failures(&BackendError::Timeout("30s".to_owned()), 3);

    let err = harness
        .gateway
        .generate(&backend_id("local"), &request(), &CancellationToken::new())
        .await
        .expect_err("every attempt times out");

    match &err {
        ProviderError::RetriesExhausted { call, source } => {
            assert_eq!(call.attempts(), 3);
            assert_eq!(call.outcome(), Some(CallOutcome::RetryableError));
            assert!(source.is_transient());
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.class(), ErrorClass::Unavailable);
    assert_eq!(err.entity_id().as_deref(), Some("local"));
    assert_eq!(harness.local.call_count(), 3);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn non_transient_failure_is_not_retried(harness: Harness) {
    let unknown = GenerateRequest::prompt("gpt-9", "hi").expect("request is valid");

    let err = harness
        .gateway
        .generate(&backend_id("local"), &unknown, &CancellationToken::new())
        .await
        .expect_err("model is not served");

    assert!(matches!(
        err,
        ProviderError::Rejected {
            source: BackendError::UnknownModel(_),
            ..
        }
    ));
    assert_eq!(err.class(), ErrorClass::Fatal);
    assert_eq!(harness.local.call_count(), 1);
    assert!(harness.sleeper.delays().is_empty());
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn stream_ends_with_final_chunk_carrying_usage(harness: Harness) {
    harness.local.push(ScriptedReply::Chunks(vec![
        Ok(StreamChunk::delta("Rust ")),
        Ok(StreamChunk::delta("is ")),
        Ok(StreamChunk::last("fast", Some(TokenUsage::new(4, 3)))),
        Ok(StreamChunk::delta("never seen")),
    ]));

    let generation = harness
        .gateway
        .generate(
            &backend_id("local"),
            &request().streaming(true),
            &CancellationToken::new(),
        )
        .await
        .expect("stream should open");
    let Generation::Streaming(stream) = generation else {
        panic!("expected a stream");
    };
    let chunks: Vec<StreamChunk> = stream
        .map(|item| item.expect("chunk should be ok"))
        .collect()
        .await;

    assert_eq!(chunks.len(), 3);
    let last = chunks.last().expect("final chunk");
    assert!(last.is_final);
    assert_eq!(last.usage, Some(TokenUsage::new(4, 3)));
    assert!(chunks.iter().take(2).all(|chunk| !chunk.is_final));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn missing_final_chunk_is_synthesized(harness: Harness) {
    harness.local.push(ScriptedReply::Chunks(vec![
        Ok(StreamChunk::delta("partial ")),
        Ok(StreamChunk::delta("answer")),
    ]));

    let generation = harness
        .gateway
        .generate(
            &backend_id("local"),
            &request().streaming(true),
            &CancellationToken::new(),
        )
        .await
        .expect("stream should open");
    let response = generation
        .into_response()
        .await
        .expect("stream should drain");

    assert_eq!(response.content, "partial answer");
    assert_eq!(response.usage, None);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn stream_stops_after_first_error(harness: Harness) {
    harness.local.push(ScriptedReply::Chunks(vec![
        Ok(StreamChunk::delta("one ")),
        Err(BackendError::Server {
            status: 502,
            message: "upstream reset".to_owned(),
        }),
        Ok(StreamChunk::delta("two")),
    ]));

    let generation = harness
        .gateway
        .generate(
            &backend_id("local"),
            &request().streaming(true),
            &CancellationToken::new(),
        )
        .await
        .expect("stream should open");
    let Generation::Streaming(mut stream) = generation else {
        panic!("expected a stream");
    };

    assert!(matches!(stream.next().await, Some(Ok(_))));
    let failure = stream.next().await.expect("error item");
    let err = failure.expect_err("second item is the interruption");
    assert!(matches!(err, ProviderError::Interrupted { .. }));
    assert_eq!(err.class(), ErrorClass::Unavailable);
    assert!(stream.next().await.is_none());
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn cancelled_stream_yields_cancellation_then_ends(harness: Harness) {
    let token = CancellationToken::new();
    let generation = harness
        .gateway
        .generate(&backend_id("local"), &request().streaming(true), &token)
        .await
        .expect("stream should open");
    let Generation::Streaming(mut stream) = generation else {
        panic!("expected a stream");
    };
    token.cancel();

    let first = stream.next().await.expect("cancellation item");
    assert!(matches!(first, Err(ProviderError::Cancelled(_))));
    assert!(stream.next().await.is_none());
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn cancelled_caller_never_reaches_backend(harness: Harness) {
    let token = CancellationToken::new();
    token.cancel();

    let err = harness
        .gateway
        .generate(&backend_id("local"), &request(), &token)
        .await
        .expect_err("call is cancelled");

    assert_eq!(err.class(), ErrorClass::Cancelled);
    assert_eq!(harness.local.call_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn fallback_moves_to_next_backend_in_order() {
    let settings = ProviderSettings {
        fallback_order: vec!["local".to_owned(), "remote".to_owned()],
        ..ProviderSettings::default()
    };
    let harness = build_harness(&settings);
    let remote = scripted("remote");
    harness
        .gateway
        .register(Arc::new(remote.clone()))
        .expect("registration should succeed");
    harness
        .local
        .push(ScriptedReply::Fail(BackendError::InvalidRequest("too long".to_owned())));

    let generation = harness
        .gateway
        .generate_with_fallback(&request(), &CancellationToken::new())
        .await
        .expect("remote should answer");

    assert_eq!(generation.call().backend(), &backend_id("remote"));
    assert_eq!(harness.local.call_count(), 1);
    assert_eq!(remote.call_count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn fallback_reports_every_failure_when_exhausted() {
    let settings = ProviderSettings {
        fallback_order: vec!["local".to_owned(), "missing".to_owned()],
        ..ProviderSettings::default()
    };
    let harness = build_harness(&settings);
    harness
        .local
        .push_failures(&BackendError::RateLimited("busy".to_owned()), 3);

    let err = harness
        .gateway
        .generate_with_fallback(&request(), &CancellationToken::new())
        .await
        .expect_err("no backend can answer");

    match &err {
        ProviderError::FallbackExhausted { failures } => {
            assert_eq!(failures.len(), 2);
            assert!(matches!(
                failures.last(),
                Some(ProviderError::UnknownBackend(_))
            ));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.class(), ErrorClass::Unavailable);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn fallback_requires_configured_order(harness: Harness) {
    let err = harness
        .gateway
        .generate_with_fallback(&request(), &CancellationToken::new())
        .await
        .expect_err("no order configured");

    assert!(matches!(err, ProviderError::NoFallbackConfigured));
    assert_eq!(err.class(), ErrorClass::Validation);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn model_availability_tolerates_listing_failures(harness: Harness) {
    let local = backend_id("local");
    assert!(
        harness
            .gateway
            .is_model_available(&local, MODEL)
            .await
            .expect("query should succeed")
    );
    assert!(
        !harness
            .gateway
            .is_model_available(&local, "gpt-9")
            .await
            .expect("query should succeed")
    );

    harness
        .local
        .set_listing_error(Some(BackendError::Unreachable("down".to_owned())));
    assert!(
        !harness
            .gateway
            .is_model_available(&local, MODEL)
            .await
            .expect("listing failures read as unavailable")
    );
    assert!(matches!(
        harness
            .gateway
            .is_model_available(&backend_id("ghost"), MODEL)
            .await,
        Err(ProviderError::UnknownBackend(_))
    ));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn health_reports_each_backend(harness: Harness) {
    let remote = scripted("remote");
    remote.set_listing_error(Some(BackendError::Unreachable("down".to_owned())));
    harness
        .gateway
        .register(Arc::new(remote))
        .expect("registration should succeed");

    let report = harness.gateway.health().await.expect("health");

    let summary: Vec<(String, bool)> = report
        .iter()
        .map(|health| (health.backend.to_string(), health.healthy))
        .collect();
    assert_eq!(
        summary,
        vec![("local".to_owned(), true), ("remote".to_owned(), false)]
    );
}

#[rstest]
fn duplicate_backend_is_a_conflict(harness: Harness) {
    let err = harness
        .gateway
        .register(Arc::new(scripted("local")))
        .expect_err("id is taken");

    assert!(matches!(err, ProviderError::DuplicateBackend(_)));
    assert_eq!(err.class(), ErrorClass::Conflict);
}

// ── Prompt completion ──────────────────────────────────────────────

fn completion() -> CompletionRequest {
    CompletionRequest::new(MODEL, "fn main() {").expect("request is valid")
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn prompt_completion_returns_whole_text(harness: Harness) {
    let warming = BackendError::Server {
        status: 503,
        message: "warming".to_owned(),
    };
    harness.local.push_failures(&warming, 1);

    let generation = harness
        .gateway
        .generate_completion(&backend_id("local"), &completion(), &CancellationToken::new())
        .await
        .expect("second attempt should succeed");

    assert_eq!(generation.call().attempts(), 2);
    assert!(!generation.call().streaming());
    assert_eq!(complete(generation).content, "fn main() {");
    assert_eq!(harness.sleeper.delays(), vec![Duration::from_millis(200)]);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn streamed_prompt_completion_ends_with_final_chunk(harness: Harness) {
    harness.local.push(ScriptedReply::Chunks(vec![
        Ok(StreamChunk::delta("println!")),
        Ok(StreamChunk::last("();", Some(TokenUsage::new(3, 2)))),
    ]));
    let request = completion().streaming(true);

    let generation = harness
        .gateway
        .generate_completion(&backend_id("local"), &request, &CancellationToken::new())
        .await
        .expect("stream should open");

    let Generation::Streaming(stream) = generation else {
        panic!("expected a stream");
    };
    assert!(stream.call().streaming());
    let chunks: Vec<StreamChunk> = stream
        .map(|item| item.expect("chunk should be ok"))
        .collect()
        .await;
    assert_eq!(chunks.len(), 2);
    assert!(chunks.last().is_some_and(|chunk| chunk.is_final));
    assert_eq!(
        chunks.last().and_then(|chunk| chunk.usage),
        Some(TokenUsage::new(3, 2))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn prompt_completion_falls_back_on_rejection() {
    let settings = ProviderSettings {
        fallback_order: vec!["local".to_owned(), "remote".to_owned()],
        ..ProviderSettings::default()
    };
    let harness = build_harness(&settings);
    let remote = scripted("remote");
    harness
        .gateway
        .register(Arc::new(remote.clone()))
        .expect("registration should succeed");
    harness
        .local
        .push(ScriptedReply::Fail(BackendError::InvalidRequest("bad prompt".to_owned())));

    let generation = harness
        .gateway
        .generate_completion_with_fallback(&completion(), &CancellationToken::new())
        .await
        .expect("remote should answer");

    assert_eq!(generation.call().backend(), &backend_id("remote"));
    assert_eq!(harness.local.call_count(), 1);
}

#[rstest]
fn blank_prompt_is_rejected() {
    assert!(CompletionRequest::new(MODEL, "").is_err());
    assert!(CompletionRequest::new("  ", "hello").is_err());
}

// ── Embeddings ─────────────────────────────────────────────────────

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn embedding_returns_one_vector_per_text(harness: Harness) {
    let request = EmbeddingRequest::new(MODEL, ["ownership", "borrow checker"])
        .expect("request is valid");

    let embedded = harness
        .gateway
        .embed(&backend_id("local"), &request, &CancellationToken::new())
        .await
        .expect("embedding should succeed");

    assert_eq!(embedded.embeddings.model, MODEL);
    assert_eq!(
        embedded.embeddings.vectors,
        vec![vec![9.0, 1.0], vec![14.0, 2.0]]
    );
    assert_eq!(embedded.call.outcome(), Some(CallOutcome::Success));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn embedding_retries_transient_failures(harness: Harness) {
    harness
        .local
        .push_failures(&BackendError::RateLimited("slow down".to_owned()), 2);
    let request = EmbeddingRequest::new(MODEL, ["text"]).expect("request is valid");

    let embedded = harness
        .gateway
        .embed(&backend_id("local"), &request, &CancellationToken::new())
        .await
        .expect("third attempt should succeed");

    assert_eq!(embedded.call.attempts(), 3);
    assert_eq!(harness.sleeper.delays().len(), 2);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn embedding_with_wrong_vector_count_is_fatal(harness: Harness) {
    harness.local.push(ScriptedReply::Vectors(vec![vec![0.5]]));
    let request = EmbeddingRequest::new(MODEL, ["one", "two"]).expect("request is valid");

    let err = harness
        .gateway
        .embed(&backend_id("local"), &request, &CancellationToken::new())
        .await
        .expect_err("vector count does not match");

    match &err {
        ProviderError::Rejected { call, source } => {
            assert_eq!(call.outcome(), Some(CallOutcome::FatalError));
            assert!(matches!(source, BackendError::Malformed(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.class(), ErrorClass::Fatal);
    assert_eq!(harness.local.call_count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn embedding_falls_back_when_retries_run_out() {
    let settings = ProviderSettings {
        fallback_order: vec!["local".to_owned(), "remote".to_owned()],
        ..ProviderSettings::default()
    };
    let harness = build_harness(&settings);
    let remote = scripted("remote");
    harness
        .gateway
        .register(Arc::new(remote.clone()))
        .expect("registration should succeed");
    harness
        .local
        .push_failures(&BackendError::Unreachable("refused".to_owned()), 3);
    let request = EmbeddingRequest::new(MODEL, ["text"]).expect("request is valid");

    let embedded = harness
        .gateway
        .embed_with_fallback(&request, &CancellationToken::new())
        .await
        .expect("remote should answer");

    assert_eq!(embedded.call.backend(), &backend_id("remote"));
    assert_eq!(harness.local.call_count(), 3);
    assert_eq!(remote.call_count(), 1);
}

#[rstest]
fn empty_embedding_request_is_rejected() {
    let texts: [&str; 0] = [];
    assert!(EmbeddingRequest::new(MODEL, texts).is_err());
}
