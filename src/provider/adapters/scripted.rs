//! Deterministic backend that replays queued replies.
//!
//! Each generation, completion or embedding call pops the next scripted
//! reply. When the script is empty the backend echoes the last user message
//! (or the raw prompt) and embeds texts by their length and word count, so
//! it also works as a stand-in for local wiring.

use crate::provider::domain::{
    BackendId, ChatRole, CompletionRequest, EmbeddingRequest, GenerateRequest, ModelResponse,
    StreamChunk, TokenUsage,
};
use crate::provider::ports::{BackendError, BackendResult, ChunkStream, ModelBackend};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One scripted backend reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedReply {
    /// Answer a complete request.
    Response(ModelResponse),
    /// Answer a streaming request with these items, in order.
    Chunks(Vec<BackendResult<StreamChunk>>),
    /// Answer an embedding request.
    Vectors(Vec<Vec<f32>>),
    /// Fail the call before any output.
    Fail(BackendError),
}

#[derive(Debug, Default)]
struct Script {
    replies: VecDeque<ScriptedReply>,
    models: Vec<String>,
    listing_error: Option<BackendError>,
    calls: u64,
}

/// Scripted, in-memory model backend.
#[derive(Debug, Clone)]
pub struct ScriptedBackend {
    id: BackendId,
    script: Arc<Mutex<Script>>,
}

impl ScriptedBackend {
    /// Creates a backend serving `models`.
    #[must_use]
    pub fn new(id: BackendId, models: impl IntoIterator<Item = String>) -> Self {
        Self {
            id,
            script: Arc::new(Mutex::new(Script {
                models: models.into_iter().collect(),
                ..Script::default()
            })),
        }
    }

    /// Queues a reply.
    pub fn push(&self, reply: ScriptedReply) {
        self.lock().replies.push_back(reply);
    }

    /// Queues `count` copies of a failure.
    pub fn push_failures(&self, error: &BackendError, count: usize) {
        let mut script = self.lock();
        for _ in 0..count {
            script.replies.push_back(ScriptedReply::Fail(error.clone()));
        }
    }

    /// Makes `list_models` fail with `error`, or succeed again with `None`.
    pub fn set_listing_error(&self, error: Option<BackendError>) {
        self.lock().listing_error = error;
    }

    /// Returns how many generation, completion and embedding calls reached
    /// the backend.
    #[must_use]
    pub fn call_count(&self) -> u64 {
        self.lock().calls
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_reply(&self, model: &str) -> BackendResult<Option<ScriptedReply>> {
        let mut script = self.lock();
        script.calls = script.calls.saturating_add(1);
        if !script.models.iter().any(|served| served == model) {
            return Err(BackendError::UnknownModel(model.to_owned()));
        }
        Ok(script.replies.pop_front())
    }

    fn text_reply(
        &self,
        model: &str,
        text: &str,
    ) -> BackendResult<Vec<BackendResult<StreamChunk>>> {
        match self.next_reply(model)? {
            None => Ok(into_chunks(echo(model, text))),
            Some(ScriptedReply::Response(response)) => Ok(into_chunks(response)),
            Some(ScriptedReply::Chunks(items)) => Ok(items),
            Some(ScriptedReply::Fail(error)) => Err(error),
            Some(ScriptedReply::Vectors(_)) => Err(BackendError::Malformed(
                "embedding reply scripted for a text call".to_owned(),
            )),
        }
    }

    fn whole_text(&self, model: &str, text: &str) -> BackendResult<ModelResponse> {
        match self.next_reply(model)? {
            None => Ok(echo(model, text)),
            Some(ScriptedReply::Response(response)) => Ok(response),
            Some(ScriptedReply::Chunks(items)) => concatenate(model, items),
            Some(ScriptedReply::Fail(error)) => Err(error),
            Some(ScriptedReply::Vectors(_)) => Err(BackendError::Malformed(
                "embedding reply scripted for a text call".to_owned(),
            )),
        }
    }
}

fn last_user_message(request: &GenerateRequest) -> &str {
    request
        .messages()
        .iter()
        .rev()
        .find(|message| message.role == ChatRole::User)
        .map_or("", |message| message.content.as_str())
}

fn echo(model: &str, text: &str) -> ModelResponse {
    let prompt_tokens = word_count(text);
    ModelResponse::new(model, text)
        .with_finish_reason("stop")
        .with_usage(TokenUsage::new(prompt_tokens, prompt_tokens))
}

fn shape_vector(text: &str) -> Vec<f32> {
    let measure = |count: usize| f32::from(u16::try_from(count).unwrap_or(u16::MAX));
    vec![
        measure(text.chars().count()),
        measure(text.split_whitespace().count()),
    ]
}

fn word_count(text: &str) -> u32 {
    u32::try_from(text.split_whitespace().count()).unwrap_or(u32::MAX)
}

fn into_chunks(response: ModelResponse) -> Vec<BackendResult<StreamChunk>> {
    let words: Vec<&str> = response.content.split_inclusive(' ').collect();
    let (last, leading) = words.split_last().map_or_else(
        || (String::new(), Vec::new()),
        |(tail, head)| ((*tail).to_owned(), head.to_vec()),
    );
    let mut chunks: Vec<BackendResult<StreamChunk>> = leading
        .into_iter()
        .map(|word| Ok(StreamChunk::delta(word)))
        .collect();
    let mut final_chunk = StreamChunk::last(last, response.usage);
    final_chunk.finish_reason = response.finish_reason;
    chunks.push(Ok(final_chunk));
    chunks
}

fn concatenate(model: &str, items: Vec<BackendResult<StreamChunk>>) -> BackendResult<ModelResponse> {
    let mut response = ModelResponse::new(model, String::new());
    for item in items {
        let chunk = item?;
        response.content.push_str(&chunk.content);
        if chunk.is_final {
            response.finish_reason = chunk.finish_reason;
            response.usage = chunk.usage;
        }
    }
    Ok(response)
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    fn id(&self) -> &BackendId {
        &self.id
    }

    async fn complete(&self, request: &GenerateRequest) -> BackendResult<ModelResponse> {
        self.whole_text(request.model(), last_user_message(request))
    }

    async fn stream(&self, request: &GenerateRequest) -> BackendResult<ChunkStream> {
        let items = self.text_reply(request.model(), last_user_message(request))?;
        Ok(futures::stream::iter(items).boxed())
    }

    async fn complete_prompt(&self, request: &CompletionRequest) -> BackendResult<ModelResponse> {
        self.whole_text(request.model(), request.prompt())
    }

    async fn stream_prompt(&self, request: &CompletionRequest) -> BackendResult<ChunkStream> {
        let items = self.text_reply(request.model(), request.prompt())?;
        Ok(futures::stream::iter(items).boxed())
    }

    async fn embed(&self, request: &EmbeddingRequest) -> BackendResult<Vec<Vec<f32>>> {
        match self.next_reply(request.model())? {
            None => Ok(request.texts().iter().map(|text| shape_vector(text)).collect()),
            Some(ScriptedReply::Vectors(vectors)) => Ok(vectors),
            Some(ScriptedReply::Fail(error)) => Err(error),
            Some(ScriptedReply::Response(_) | ScriptedReply::Chunks(_)) => Err(
                BackendError::Malformed("text reply scripted for an embedding call".to_owned()),
            ),
        }
    }

    async fn list_models(&self) -> BackendResult<Vec<String>> {
        let script = self.lock();
        script
            .listing_error
            .clone()
            .map_or_else(|| Ok(script.models.clone()), Err)
    }
}
