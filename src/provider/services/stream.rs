//! Fused response streams.

use super::ProviderError;
use crate::cancel::CancellationToken;
use crate::provider::domain::{ModelResponse, ProviderCall, StreamChunk};
use crate::provider::ports::{BackendError, ChunkStream};
use futures::stream::{BoxStream, Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};

/// A finite, non-restartable sequence of chunks.
///
/// The stream ends after the final chunk, after the first error, or once
/// the cancellation token fires (yielding one `Cancelled` error). A backend
/// that stops without a final chunk gets one synthesized, without usage.
pub struct ResponseStream {
    inner: BoxStream<'static, Result<StreamChunk, ProviderError>>,
    call: ProviderCall,
}

struct Cursor {
    source: ChunkStream,
    cancel: CancellationToken,
    call: ProviderCall,
    finished: bool,
}

enum Pulled {
    Cancelled,
    Item(Option<Result<StreamChunk, BackendError>>),
}

impl ResponseStream {
    pub(super) fn new(chunks: ChunkStream, call: ProviderCall, cancel: CancellationToken) -> Self {
        let initial = Cursor {
            source: chunks,
            cancel,
            call: call.clone(),
            finished: false,
        };
        let inner = futures::stream::unfold(initial, |mut cursor| async move {
            if cursor.finished {
                return None;
            }
            let pulled = tokio::select! {
                biased;
                () = cursor.cancel.cancelled() => Pulled::Cancelled,
                item = cursor.source.next() => Pulled::Item(item),
            };
            let emitted = match pulled {
                Pulled::Cancelled => {
                    cursor.finished = true;
                    Err(ProviderError::Cancelled(cursor.call.backend().clone()))
                }
                Pulled::Item(Some(Ok(chunk))) => {
                    cursor.finished = chunk.is_final;
                    Ok(chunk)
                }
                Pulled::Item(Some(Err(source))) => {
                    cursor.finished = true;
                    tracing::warn!(
                        backend = %cursor.call.backend(),
                        error = %source,
                        "model stream interrupted"
                    );
                    Err(ProviderError::Interrupted {
                        call: Box::new(cursor.call.clone()),
                        source,
                    })
                }
                Pulled::Item(None) => {
                    cursor.finished = true;
                    Ok(StreamChunk::last(String::new(), None))
                }
            };
            Some((emitted, cursor))
        })
        .boxed();
        Self { inner, call }
    }

    /// Returns the record of the call that opened the stream.
    #[must_use]
    pub const fn call(&self) -> &ProviderCall {
        &self.call
    }

    /// Drains the stream into a single response.
    ///
    /// # Errors
    ///
    /// Returns the first error the stream yields.
    pub async fn collect_response(mut self) -> Result<ModelResponse, ProviderError> {
        let mut response = ModelResponse::new(self.call.model(), String::new());
        while let Some(item) = self.inner.next().await {
            let chunk = item?;
            response.content.push_str(&chunk.content);
            if chunk.is_final {
                response.finish_reason = chunk.finish_reason;
                response.usage = chunk.usage;
            }
        }
        Ok(response)
    }
}

impl Stream for ResponseStream {
    type Item = Result<StreamChunk, ProviderError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl std::fmt::Debug for ResponseStream {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ResponseStream")
            .field("call", &self.call)
            .finish_non_exhaustive()
    }
}
