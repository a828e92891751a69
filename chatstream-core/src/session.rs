//! Request lifecycle for one conversation.
//!
//! A [`ChatSession`] owns the message list and allows at most one streamed request at a time.
//! Each `submit` builds a fresh decoder, accumulator and cancellation token; the single control
//! loop below applies decoded deltas to the loading tail in order and publishes one snapshot per
//! applied frame. Every terminal path (end of stream, sentinel, transport error, abort, or the
//! `submit` future being dropped) finalizes the tail.

use std::iter;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::field::Empty;
use tracing_futures::Instrument;

use crate::accumulator::DeltaAccumulator;
use crate::config::Config;
use crate::decoder::FrameDecoder;
use crate::error::{ChatStreamError, CoreResult};
use crate::messages::{MessageList, Snapshot};
use crate::model::{now_ms, ChatMessage, CompletionParams, CompletionRequest, MessageInput};
use crate::normalizer::{format_response_time, normalize_entries};
use crate::providers::openai::OpenAi;
use crate::telemetry::{self, CompletionLog, Outcome, TelemetrySink};
use crate::transport::CompletionTransport;

/// What `submit` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A response was still streaming; nothing changed.
    Ignored,
    /// Empty submission: the list was cleared.
    Reset,
    /// The stream ended (sentinel or end of body) and the reply was finalized.
    Completed,
    /// The request was cancelled; partial content was kept and finalized.
    Aborted,
}

enum StreamEnd {
    Completed,
    Aborted,
    Failed(ChatStreamError),
}

struct State {
    list: MessageList,
    cancel: Option<CancellationToken>,
    /// Identifies the request allowed to touch the tail. Bumped on every submit and reset.
    generation: u64,
}

struct Inner {
    transport: Arc<dyn CompletionTransport>,
    model: String,
    params: CompletionParams,
    telemetry: Option<Arc<dyn TelemetrySink>>,
    state: Mutex<State>,
}

/// Cloneable handle; clones share the same conversation.
#[derive(Clone)]
pub struct ChatSession {
    inner: Arc<Inner>,
}

pub struct ChatSessionBuilder {
    transport: Arc<dyn CompletionTransport>,
    model: String,
    params: CompletionParams,
    telemetry: Option<Arc<dyn TelemetrySink>>,
    initial: Vec<MessageInput>,
}

impl ChatSessionBuilder {
    pub fn params(mut self, params: CompletionParams) -> Self {
        self.params = params;
        self
    }

    pub fn telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(sink);
        self
    }

    /// Seed the conversation, e.g. with a restored transcript.
    pub fn messages(mut self, initial: Vec<MessageInput>) -> Self {
        self.initial = initial;
        self
    }

    pub fn build(self) -> ChatSession {
        let mut list = MessageList::new();
        if !self.initial.is_empty() {
            list.replace(normalize_entries(self.initial, now_ms()));
        }
        ChatSession {
            inner: Arc::new(Inner {
                transport: self.transport,
                model: self.model,
                params: self.params,
                telemetry: self.telemetry,
                state: Mutex::new(State {
                    list,
                    cancel: None,
                    generation: 0,
                }),
            }),
        }
    }
}

impl ChatSession {
    pub fn builder(
        transport: Arc<dyn CompletionTransport>,
        model: impl Into<String>,
    ) -> ChatSessionBuilder {
        ChatSessionBuilder {
            transport,
            model: model.into(),
            params: CompletionParams::default(),
            telemetry: None,
            initial: Vec::new(),
        }
    }

    /// Session against the configured OpenAI-compatible endpoint.
    pub fn from_config(cfg: &Config) -> CoreResult<Self> {
        cfg.validate()?;
        let transport = Arc::new(OpenAi::from_config(cfg)?);
        Ok(Self::builder(transport, cfg.model.clone())
            .params(cfg.params.clone())
            .build())
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn model(&self) -> &str {
        &self.inner.model
    }

    /// Current list. A new `Arc` is produced on every change.
    pub fn messages(&self) -> Snapshot {
        self.state().list.snapshot()
    }

    /// Every published list in order, starting with the current one. One item per change:
    /// each applied frame is observable. The queue is unbounded; drop the receiver to stop.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Snapshot> {
        self.state().list.subscribe()
    }

    /// Latest list only; intermediate states may be skipped.
    pub fn watch(&self) -> watch::Receiver<Snapshot> {
        self.state().list.watch()
    }

    pub fn is_loading(&self) -> bool {
        self.state().list.is_loading()
    }

    /// Cancel the in-flight request. Returns false when nothing was in flight.
    pub fn abort(&self) -> bool {
        let mut st = self.state();
        match st.cancel.take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Replace the whole list. Ignored (false) while a response is streaming.
    pub fn set_messages(&self, list: Vec<MessageInput>) -> bool {
        let mut st = self.state();
        if st.list.is_loading() {
            tracing::debug!("set_messages ignored: a response is still streaming");
            return false;
        }
        st.list.replace(normalize_entries(list, now_ms()));
        true
    }

    /// Clear the list. Ignored (false) while a response is streaming.
    pub fn reset_messages(&self) -> bool {
        let mut st = self.state();
        if st.list.is_loading() {
            tracing::debug!("reset_messages ignored: a response is still streaming");
            return false;
        }
        st.list.clear();
        true
    }

    /// Append `entries` and stream the assistant reply into a placeholder at the tail.
    ///
    /// `None` or an empty list clears the conversation, cancelling any in-flight request.
    /// Transport and stream failures are returned after the tail has been finalized;
    /// cancellation is reported as [`SubmitOutcome::Aborted`].
    pub async fn submit(&self, entries: Option<Vec<MessageInput>>) -> CoreResult<SubmitOutcome> {
        let entries = entries.unwrap_or_default();
        if entries.is_empty() {
            self.reset_all();
            return Ok(SubmitOutcome::Reset);
        }

        // Guard check and placeholder append happen under one lock.
        let (request, token, seq, before) = {
            let mut st = self.state();
            if st.list.is_loading() {
                tracing::debug!("submit ignored: a response is still streaming");
                return Ok(SubmitOutcome::Ignored);
            }
            let before = now_ms();
            st.list.append(
                normalize_entries(entries, before)
                    .into_iter()
                    .chain(iter::once(ChatMessage::placeholder())),
            );
            let history = &st.list.as_slice()[..st.list.len() - 1];
            let request =
                CompletionRequest::streaming(&self.inner.model, &self.inner.params, history);
            let token = CancellationToken::new();
            st.generation += 1;
            st.cancel = Some(token.clone());
            (request, token, st.generation, before)
        };
        // Finalizes on drop too, so a caller-side timeout never strands a loading tail.
        let mut closer = TailCloser {
            session: self,
            seq,
            before,
            closed: false,
        };

        let span = tracing::info_span!(
            "chat.submit",
            llm.model = %self.inner.model,
            llm.transport = %self.inner.transport.name(),
            request.seq = seq,
            outcome = Empty,
            chunks = Empty,
            latency.ms = Empty,
            error.kind = Empty,
        );
        let (end, acc) = self
            .stream_into_tail(request, &token, seq)
            .instrument(span.clone())
            .await;

        let (after, latency_ms, response_time) = closer.close();

        let outcome = match &end {
            StreamEnd::Completed => Outcome::Completed,
            StreamEnd::Aborted => Outcome::Aborted,
            StreamEnd::Failed(_) => Outcome::Failed,
        };
        span.record(telemetry::KEY_OUTCOME, outcome.as_str());
        span.record(telemetry::KEY_CHUNKS, acc.chunk_count() as u64);
        span.record(telemetry::KEY_LATENCY_MS, latency_ms);

        let mut log = CompletionLog {
            model: self.inner.model.clone(),
            transport: self.inner.transport.name().to_string(),
            request_seq: seq,
            created_at_ms: after,
            latency_ms,
            response_time,
            outcome,
            chunks: acc.chunk_count(),
            text: acc.message().content.clone(),
            error_kind: None,
            error_message: None,
        };

        let result = match end {
            StreamEnd::Completed => {
                tracing::debug!(parent: &span, "response complete");
                Ok(SubmitOutcome::Completed)
            }
            StreamEnd::Aborted => {
                tracing::info!(parent: &span, "response aborted");
                Ok(SubmitOutcome::Aborted)
            }
            StreamEnd::Failed(e) => {
                span.record(telemetry::KEY_ERROR_KIND, e.kind());
                tracing::warn!(parent: &span, error = %e, "response stream failed");
                log = log.error(e.kind(), e.to_string());
                Err(e)
            }
        };
        if let Some(sink) = &self.inner.telemetry {
            sink.record_completion(log);
        }
        result
    }

    /// Open the stream and fold frames into the tail until a terminal condition.
    async fn stream_into_tail(
        &self,
        request: CompletionRequest,
        token: &CancellationToken,
        seq: u64,
    ) -> (StreamEnd, DeltaAccumulator) {
        let mut acc = DeltaAccumulator::new(ChatMessage::placeholder());

        let opened = tokio::select! {
            biased;
            _ = token.cancelled() => return (StreamEnd::Aborted, acc),
            r = self.inner.transport.open(&request) => r,
        };
        let body = match opened {
            Ok(body) => body,
            Err(_) if token.is_cancelled() => return (StreamEnd::Aborted, acc),
            Err(e) => return (StreamEnd::Failed(e), acc),
        };

        // Dropping `frames` on any return releases the response body.
        let mut frames = FrameDecoder::new(body);
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return (StreamEnd::Aborted, acc),
                n = frames.next() => n,
            };
            match next {
                Some(Ok(delta)) => {
                    let applied = {
                        let mut st = self.state();
                        if token.is_cancelled() || st.generation != seq {
                            false
                        } else {
                            let msg = acc.apply(delta, now_ms());
                            st.list.update_tail(msg)
                        }
                    };
                    if !applied {
                        return (StreamEnd::Aborted, acc);
                    }
                    tokio::task::yield_now().await;
                }
                Some(Err(_)) if token.is_cancelled() => return (StreamEnd::Aborted, acc),
                Some(Err(e)) => return (StreamEnd::Failed(e), acc),
                None => return (StreamEnd::Completed, acc),
            }
        }
    }

    fn reset_all(&self) {
        let mut st = self.state();
        if let Some(token) = st.cancel.take() {
            token.cancel();
        }
        st.generation += 1;
        st.list.clear();
    }
}

/// Closes the tail of one request exactly once, on return or on drop.
struct TailCloser<'a> {
    session: &'a ChatSession,
    seq: u64,
    before: i64,
    closed: bool,
}

impl TailCloser<'_> {
    /// Returns (final timestamp, latency ms, formatted response time).
    fn close(&mut self) -> (i64, i64, String) {
        self.closed = true;
        let after = now_ms().max(self.before + 1);
        let latency_ms = after - self.before;
        let response_time = format_response_time(latency_ms);
        let mut st = self.session.state();
        if st.generation == self.seq {
            st.list.finalize_tail(after, response_time.clone());
            if let Some(token) = st.cancel.take() {
                token.cancel();
            }
        }
        (after, latency_ms, response_time)
    }
}

impl Drop for TailCloser<'_> {
    fn drop(&mut self) {
        if !self.closed {
            tracing::info!(request.seq = self.seq, "submit dropped mid-stream; reply finalized");
            self.close();
        }
    }
}
