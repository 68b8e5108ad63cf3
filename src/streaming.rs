use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::Instrument;

use crate::constants::{MAX_STREAM_LINE_BYTES, STREAM_CHANNEL_CAPACITY};
use crate::functions::FunctionRuntime;
use crate::logging::StreamMetric;
use crate::mode::RequestPlan;
use crate::normalizer::{normalize_line, FunctionSignal, Normalized, SkipReason, StreamKind};
use crate::specs::envelope::{
    format_as_ndjson, ErrorEnvelope, MessageFragment, Passthrough, ResponseEnvelope,
};
use crate::types::CorrelationId;

/// Per-request inputs of one multiplexing task.
#[derive(Clone)]
pub struct StreamSession {
    pub correlation: CorrelationId,
    pub history_metadata: Value,
    pub kind: StreamKind,
    pub functions: Option<FunctionRuntime>,
}

impl StreamSession {
    /// Stamps the request-scoped fields onto a normalized envelope.
    pub fn stamp(&self, envelope: ResponseEnvelope, apim_request_id: Option<&str>) -> ResponseEnvelope {
        envelope
            .with_correlation(self.correlation.as_str())
            .with_history_metadata(&self.history_metadata)
            .with_apim_request_id(apim_request_id)
    }
}

#[derive(Debug, Default)]
struct FunctionAccumulator {
    name: Option<String>,
    arguments: String,
}

impl FunctionAccumulator {
    fn push(&mut self, name: Option<String>, arguments: Option<String>) {
        if let Some(n) = name.filter(|n| !n.is_empty()) {
            self.name = Some(n);
        }
        if let Some(a) = arguments {
            self.arguments.push_str(&a);
        }
    }

    fn take(&mut self) -> (Option<String>, String) {
        let taken = std::mem::take(self);
        (taken.name, taken.arguments)
    }
}

/// Outcome of forwarding one item to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    ClientGone,
}

pub struct StreamHandler;

impl StreamHandler {
    /// Spawns the multiplexing task and returns the NDJSON response that drains it.
    ///
    /// Always 200: failures after this point travel inside the stream.
    pub fn respond(client: reqwest::Client, plan: RequestPlan, session: StreamSession) -> Response {
        let (tx, rx) = mpsc::channel::<Bytes>(STREAM_CHANNEL_CAPACITY);

        let stream_span = tracing::info_span!(
            "stream",
            correlation = %session.correlation.short(),
            mode = ?plan.mode,
            deployment = %plan.deployment.name
        );
        tokio::spawn(
            async move {
                Self::run(client, plan, session, tx).await;
            }
            .instrument(stream_span),
        );

        let body = Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, std::convert::Infallible>));
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/event-stream")],
            body,
        )
            .into_response()
    }

    async fn run(
        client: reqwest::Client,
        plan: RequestPlan,
        session: StreamSession,
        tx: mpsc::Sender<Bytes>,
    ) {
        let response = match crate::upstream::open_stream(&client, &plan).await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!("[☁️  -> ⚙️ ] Connection failed: {}", e);
                let _ = Self::send(&tx, &ErrorEnvelope::local("stream_interrupted", &e)).await;
                return;
            }
        };

        if !response.status().is_success() {
            let envelope = crate::upstream::error_envelope_from(response).await;
            let _ = Self::send(&tx, &envelope).await;
            return;
        }

        let apim_request_id = crate::upstream::apim_request_id(&response);
        if let Some(id) = &apim_request_id {
            tracing::debug!(apim_request_id = %id, "Upstream stream opened");
        }

        let body = Box::pin(
            response
                .bytes_stream()
                .map(|r| r.map_err(std::io::Error::other)),
        );
        Self::handle_stream(body, &session, apim_request_id, &tx).await;
    }

    /// Re-frames `body` into lines and forwards one envelope per upstream event.
    ///
    /// Returns as soon as the receiving side is dropped, even while the upstream is silent.
    pub async fn handle_stream<R>(
        body: R,
        session: &StreamSession,
        apim_request_id: Option<String>,
        tx: &mpsc::Sender<Bytes>,
    ) -> StreamMetric
    where
        R: Stream<Item = std::result::Result<Bytes, std::io::Error>> + Unpin + Send,
    {
        let mut lines = FramedRead::new(
            tokio_util::io::StreamReader::new(body),
            LinesCodec::new_with_max_length(MAX_STREAM_LINE_BYTES),
        );
        let mut metrics = StreamMetric::new();
        let mut accumulator = FunctionAccumulator::default();

        loop {
            let line_result = tokio::select! {
                biased;
                _ = tx.closed() => {
                    tracing::trace!("Client disconnected, stopping stream");
                    break;
                }
                next = lines.next() => match next {
                    Some(r) => r,
                    None => break,
                },
            };

            let flow = match line_result {
                Ok(line) => {
                    metrics.lines += 1;
                    tokio::select! {
                        biased;
                        _ = tx.closed() => Flow::ClientGone,
                        flow = Self::process_line(
                            &line,
                            session,
                            apim_request_id.as_deref(),
                            &mut accumulator,
                            &mut metrics,
                            tx,
                        ) => flow,
                    }
                }
                Err(e) => {
                    Self::handle_line_error(e, &mut metrics, tx).await;
                    break;
                }
            };

            if flow == Flow::ClientGone {
                tracing::trace!("Client disconnected, stopping stream");
                break;
            }
        }

        metrics.log_summary(&session.correlation);
        metrics
    }

    async fn process_line(
        line: &str,
        session: &StreamSession,
        apim_request_id: Option<&str>,
        accumulator: &mut FunctionAccumulator,
        metrics: &mut StreamMetric,
        tx: &mpsc::Sender<Bytes>,
    ) -> Flow {
        match normalize_line(line, session.kind) {
            Normalized::Envelope(envelope) => {
                let envelope = session.stamp(envelope, apim_request_id);
                metrics.record_envelope(&envelope);
                Self::send(tx, &envelope).await
            }
            Normalized::UpstreamError(error) => {
                metrics.record_upstream_error(&error.error);
                Self::send(tx, &error).await
            }
            Normalized::Function { signal, meta } => {
                Self::handle_function_signal(
                    signal,
                    meta,
                    session,
                    apim_request_id,
                    accumulator,
                    metrics,
                    tx,
                )
                .await
            }
            Normalized::Skip(SkipReason::Malformed(reason)) => {
                metrics.record_dropped(&SkipReason::Malformed(reason));
                Flow::Continue
            }
            Normalized::Skip(reason) => {
                tracing::trace!(reason = ?reason, "Skipped upstream frame");
                Flow::Continue
            }
        }
    }

    async fn handle_function_signal(
        signal: FunctionSignal,
        meta: Passthrough,
        session: &StreamSession,
        apim_request_id: Option<&str>,
        accumulator: &mut FunctionAccumulator,
        metrics: &mut StreamMetric,
        tx: &mpsc::Sender<Bytes>,
    ) -> Flow {
        let (name, arguments) = match signal {
            FunctionSignal::Fragment { name, arguments } => {
                accumulator.push(name, arguments);
                return Flow::Continue;
            }
            FunctionSignal::Invoke => accumulator.take(),
            FunctionSignal::Call { name, arguments } => (Some(name), arguments),
        };

        let runtime = match &session.functions {
            Some(r) => r,
            None => {
                tracing::warn!("Model requested a function call but functions are disabled");
                return Self::send(
                    tx,
                    &ErrorEnvelope::local("function_error", "function calling is not enabled"),
                )
                .await;
            }
        };
        let name = match name {
            Some(n) => n,
            None => {
                return Self::send(
                    tx,
                    &ErrorEnvelope::local("function_error", "function call without a name"),
                )
                .await
            }
        };

        metrics.function_calls.push(name.clone());
        match runtime.invoke(&name, &arguments).await {
            Ok(text) => {
                let envelope = session.stamp(
                    ResponseEnvelope::new(meta, vec![MessageFragment::assistant(text)]),
                    apim_request_id,
                );
                metrics.record_envelope(&envelope);
                Self::send(tx, &envelope).await
            }
            Err(e) => {
                tracing::error!(function = %name, "Function failed: {}", e);
                Self::send(tx, &ErrorEnvelope::local("function_error", &e)).await
            }
        }
    }

    async fn handle_line_error(e: LinesCodecError, metrics: &mut StreamMetric, tx: &mpsc::Sender<Bytes>) {
        tracing::error!("[☁️  -> ⚙️ ] Stream read error: {}", e);
        metrics.interrupted = true;
        let message = match e {
            LinesCodecError::Io(io) => io.to_string(),
            LinesCodecError::MaxLineLengthExceeded => "Max line length exceeded".to_string(),
        };
        let _ = Self::send(tx, &ErrorEnvelope::local("stream_interrupted", message)).await;
    }

    async fn send<T: Serialize>(tx: &mpsc::Sender<Bytes>, item: &T) -> Flow {
        let line = match format_as_ndjson(item) {
            Ok(l) => l,
            Err(e) => {
                tracing::error!("Failed to serialize stream item: {}", e);
                return Flow::Continue;
            }
        };
        if tx.send(line).await.is_err() {
            return Flow::ClientGone;
        }
        Flow::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulator_joins_argument_fragments() {
        let mut acc = FunctionAccumulator::default();
        acc.push(Some("read_docx_from_blob".into()), Some("{\"container_name\":".into()));
        acc.push(None, Some("\"c\"}".into()));
        acc.push(Some(String::new()), None);
        let (name, args) = acc.take();
        assert_eq!(name.as_deref(), Some("read_docx_from_blob"));
        assert_eq!(args, "{\"container_name\":\"c\"}");
        assert!(acc.name.is_none());
    }
}
