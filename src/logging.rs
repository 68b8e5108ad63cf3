use axum::{
    body::Body,
    http::{HeaderValue, Request, Response},
    middleware::Next,
};
use colored::*;
use std::panic;
use std::path::Path;
use tracing::{error, info};
use tracing::{info_span, Instrument};
use tracing_appender::non_blocking::WorkerGuard;
use uuid::Uuid;

use crate::redaction_layer::RedactingMakeWriter;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Sets up a global panic hook that logs panics using tracing.
pub fn setup_panic_hook() {
    let original_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let backtrace = std::backtrace::Backtrace::capture();

        let payload = panic_info.payload();
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            *s
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.as_str()
        } else {
            "Unknown panic payload"
        };

        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown location".to_string());

        error!(
            target: "panic",
            message = %message,
            location = %location,
            backtrace = %backtrace,
            "FATAL: Application panicked"
        );

        original_hook(panic_info);
    }));
}

/// Installs the global subscriber: stdout, a daily human log and a daily NDJSON trace.
///
/// The returned guards must live as long as the process or buffered lines are lost.
/// `debug` raises the default level when `RUST_LOG` is unset.
pub fn init_tracing(log_dir: &Path, debug: bool) -> Vec<WorkerGuard> {
    use tracing_subscriber::prelude::*;

    let filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) if debug => "conduit=debug,tower_http=info".into(),
        Err(_) => "conduit=info,tower_http=warn".into(),
    };

    let _ = std::fs::create_dir_all(log_dir);
    let file_appender = tracing_appender::rolling::daily(log_dir, "conduit.log");
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);

    let trace_appender = tracing_appender::rolling::daily(log_dir, "trace.ndjson");
    let (trace_writer, trace_guard) = tracing_appender::non_blocking(trace_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(RedactingMakeWriter::new(file_writer))
                .with_ansi(false),
        )
        .with(crate::ndjson_layer::NdjsonTraceLayer::new(
            crate::redaction_layer::RedactingWriter::new(trace_writer),
        ))
        .with(tracing_error::ErrorLayer::default())
        .init();

    vec![file_guard, trace_guard]
}

/// Runs every request inside a `request` span and echoes its id back to the caller.
pub async fn request_span_middleware(mut req: Request<Body>, next: Next) -> Response<Body> {
    let request_id = match req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        Some(id) => id.to_string(),
        None => Uuid::new_v4().to_string(),
    };
    if let Ok(val) = HeaderValue::from_str(&request_id) {
        req.headers_mut().insert(REQUEST_ID_HEADER, val);
    }

    let span = info_span!(
        "request",
        request_id = %request_id,
        method = %req.method(),
        path = %req.uri().path()
    );
    let mut response = next.run(req).instrument(span).await;
    if let Ok(val) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, val);
    }
    response
}

/// Per-stream counters, logged once when the multiplexer finishes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StreamMetric {
    pub lines: usize,
    pub envelopes: usize,
    pub tool_fragments: usize,
    pub text_chars: usize,
    pub dropped_frames: usize,
    pub upstream_errors: usize,
    pub function_calls: Vec<String>,
    pub interrupted: bool,
}

impl StreamMetric {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_envelope(&mut self, envelope: &crate::specs::envelope::ResponseEnvelope) {
        self.envelopes += 1;
        for fragment in envelope.fragments() {
            match fragment.role {
                crate::specs::envelope::FragmentRole::Tool => self.tool_fragments += 1,
                crate::specs::envelope::FragmentRole::Assistant => {
                    if !fragment.is_sentinel() {
                        self.text_chars += fragment.content.chars().count();
                    }
                }
            }
        }
    }

    pub fn record_dropped(&mut self, reason: &crate::normalizer::SkipReason) {
        tracing::debug!(reason = ?reason, "Dropped upstream frame");
        self.dropped_frames += 1;
    }

    pub fn record_upstream_error(&mut self, error: &serde_json::Value) {
        self.upstream_errors += 1;
        tracing::warn!(
            "{} {}",
            "[UPSTREAM ERROR]".bold().red(),
            error
        );
    }

    pub fn log_summary(&self, correlation: &crate::types::CorrelationId) {
        let functions = if self.function_calls.is_empty() {
            "none".to_string()
        } else {
            self.function_calls.join(", ")
        };

        info!(
            target: "conduit::stream",
            lines = self.lines,
            envelopes = self.envelopes,
            dropped_frames = self.dropped_frames,
            upstream_errors = self.upstream_errors,
            interrupted = self.interrupted,
            "[STREAM END] {} | Envelopes: {} | Citations: {} | Text: {} chars | Dropped: {} | Functions: {}",
            correlation.short(),
            self.envelopes,
            self.tool_fragments,
            self.text_chars,
            self.dropped_frames,
            functions
        );
    }
}
