use serde_json::{json, Map, Value};
use std::io::Write;
use tracing::span::{Attributes, Id, Record};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// Writes one JSON object per event: event fields plus the fields of every enclosing span.
pub struct NdjsonTraceLayer<W: Write + Send + Sync + 'static> {
    writer: std::sync::Mutex<W>,
}

impl<W: Write + Send + Sync + 'static> NdjsonTraceLayer<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: std::sync::Mutex::new(writer),
        }
    }
}

/// Span fields captured at creation, stored in the span's extensions.
struct SpanFields(Map<String, Value>);

impl<S, W> Layer<S> for NdjsonTraceLayer<W>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: Write + Send + Sync + 'static,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let mut fields = Value::Object(Map::new());
        attrs.record(&mut JsonVisitor(&mut fields));
        if let (Some(span), Value::Object(map)) = (ctx.span(id), fields) {
            span.extensions_mut().insert(SpanFields(map));
        }
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        let span = match ctx.span(id) {
            Some(s) => s,
            None => return,
        };
        let mut extensions = span.extensions_mut();
        if let Some(SpanFields(map)) = extensions.get_mut::<SpanFields>() {
            let mut fields = Value::Object(std::mem::take(map));
            values.record(&mut JsonVisitor(&mut fields));
            if let Value::Object(updated) = fields {
                *map = updated;
            }
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let timestamp = chrono::Utc::now().to_rfc3339();
        let meta = event.metadata();

        let mut fields = json!({});
        event.record(&mut JsonVisitor(&mut fields));

        let mut spans = Vec::new();
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope.from_root() {
                let recorded = match span.extensions().get::<SpanFields>() {
                    Some(SpanFields(map)) => Value::Object(map.clone()),
                    None => json!({}),
                };
                spans.push(json!({
                    "name": span.name(),
                    "fields": recorded,
                }));
            }
        }

        let request_id = spans
            .iter()
            .find_map(|s| s["fields"].get("request_id").cloned())
            .unwrap_or(Value::Null);

        let output = json!({
            "timestamp": timestamp,
            "level": meta.level().to_string(),
            "target": meta.target(),
            "request_id": request_id,
            "spans": spans,
            "fields": fields,
        });

        if let Ok(mut w) = self.writer.lock() {
            let _ = writeln!(w, "{}", output);
        }
    }
}

struct JsonVisitor<'a>(&'a mut Value);

impl<'a> tracing::field::Visit for JsonVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.0[field.name()] = json!(format!("{:?}", value));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.0[field.name()] = json!(value);
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.0[field.name()] = json!(value);
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.0[field.name()] = json!(value);
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.0[field.name()] = json!(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::prelude::*;

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn events_carry_enclosing_span_fields() {
        let sink = Shared::default();
        let subscriber = tracing_subscriber::registry().with(NdjsonTraceLayer::new(sink.clone()));

        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("request", request_id = "r-1");
            let _g = span.enter();
            tracing::info!(envelopes = 3u64, "stream finished");
        });

        let raw = String::from_utf8(sink.0.lock().unwrap().clone()).unwrap();
        let line: Value = serde_json::from_str(raw.lines().next().unwrap()).unwrap();
        assert_eq!(line["request_id"], "r-1");
        assert_eq!(line["spans"][0]["name"], "request");
        assert_eq!(line["fields"]["envelopes"], 3);
        assert_eq!(line["fields"]["message"], "stream finished");
    }
}
