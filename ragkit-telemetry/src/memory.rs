use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;
use tracing::{Id, Subscriber};
use tracing_subscriber::{Layer, layer::Context, registry::LookupSpan};

/// Data for a captured span
#[derive(Debug, Clone, Serialize)]
pub struct SpanData {
    #[serde(rename = "span_id")]
    pub id: String,
    pub name: String,
    #[serde(rename = "parent_span_id", skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    /// Nanoseconds since the Unix epoch.
    pub start_time: u128,
    pub end_time: u128,

    pub attributes: HashMap<String, serde_json::Value>,
}

impl SpanData {
    /// String value of attribute `key`, if recorded.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(|v| v.as_str())
    }
}

/// Shared storage for closed spans, in close order.
#[derive(Debug, Clone, Default)]
pub struct SharedTraceStorage {
    spans: Arc<RwLock<Vec<SpanData>>>,
}

impl SharedTraceStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_span(&self, span: SpanData) {
        if let Ok(mut spans) = self.spans.write() {
            spans.push(span);
        }
    }

    /// All captured spans.
    pub fn spans(&self) -> Vec<SpanData> {
        self.spans.read().map(|s| s.clone()).unwrap_or_default()
    }

    /// Captured spans with the given name.
    pub fn spans_named(&self, name: &str) -> Vec<SpanData> {
        self.spans.read().map(|s| s.iter().filter(|d| d.name == name).cloned().collect()).unwrap_or_default()
    }

    /// Captured spans whose attribute `key` has string value `value`.
    pub fn spans_with(&self, key: &str, value: &str) -> Vec<SpanData> {
        self.spans
            .read()
            .map(|s| s.iter().filter(|d| d.attribute(key) == Some(value)).cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut spans) = self.spans.write() {
            spans.clear();
        }
    }
}

/// A tracing layer that captures spans in memory
pub struct InMemoryTraceLayer {
    storage: Arc<SharedTraceStorage>,
}

impl InMemoryTraceLayer {
    pub fn new(storage: Arc<SharedTraceStorage>) -> Self {
        Self { storage }
    }
}

#[derive(Clone)]
struct SpanFields(HashMap<String, serde_json::Value>);

#[derive(Clone, Copy)]
struct StartTime(u128);

fn now_nanos() -> u128 {
    SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default().as_nanos()
}

/// Context keys inherited from the parent span unless overridden.
const PROPAGATED_KEYS: [&str; 2] = ["document.id", "collection"];

impl<S> Layer<S> for InMemoryTraceLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &tracing::span::Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else { return };

        let mut visitor = JsonVisitor::default();
        attrs.record(&mut visitor);
        let mut fields = visitor.0;

        if let Some(parent) = span.parent() {
            if let Some(parent_fields) = parent.extensions().get::<SpanFields>() {
                for key in PROPAGATED_KEYS {
                    if !fields.contains_key(key) {
                        if let Some(value) = parent_fields.0.get(key) {
                            fields.insert(key.to_string(), value.clone());
                        }
                    }
                }
            }
        }

        let mut extensions = span.extensions_mut();
        extensions.insert(StartTime(now_nanos()));
        extensions.insert(SpanFields(fields));
    }

    fn on_record(&self, id: &Id, values: &tracing::span::Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else { return };
        let mut extensions = span.extensions_mut();
        if let Some(fields) = extensions.get_mut::<SpanFields>() {
            let mut visitor = JsonVisitor::default();
            values.record(&mut visitor);
            fields.0.extend(visitor.0);
        }
    }

    fn on_close(&self, id: Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(&id) else { return };
        let extensions = span.extensions();

        let span_data = SpanData {
            id: format!("{:016x}", id.into_u64()),
            name: span.metadata().name().to_string(),
            parent_id: span.parent().map(|p| format!("{:016x}", p.id().into_u64())),
            start_time: extensions.get::<StartTime>().map(|s| s.0).unwrap_or(0),
            end_time: now_nanos(),
            attributes: extensions.get::<SpanFields>().map(|f| f.0.clone()).unwrap_or_default(),
        };
        self.storage.add_span(span_data);
    }
}

#[derive(Default)]
struct JsonVisitor(HashMap<String, serde_json::Value>);

impl tracing::field::Visit for JsonVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.0.insert(field.name().to_string(), serde_json::Value::String(format!("{:?}", value)));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.0.insert(field.name().to_string(), serde_json::Value::String(value.to_string()));
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.0.insert(field.name().to_string(), serde_json::Value::Bool(value));
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_f64(&mut self, field: &tracing::field::Field, value: f64) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }
}
