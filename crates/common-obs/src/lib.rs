//! JSON logging and a small Prometheus metrics registry.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Map, Number, Value};
use tracing::field::{Field, Visit};
use tracing::span;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{self as tsfmt, FmtContext, FormatEvent, FormatFields, MakeWriter};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Registry};

mod metrics;

pub use metrics::{
    auth_login_attempts_total, encode_prometheus as encode_prometheus_metrics,
    handler_latency_seconds, http_requests_inflight, http_requests_total, observe_http_request,
    register_counter, register_gauge, register_histogram, service_name, CounterVec, GaugeVec,
    HistogramVec, DEFAULT_BUCKETS, PROMETHEUS_CONTENT_TYPE,
};

/// Span field picked up by the request context layer.
pub const REQUEST_ID_FIELD: &str = "request_id";

#[derive(Debug, thiserror::Error)]
pub enum ObsInitError {
    #[error("tracing subscriber already initialized")]
    AlreadyInitialized,
    #[error("failed to install tracing subscriber: {0}")]
    Install(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Initialize observability for a service.
pub struct ObsInit;

impl ObsInit {
    /// Install the global JSON subscriber writing to stderr and register the
    /// default metrics for `service`.
    pub fn init(service: &str) -> Result<(), ObsInitError> {
        let subscriber = Self::subscriber_with_writer(service, io::stderr);
        tracing::subscriber::set_global_default(subscriber).map_err(|err| {
            if tracing::dispatcher::has_been_set() {
                ObsInitError::AlreadyInitialized
            } else {
                ObsInitError::Install(err)
            }
        })
    }

    /// Build the subscriber without installing it.
    pub fn subscriber_with_writer<W>(service: &str, writer: W) -> impl tracing::Subscriber
    where
        W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
    {
        metrics::init(service);

        let fallback = std::env::var("LOG_LEVEL").unwrap_or_else(|_| {
            if cfg!(debug_assertions) {
                "debug".to_string()
            } else {
                "info".to_string()
            }
        });
        let env_filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(fallback.to_ascii_lowercase()))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let fmt_layer = tsfmt::layer()
            .with_ansi(false)
            .event_format(JsonFormat {
                service: service.to_string(),
            })
            .with_writer(writer);

        Registry::default()
            .with(env_filter)
            .with(RequestContextLayer::default())
            .with(fmt_layer)
    }
}

struct TraceId(String);

struct RequestId(String);

/// Tags root spans with a trace id and remembers `request_id` span fields.
#[derive(Default)]
struct RequestContextLayer {
    next_trace: AtomicU64,
}

impl RequestContextLayer {
    fn store_request_id<S>(&self, id: &span::Id, value: Option<String>, ctx: &Context<'_, S>)
    where
        S: tracing::Subscriber + for<'span> LookupSpan<'span>,
    {
        if let (Some(value), Some(span)) = (value, ctx.span(id)) {
            span.extensions_mut().replace(RequestId(value));
        }
    }
}

impl<S> Layer<S> for RequestContextLayer
where
    S: tracing::Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        if span.parent().is_none() {
            let trace = self.next_trace.fetch_add(1, Ordering::Relaxed) + 1;
            span.extensions_mut()
                .insert(TraceId(format!("{trace:016x}")));
        }

        let mut visitor = RequestIdVisitor::default();
        attrs.record(&mut visitor);
        self.store_request_id(id, visitor.0, &ctx);
    }

    fn on_record(&self, id: &span::Id, values: &span::Record<'_>, ctx: Context<'_, S>) {
        let mut visitor = RequestIdVisitor::default();
        values.record(&mut visitor);
        self.store_request_id(id, visitor.0, &ctx);
    }
}

#[derive(Default)]
struct RequestIdVisitor(Option<String>);

impl Visit for RequestIdVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == REQUEST_ID_FIELD {
            self.0 = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == REQUEST_ID_FIELD {
            self.0 = Some(format!("{value:?}").trim_matches('"').to_string());
        }
    }
}

/// One JSON object per event: level, target, service, trace and request ids,
/// and the event fields.
struct JsonFormat {
    service: String,
}

impl<S, N> FormatEvent<S, N> for JsonFormat
where
    S: tracing::Subscriber + for<'span> LookupSpan<'span>,
    N: for<'writer> FormatFields<'writer> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        let mut fields = FieldVisitor::default();
        event.record(&mut fields);

        let mut trace_id = Value::Null;
        let mut request_id = Value::Null;
        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                let extensions = span.extensions();
                if let Some(TraceId(id)) = extensions.get::<TraceId>() {
                    if trace_id.is_null() {
                        trace_id = Value::String(id.clone());
                    }
                }
                if let Some(RequestId(id)) = extensions.get::<RequestId>() {
                    request_id = Value::String(id.clone());
                }
            }
        }

        let mut line = Map::new();
        line.insert(
            "level".into(),
            Value::String(metadata.level().as_str().to_ascii_lowercase()),
        );
        line.insert("target".into(), Value::String(metadata.target().to_string()));
        line.insert("service".into(), Value::String(self.service.clone()));
        line.insert("trace_id".into(), trace_id);
        line.insert("request_id".into(), request_id);
        line.insert("fields".into(), Value::Object(fields.0));

        let rendered = serde_json::to_string(&Value::Object(line)).map_err(|_| fmt::Error)?;
        writeln!(writer, "{rendered}")
    }
}

#[derive(Default)]
struct FieldVisitor(Map<String, Value>);

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0
            .insert(field.name().to_string(), Value::String(format!("{value:?}")));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.0
            .insert(field.name().to_string(), Value::String(value.to_string()));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.0.insert(field.name().to_string(), Value::Bool(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.0
            .insert(field.name().to_string(), Value::Number(value.into()));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.0
            .insert(field.name().to_string(), Value::Number(value.into()));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        let value = Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(value.to_string()));
        self.0.insert(field.name().to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{Arc, Mutex};
    use tracing::subscriber::with_default;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn lines(&self) -> Vec<Value> {
            let bytes = self.0.lock().unwrap().clone();
            String::from_utf8(bytes)
                .expect("utf8")
                .lines()
                .map(|line| serde_json::from_str(line).expect("json line"))
                .collect()
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = CapturedWriter;

        fn make_writer(&'a self) -> Self::Writer {
            CapturedWriter(self.0.clone())
        }
    }

    struct CapturedWriter(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CapturedWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn json_logs_include_trace_and_request() {
        let captured = Captured::default();
        let subscriber = ObsInit::subscriber_with_writer("svc", captured.clone());

        with_default(subscriber, || {
            let span = tracing::info_span!("http.request", request_id = "req-123");
            let _guard = span.enter();
            let inner = tracing::info_span!("login");
            let _inner = inner.enter();
            tracing::info!(event = "login_failed", attempts = 2u64, "hello world");
        });

        let lines = captured.lines();
        assert_eq!(lines.len(), 1);
        let line = &lines[0];
        assert_eq!(line["level"], "info");
        assert_eq!(line["service"], "svc");
        assert_eq!(line["request_id"], "req-123");
        assert!(line["trace_id"].is_string());
        assert_eq!(line["fields"]["message"], "hello world");
        assert_eq!(line["fields"]["event"], "login_failed");
        assert_eq!(line["fields"]["attempts"], 2);
    }

    #[test]
    fn events_outside_spans_have_null_ids() {
        let captured = Captured::default();
        let subscriber = ObsInit::subscriber_with_writer("svc", captured.clone());

        with_default(subscriber, || {
            tracing::warn!("standalone");
        });

        let lines = captured.lines();
        assert_eq!(lines[0]["level"], "warn");
        assert!(lines[0]["trace_id"].is_null());
        assert!(lines[0]["request_id"].is_null());
    }

    #[test]
    fn request_id_recorded_later_is_picked_up() {
        let captured = Captured::default();
        let subscriber = ObsInit::subscriber_with_writer("svc", captured.clone());

        with_default(subscriber, || {
            let span = tracing::info_span!("http.request", request_id = tracing::field::Empty);
            span.record(REQUEST_ID_FIELD, "late-id");
            let _guard = span.enter();
            tracing::info!("after record");
        });

        assert_eq!(captured.lines()[0]["request_id"], "late-id");
    }
}
