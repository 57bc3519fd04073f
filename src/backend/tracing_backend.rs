//! Backend emitting spans through the `tracing` crate.

use opentelemetry::Value;
use tracing::{field, Span};
use tracing_opentelemetry::OpenTelemetrySpanExt;

use super::{SpanKind, TraceBackend, TraceSpan};
use crate::attribute::AttributeSet;

/// Emits spans through `tracing`, using OpenTelemetry field names so a
/// `tracing-opentelemetry` layer exports them with the right name, kind and status.
///
/// The well-known `db.*` and `server.*` attributes are declared span fields
/// and show up in any subscriber. Other keys are handed straight to the
/// OpenTelemetry layer, so they only reach an OpenTelemetry exporter.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingBackend;

impl TracingBackend {
    pub fn new() -> Self {
        Self
    }
}

fn kind_str(kind: &SpanKind) -> &'static str {
    match kind {
        SpanKind::Client => "client",
        SpanKind::Server => "server",
        SpanKind::Producer => "producer",
        SpanKind::Consumer => "consumer",
        SpanKind::Internal => "internal",
    }
}

impl TraceBackend for TracingBackend {
    type Span = Span;

    fn start_span(&self, parent: Option<&Span>, name: &str, kind: SpanKind) -> Span {
        let parent_id = match parent {
            Some(span) => span.id(),
            None => Span::current().id(),
        };

        tracing::info_span!(
            target: "sea_orm_tx_tracing",
            parent: parent_id,
            "db.operation",
            otel.name = %name,
            otel.kind = kind_str(&kind),
            otel.status_code = field::Empty,
            otel.status_message = field::Empty,
            db.system = field::Empty,
            db.name = field::Empty,
            db.namespace = field::Empty,
            db.operation = field::Empty,
            db.sql.table = field::Empty,
            db.collection.name = field::Empty,
            db.statement = field::Empty,
            db.rows_affected = field::Empty,
            db.user = field::Empty,
            db.connection_string = field::Empty,
            server.address = field::Empty,
            server.port = field::Empty,
        )
    }
}

impl TraceSpan for Span {
    fn set_attributes(&self, attributes: &AttributeSet) {
        let declared = self.metadata().map(|meta| meta.fields());
        for attribute in attributes {
            let field = declared.and_then(|fields| fields.field(attribute.key.as_str()));
            match (field, &attribute.value) {
                (Some(field), Value::String(v)) => {
                    self.record(&field, v.as_str());
                }
                (Some(field), Value::I64(v)) => {
                    self.record(&field, *v);
                }
                (Some(field), Value::F64(v)) => {
                    self.record(&field, *v);
                }
                (Some(field), Value::Bool(v)) => {
                    self.record(&field, *v);
                }
                _ => self.set_attribute(attribute.key.clone(), attribute.value.clone()),
            }
        }
    }

    fn set_ok_status(&self) {
        self.record("otel.status_code", "OK");
    }

    fn set_error_status(&self, message: &str) {
        self.record("otel.status_code", "ERROR");
        self.record("otel.status_message", message);
        tracing::error!(parent: self, error = %message, "Database operation failed");
    }

    // A `tracing` span closes when its last handle drops, i.e. once every
    // context carrying it is gone.
    fn end(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{DB_OPERATION, SERVER_PORT};
    use crate::backend::Status;
    use crate::context::Context;
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_sdk::testing::trace::InMemorySpanExporter;
    use opentelemetry_sdk::trace::TracerProvider;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn test_span_metadata_name() {
        let backend = TracingBackend::new();
        let (_, span) = backend.start(&Context::new(), "SELECT app", SpanKind::Client);

        // Without a subscriber the span is disabled and carries no metadata.
        if let Some(meta) = span.metadata() {
            assert_eq!(meta.name(), "db.operation");
            assert!(meta.fields().field("db.statement").is_some());
        }
    }

    #[test]
    fn test_recording_without_subscriber_is_harmless() {
        let backend = TracingBackend::new();
        let (ctx, span) = backend.start(&Context::new(), "INSERT app", SpanKind::Client);

        let mut attributes = AttributeSet::new();
        attributes.insert(DB_OPERATION, "INSERT");
        attributes.insert(SERVER_PORT, 5432i64);
        attributes.insert("custom.key", true);
        span.set_attributes(&attributes);
        span.set_error_status("boom");
        span.end();

        assert!(crate::backend::span_from_context::<Span>(&ctx).is_some());
    }

    #[test]
    fn test_exported_span_carries_undeclared_attributes() {
        let exporter = InMemorySpanExporter::default();
        let provider = TracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        let subscriber = tracing_subscriber::registry()
            .with(tracing_opentelemetry::layer().with_tracer(provider.tracer("sea-orm-tx-tracing")));

        tracing::subscriber::with_default(subscriber, || {
            let backend = TracingBackend::new();
            let (ctx, span) = backend.start(&Context::new(), "SELECT app.orders", SpanKind::Client);

            let mut attributes = AttributeSet::new();
            attributes.insert(DB_OPERATION, "SELECT");
            attributes.insert("db.cached", true);
            attributes.insert("app.tenant", "acme".to_string());
            span.set_attributes(&attributes);
            span.set_ok_status();
            span.end();
            drop(ctx);
        });

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        let exported = &spans[0];
        assert_eq!(exported.name, "SELECT app.orders");
        assert_eq!(exported.span_kind, SpanKind::Client);
        assert_eq!(exported.status, Status::Ok);

        let value = |key: &str| {
            exported
                .attributes
                .iter()
                .find(|kv| kv.key.as_str() == key)
                .map(|kv| kv.value.clone())
        };
        assert_eq!(value(DB_OPERATION).map(|v| v.to_string()).as_deref(), Some("SELECT"));
        assert_eq!(value("db.cached"), Some(Value::Bool(true)));
        assert_eq!(value("app.tenant").map(|v| v.to_string()).as_deref(), Some("acme"));
    }
}
