//! Operation tracer: allow-listed, attribute-merged client spans around
//! database operations.

use std::error::Error;

use opentelemetry::{Key, KeyValue, Value};

use crate::attribute::{
    AttributeSet, DB_CONNECTION_STRING, DB_OPERATION, DB_STATEMENT, DB_SYSTEM, DB_USER,
    SERVER_ADDRESS, SERVER_PORT,
};
use crate::backend::{span_from_context, SpanKind, TraceBackend, TraceSpan, TracingBackend};
use crate::config::TracingConfig;
use crate::context::Context;

/// Per-call overrides for [`OpTracer::start`] and [`OpTracer::end`].
#[derive(Debug, Clone, PartialEq)]
pub enum TraceOpOption {
    /// Table the operation targets; recorded under the configured table key.
    Table(String),
    /// Statement text. `rendered` carries the statement with its values
    /// inlined and is preferred unless query variables are excluded.
    Statement { sql: String, rendered: Option<String> },
    /// Database user for this call.
    User(String),
    /// Any other attribute.
    Attribute(KeyValue),
    /// The operation name is a space-separated list of sub-operations.
    Composite,
}

impl TraceOpOption {
    pub fn table(table: impl Into<String>) -> Self {
        TraceOpOption::Table(table.into())
    }

    /// Statement without bound values.
    pub fn query(sql: impl Into<String>) -> Self {
        TraceOpOption::Statement {
            sql: sql.into(),
            rendered: None,
        }
    }

    /// Statement built from a SeaORM `Statement`, keeping both forms.
    pub fn statement(stmt: &sea_orm::Statement) -> Self {
        TraceOpOption::Statement {
            sql: stmt.sql.clone(),
            rendered: stmt.values.as_ref().map(|_| stmt.to_string()),
        }
    }

    pub fn user(user: impl Into<String>) -> Self {
        TraceOpOption::User(user.into())
    }

    pub fn attribute(key: impl Into<Key>, value: impl Into<Value>) -> Self {
        TraceOpOption::Attribute(KeyValue::new(key, value))
    }
}

/// Attributes and flags resolved for one traced call.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceOpConfig {
    pub attributes: AttributeSet,
    pub composite: bool,
}

/// Wraps database operations in client spans.
///
/// The tracer is cheap to share behind an `Arc` and holds no per-call state;
/// the active span travels in the [`Context`] returned by [`start`](Self::start).
///
/// Pair every `start` with exactly one `end`, passing the context `start` returned.
#[derive(Debug)]
pub struct OpTracer<B: TraceBackend = TracingBackend> {
    config: TracingConfig,
    backend: B,
    base: AttributeSet,
}

impl OpTracer<TracingBackend> {
    /// Tracer emitting spans through the `tracing` crate.
    pub fn with_tracing(config: TracingConfig) -> Self {
        Self::new(config, TracingBackend::new())
    }
}

impl<B: TraceBackend> OpTracer<B> {
    pub fn new(config: TracingConfig, backend: B) -> Self {
        let base = base_attributes(&config);
        Self {
            config,
            backend,
            base,
        }
    }

    pub fn config(&self) -> &TracingConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Attributes shared by every span this tracer creates.
    pub fn base_attributes(&self) -> &AttributeSet {
        &self.base
    }

    /// Start a span for `op` and return a scope carrying it.
    ///
    /// Returns `ctx` unchanged when `op` is not on the allow-list.
    pub fn start(&self, ctx: &Context, op: &str, opts: &[TraceOpOption]) -> Context {
        let op_config = self.op_config(op, opts);
        if !self.is_traceable(op, op_config.composite) {
            return ctx.clone();
        }

        let name = self.span_name(op, &op_config.attributes);
        let (scoped, span) = self.backend.start(ctx, &name, SpanKind::Client);
        span.set_attributes(&op_config.attributes);
        scoped
    }

    /// Finish the span started for `op`, classifying `err`.
    ///
    /// Does nothing when `op` is not on the allow-list or `ctx` carries no span.
    /// The caller's error is only observed, never altered.
    pub fn end(&self, ctx: &Context, op: &str, err: Option<&(dyn Error + 'static)>, opts: &[TraceOpOption]) {
        let op_config = self.op_config(op, opts);
        if !self.is_traceable(op, op_config.composite) {
            return;
        }

        let Some(span) = span_from_context::<B::Span>(ctx) else {
            tracing::debug!(op, "no active span to end");
            return;
        };

        span.set_attributes(&op_config.attributes);
        match err {
            Some(err) if !self.config.should_skip(err) => span.set_error_status(&err.to_string()),
            _ => span.set_ok_status(),
        }
        span.end();
    }

    /// Resolve attributes for a call: base, then `db.operation`, then `opts` in order.
    pub fn op_config(&self, op: &str, opts: &[TraceOpOption]) -> TraceOpConfig {
        let mut attributes = self.base.clone();
        attributes.insert(DB_OPERATION, op.to_string());

        let mut composite = false;
        for opt in opts {
            match opt {
                TraceOpOption::Table(table) => {
                    if let Some(key) = self.config.table_key() {
                        attributes.insert(key, table.clone());
                    }
                }
                TraceOpOption::Statement { sql, rendered } => {
                    let text = match rendered {
                        Some(rendered) if !self.config.exclude_query_vars() => rendered,
                        _ => sql,
                    };
                    attributes.insert(DB_STATEMENT, text.clone());
                }
                TraceOpOption::User(user) => attributes.insert(DB_USER, user.clone()),
                TraceOpOption::Attribute(attribute) => attributes.push(attribute.clone()),
                TraceOpOption::Composite => composite = true,
            }
        }

        TraceOpConfig {
            attributes,
            composite,
        }
    }

    fn is_traceable(&self, op: &str, composite: bool) -> bool {
        if composite {
            self.config.is_composite_allowed(op)
        } else {
            self.config.is_allowed(op)
        }
    }

    /// `"<op> <db>"`, or `"<op> <db>.<table>"` when a table attribute is present.
    fn span_name(&self, op: &str, attributes: &AttributeSet) -> String {
        let table = self
            .config
            .table_key()
            .and_then(|key| attributes.get_str(key));

        match table {
            Some(table) => format!("{} {}.{}", op, self.config.db_name(), table),
            None => format!("{} {}", op, self.config.db_name()),
        }
    }
}

fn base_attributes(config: &TracingConfig) -> AttributeSet {
    let mut base = AttributeSet::new();
    base.insert(DB_SYSTEM, config.system().to_string());

    if let Some(conn) = config.connection() {
        base.insert(DB_CONNECTION_STRING, conn.sanitized().to_string());
        if let Some(host) = conn.host() {
            base.insert(SERVER_ADDRESS, host.to_string());
        }
        if let Some(port) = conn.port() {
            base.insert(SERVER_PORT, i64::from(port));
        }
        if let Some(user) = conn.user() {
            base.insert(DB_USER, user.to_string());
        }
    }

    base.insert(config.db_name_key(), config.db_name().to_string());
    base
}
