//! # sea-orm-tx-tracing
//!
//! Context-propagated transactions and OpenTelemetry-compatible operation
//! tracing for SeaORM.
//!
//! A request carries an immutable OpenTelemetry [`Context`]. The context holds the span of
//! the current operation and, while a [`Transactioner::exec`] call is running,
//! the active transaction. Code reached from inside that call, however deeply
//! nested, joins the same transaction instead of opening its own.
//!
//! ## Features
//!
//! - **Nested Transactions**: exactly one begin and one commit (or rollback) per outermost call
//! - **Operation Spans**: allow-listed client spans named `"<op> <db>"` or `"<op> <db>.<table>"`
//! - **Pluggable Backends**: spans go to `tracing` (and on to `tracing-opentelemetry`) by default, or to an in-memory recorder in tests
//! - **Statement Registry**: prepared statements cached by id, closed together on shutdown
//! - **Pool Presets**: connection pool limits applied to SeaORM `ConnectOptions`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sea_orm::{ConnectionTrait, Database};
//! use sea_orm_tx_tracing::prelude::*;
//!
//! let config = TracingConfig::builder("postgresql", "app")
//!     .with_table_key("db.sql.table")
//!     .build()?;
//!
//! let db = Database::connect("postgres://localhost/app").await?;
//! let traced = db.with_tracing(OpTracer::with_tracing(config));
//! let transactioner = Transactioner::new(traced.clone());
//!
//! transactioner
//!     .exec(&Context::new(), |ctx| async move {
//!         traced.scoped(&ctx).execute_unprepared("DELETE FROM sessions").await
//!     })
//!     .await?;
//! ```
//!
//! ## Span Attributes
//!
//! | Attribute | Description |
//! |-----------|-------------|
//! | `db.system` | Configured database system, e.g. "postgresql" |
//! | `db.name` / `db.namespace` | Database name, under the configured key |
//! | `db.operation` | Operation name (SELECT, INSERT, BEGIN, ...) |
//! | `db.sql.table` / `db.collection.name` | Target table, when a table key is configured |
//! | `db.statement` | Statement text, with bound values unless excluded |
//! | `db.user` | User the connection authenticates as |
//! | `db.rows_affected` | Rows returned or affected |
//! | `server.address` / `server.port` | Database host, from the connection string |
//! | `otel.status_code` | "OK" or "ERROR" |

mod attribute;
pub mod backend;
mod config;
mod connection;
mod context;
mod error;
mod parser;
mod pool;
mod registry;
mod tracer;
mod transaction;

pub use attribute::{
    AttributeSet, DB_COLLECTION_NAME, DB_CONNECTION_STRING, DB_NAME, DB_NAMESPACE, DB_NAME_KEYS,
    DB_OPERATION, DB_ROWS_AFFECTED, DB_SQL_TABLE, DB_STATEMENT, DB_SYSTEM, DB_USER,
    SERVER_ADDRESS, SERVER_PORT, TABLE_KEYS,
};
pub use backend::{
    span_from_context, InMemoryTracer, RecordedSpan, SpanData, SpanKind, Status, TraceBackend,
    TraceSpan, TracingBackend,
};
pub use config::{
    skip_record_not_found, ConnectionInfo, SkipErrorFn, TracingConfig, TracingConfigBuilder,
    DEFAULT_OPERATIONS,
};
pub use connection::{RowStream, ScopedConnection, TracedConnection, TracingExt};
pub use context::Context;
pub use error::{ConfigError, StatementError, TxError};
pub use parser::{ParsedSql, SqlOperation};
pub use pool::{apply_pool_options, PoolOption, PoolProfile, PoolSettings};
pub use registry::{PreparedQuery, PreparedStatement, Preparer, StatementRegistry};
pub use tracer::{OpTracer, TraceOpConfig, TraceOpOption};
pub use transaction::{
    PhysicalTransaction, RollbackErrorPolicy, TransactionBeginner, Transactioner, TxHandle,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        Context, OpTracer, PoolProfile, StatementRegistry, TraceOpOption, TracedConnection,
        TracingConfig, TracingExt, Transactioner, TxError,
    };
}
