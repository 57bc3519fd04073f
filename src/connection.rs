//! Traced, transaction-aware database connection.

use std::error::Error;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use sea_orm::{
    ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbBackend, DbErr, ExecResult,
    QueryResult, Statement, StreamTrait,
};

use crate::attribute::DB_ROWS_AFFECTED;
use crate::backend::{TraceBackend, TracingBackend};
use crate::context::Context;
use crate::parser::ParsedSql;
use crate::registry::{PreparedQuery, Preparer};
use crate::tracer::{OpTracer, TraceOpOption};
use crate::transaction::{TransactionBeginner, Transactioner, TxHandle};

/// A SeaORM `DatabaseConnection` paired with an [`OpTracer`].
///
/// The connection itself is request-agnostic. Call [`scoped`](Self::scoped)
/// with the request's [`Context`] to get a `ConnectionTrait` implementation
/// that joins the transaction active in that context and records a span per
/// statement under the context's span.
///
/// It also implements [`TransactionBeginner`] and [`Preparer`], so the same
/// value can back a [`Transactioner`] and a
/// [`StatementRegistry`](crate::StatementRegistry). Clones share one pool.
///
/// # Example
///
/// ```rust,ignore
/// use sea_orm::{ConnectionTrait, Database};
/// use sea_orm_tx_tracing::prelude::*;
///
/// let config = TracingConfig::builder("postgresql", "app").build()?;
/// let db = Database::connect("postgres://localhost/app").await?;
/// let traced = db.with_tracing(OpTracer::with_tracing(config));
/// let tx = Transactioner::new(traced.clone());
///
/// tx.exec(&Context::new(), |ctx| async move {
///     traced.scoped(&ctx).execute_unprepared("INSERT INTO orders DEFAULT VALUES").await
/// })
/// .await?;
/// ```
#[derive(Debug)]
pub struct TracedConnection<B: TraceBackend = TracingBackend> {
    inner: Arc<DatabaseConnection>,
    tracer: Arc<OpTracer<B>>,
}

impl<B: TraceBackend> Clone for TracedConnection<B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            tracer: self.tracer.clone(),
        }
    }
}

impl<B: TraceBackend> TracedConnection<B> {
    pub fn new(connection: DatabaseConnection, tracer: OpTracer<B>) -> Self {
        Self::with_shared_tracer(connection, Arc::new(tracer))
    }

    /// Wrap a connection with a tracer shared with other connections.
    pub fn with_shared_tracer(connection: DatabaseConnection, tracer: Arc<OpTracer<B>>) -> Self {
        Self {
            inner: Arc::new(connection),
            tracer,
        }
    }

    /// Get a reference to the underlying `DatabaseConnection`.
    pub fn inner(&self) -> &DatabaseConnection {
        &self.inner
    }

    pub fn tracer(&self) -> &OpTracer<B> {
        &self.tracer
    }

    /// Consume the wrapper and return the inner `DatabaseConnection`.
    ///
    /// Fails, handing the wrapper back, while other clones are alive.
    pub fn into_inner(self) -> Result<DatabaseConnection, Self> {
        let tracer = self.tracer;
        Arc::try_unwrap(self.inner).map_err(|inner| Self { inner, tracer })
    }

    /// Connection bound to `ctx`.
    pub fn scoped<'a>(&'a self, ctx: &'a Context) -> ScopedConnection<'a, B> {
        ScopedConnection { conn: self, ctx }
    }
}

#[async_trait]
impl<B: TraceBackend> TransactionBeginner for TracedConnection<B> {
    type Transaction = DatabaseTransaction;

    async fn begin(&self) -> Result<DatabaseTransaction, DbErr> {
        TransactionBeginner::begin(&*self.inner).await
    }
}

#[async_trait]
impl<B: TraceBackend> Preparer for TracedConnection<B> {
    type Statement = PreparedQuery;

    async fn prepare(&self, query: &str) -> Result<PreparedQuery, DbErr> {
        Preparer::prepare(&*self.inner, query).await
    }
}

/// [`TracedConnection`] bound to one request's [`Context`].
///
/// Statements run on the transaction active in the context, or on the pool
/// when there is none.
#[derive(Debug)]
pub struct ScopedConnection<'a, B: TraceBackend = TracingBackend> {
    conn: &'a TracedConnection<B>,
    ctx: &'a Context,
}

impl<B: TraceBackend> Clone for ScopedConnection<'_, B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B: TraceBackend> Copy for ScopedConnection<'_, B> {}

impl<'a, B: TraceBackend> ScopedConnection<'a, B> {
    pub fn context(&self) -> &'a Context {
        self.ctx
    }

    /// The transaction this connection runs on, if any.
    pub fn transaction(&self) -> Option<&'a TxHandle<DatabaseTransaction>> {
        Transactioner::<TracedConnection<B>>::active(self.ctx)
    }

    fn statement_options(&self, parsed: &ParsedSql, stmt: &Statement) -> Vec<TraceOpOption> {
        let mut opts = vec![TraceOpOption::statement(stmt)];
        if let Some(table) = &parsed.table {
            opts.push(TraceOpOption::table(table.as_str()));
        }
        opts
    }

    fn finish<T>(&self, span_ctx: &Context, op: &str, result: &Result<T, DbErr>, rows: Option<u64>) {
        let err = result.as_ref().err().map(|e| e as &(dyn Error + 'static));
        let opts: Vec<TraceOpOption> = rows
            .map(|rows| TraceOpOption::attribute(DB_ROWS_AFFECTED, i64::try_from(rows).unwrap_or(i64::MAX)))
            .into_iter()
            .collect();
        self.conn.tracer.end(span_ctx, op, err, &opts);
    }
}

#[async_trait]
impl<'a, B: TraceBackend> ConnectionTrait for ScopedConnection<'a, B> {
    fn get_database_backend(&self) -> DbBackend {
        self.conn.inner.get_database_backend()
    }

    async fn execute(&self, stmt: Statement) -> Result<ExecResult, DbErr> {
        let parsed = ParsedSql::parse(&stmt.sql);
        let op = parsed.operation.as_str();
        let span_ctx = self
            .conn
            .tracer
            .start(self.ctx, op, &self.statement_options(&parsed, &stmt));

        let result = match self.transaction() {
            Some(tx) => tx.execute(stmt).await,
            None => self.conn.inner.execute(stmt).await,
        };

        let rows = result.as_ref().ok().map(|r| r.rows_affected());
        self.finish(&span_ctx, op, &result, rows);
        result
    }

    async fn execute_unprepared(&self, sql: &str) -> Result<ExecResult, DbErr> {
        let parsed = ParsedSql::parse(sql);
        let op = parsed.operation.as_str();
        let mut opts = vec![TraceOpOption::query(sql)];
        if let Some(table) = &parsed.table {
            opts.push(TraceOpOption::table(table.as_str()));
        }
        let span_ctx = self.conn.tracer.start(self.ctx, op, &opts);

        let result = match self.transaction() {
            Some(tx) => tx.execute_unprepared(sql).await,
            None => self.conn.inner.execute_unprepared(sql).await,
        };

        let rows = result.as_ref().ok().map(|r| r.rows_affected());
        self.finish(&span_ctx, op, &result, rows);
        result
    }

    async fn query_one(&self, stmt: Statement) -> Result<Option<QueryResult>, DbErr> {
        let parsed = ParsedSql::parse(&stmt.sql);
        let op = parsed.operation.as_str();
        let span_ctx = self
            .conn
            .tracer
            .start(self.ctx, op, &self.statement_options(&parsed, &stmt));

        let result = match self.transaction() {
            Some(tx) => tx.query_one(stmt).await,
            None => self.conn.inner.query_one(stmt).await,
        };

        let rows = result.as_ref().ok().map(|row| u64::from(row.is_some()));
        self.finish(&span_ctx, op, &result, rows);
        result
    }

    async fn query_all(&self, stmt: Statement) -> Result<Vec<QueryResult>, DbErr> {
        let parsed = ParsedSql::parse(&stmt.sql);
        let op = parsed.operation.as_str();
        let span_ctx = self
            .conn
            .tracer
            .start(self.ctx, op, &self.statement_options(&parsed, &stmt));

        let result = match self.transaction() {
            Some(tx) => tx.query_all(stmt).await,
            None => self.conn.inner.query_all(stmt).await,
        };

        let rows = result.as_ref().ok().map(|rows| rows.len() as u64);
        self.finish(&span_ctx, op, &result, rows);
        result
    }

    fn support_returning(&self) -> bool {
        self.conn.inner.support_returning()
    }

    fn is_mock_connection(&self) -> bool {
        self.conn.inner.is_mock_connection()
    }
}

/// Boxed row stream, unifying pool and transaction streams.
pub type RowStream<'a> = Pin<Box<dyn Stream<Item = Result<QueryResult, DbErr>> + Send + 'a>>;

/// The span covers opening the stream. Rows are not counted.
impl<'c, B: TraceBackend> StreamTrait for ScopedConnection<'c, B> {
    type Stream<'a> = RowStream<'a> where Self: 'a;

    fn stream<'a>(
        &'a self,
        stmt: Statement,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Stream<'a>, DbErr>> + 'a + Send>> {
        Box::pin(async move {
            let parsed = ParsedSql::parse(&stmt.sql);
            let op = parsed.operation.as_str();
            let span_ctx = self
                .conn
                .tracer
                .start(self.ctx, op, &self.statement_options(&parsed, &stmt));

            let result: Result<RowStream<'a>, DbErr> = match self.transaction() {
                Some(tx) => tx
                    .stream(stmt)
                    .await
                    .map(|rows| Box::pin(rows) as RowStream<'a>),
                None => self
                    .conn
                    .inner
                    .stream(stmt)
                    .await
                    .map(|rows| Box::pin(rows) as RowStream<'a>),
            };

            self.finish(&span_ctx, op, &result, None);
            result
        })
    }
}

/// Extension trait for easy wrapping of database connections.
pub trait TracingExt {
    /// Wrap this connection with the given tracer.
    fn with_tracing<B: TraceBackend>(self, tracer: OpTracer<B>) -> TracedConnection<B>;
}

impl TracingExt for DatabaseConnection {
    fn with_tracing<B: TraceBackend>(self, tracer: OpTracer<B>) -> TracedConnection<B> {
        TracedConnection::new(self, tracer)
    }
}
