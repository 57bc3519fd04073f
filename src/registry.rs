//! Prepared statement cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use sea_orm::{
    ConnectionTrait, DatabaseConnection, DbBackend, DbErr, Statement, TransactionTrait, Value,
};

use crate::error::StatementError;

/// A statement handle that can be released.
pub trait PreparedStatement: Send + Sync + 'static {
    fn close(&self) -> Result<(), DbErr>;
}

/// Prepares statements from query text.
#[async_trait]
pub trait Preparer: Send + Sync {
    type Statement: PreparedStatement;

    async fn prepare(&self, query: &str) -> Result<Self::Statement, DbErr>;
}

/// Query text bound to a backend, ready to be bound and executed.
///
/// SeaORM drivers cache prepared statements per connection, so holding the
/// text plus backend is all a cached entry needs. Preparing through a
/// `DatabaseConnection` has the server parse the query first, so syntax
/// errors and unknown tables fail at registration.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedQuery {
    backend: DbBackend,
    sql: String,
}

impl PreparedQuery {
    pub fn new(backend: DbBackend, sql: impl Into<String>) -> Result<Self, DbErr> {
        let sql = sql.into();
        if sql.trim().is_empty() {
            return Err(DbErr::Custom("cannot prepare an empty query".to_string()));
        }
        Ok(Self { backend, sql })
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn backend(&self) -> DbBackend {
        self.backend
    }

    /// Statement with no bound values.
    pub fn statement(&self) -> Statement {
        Statement::from_string(self.backend, self.sql.clone())
    }

    /// Statement with `values` bound to its placeholders.
    pub fn bind<I>(&self, values: I) -> Statement
    where
        I: IntoIterator<Item = Value>,
    {
        Statement::from_sql_and_values(self.backend, self.sql.clone(), values)
    }
}

/// Validation deallocates its server-side statement, so there is nothing
/// left to release.
impl PreparedStatement for PreparedQuery {
    fn close(&self) -> Result<(), DbErr> {
        Ok(())
    }
}

static NEXT_VALIDATION: AtomicU64 = AtomicU64::new(0);

/// Statements that make the server parse and plan `sql` without running it.
fn validation_statements(backend: DbBackend, name: &str, sql: &str) -> Vec<String> {
    match backend {
        DbBackend::Postgres => vec![
            format!("PREPARE {} AS {}", name, sql),
            format!("DEALLOCATE {}", name),
        ],
        DbBackend::MySql => vec![
            format!(
                "PREPARE {} FROM '{}'",
                name,
                sql.replace('\\', "\\\\").replace('\'', "''")
            ),
            format!("DEALLOCATE PREPARE {}", name),
        ],
        DbBackend::Sqlite => vec![format!("EXPLAIN {}", sql)],
    }
}

#[async_trait]
impl Preparer for DatabaseConnection {
    type Statement = PreparedQuery;

    async fn prepare(&self, query: &str) -> Result<PreparedQuery, DbErr> {
        let prepared = PreparedQuery::new(self.get_database_backend(), query)?;
        let name = format!(
            "sea_orm_tx_validate_{}",
            NEXT_VALIDATION.fetch_add(1, Ordering::Relaxed)
        );

        // The transaction pins one pooled connection for PREPARE and DEALLOCATE.
        let txn = self.begin().await?;
        let mut outcome = Ok(());
        for sql in validation_statements(prepared.backend(), &name, prepared.sql()) {
            if let Err(err) = txn.execute_unprepared(&sql).await {
                outcome = Err(err);
                break;
            }
        }
        if let Err(err) = txn.rollback().await {
            tracing::debug!(error = %err, "rollback after statement validation failed");
        }

        outcome.map(|()| prepared)
    }
}

/// Concurrency-safe map from statement id to prepared statement.
///
/// Lookups share a read lock; registration and [`close`](Self::close) take
/// the write lock. Preparation itself runs outside the lock.
///
/// # Example
///
/// ```rust,ignore
/// let registry = StatementRegistry::new(db.clone());
/// registry.must_register("select_one", "SELECT 1").await;
///
/// let stmt = registry.get("select_one")?;
/// db.query_one(stmt.statement()).await?;
/// ```
pub struct StatementRegistry<P: Preparer> {
    preparer: P,
    statements: RwLock<HashMap<String, Arc<P::Statement>>>,
}

impl<P: Preparer> StatementRegistry<P> {
    pub fn new(preparer: P) -> Self {
        Self {
            preparer,
            statements: RwLock::new(HashMap::new()),
        }
    }

    /// Prepare `query` and cache it under `id`.
    pub async fn register(&self, id: &str, query: &str) -> Result<(), StatementError> {
        if self.statements.read().contains_key(id) {
            return Err(StatementError::AlreadyRegistered(id.to_string()));
        }

        let statement = self
            .preparer
            .prepare(query)
            .await
            .map_err(|source| StatementError::Prepare {
                id: id.to_string(),
                source,
            })?;

        let mut statements = self.statements.write();
        if statements.contains_key(id) {
            // Lost a race with a concurrent registration of the same id.
            drop(statements);
            if let Err(err) = statement.close() {
                tracing::warn!(id, error = %err, "failed to close duplicate statement");
            }
            return Err(StatementError::AlreadyRegistered(id.to_string()));
        }
        statements.insert(id.to_string(), Arc::new(statement));
        tracing::debug!(id, "statement registered");
        Ok(())
    }

    /// The statement cached under `id`.
    pub fn get(&self, id: &str) -> Result<Arc<P::Statement>, StatementError> {
        self.statements
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StatementError::NotRegistered(id.to_string()))
    }

    /// Close and drop every cached statement.
    ///
    /// All statements are closed even if some fail; the failures are returned together.
    pub fn close(&self) -> Result<(), StatementError> {
        let mut statements = self.statements.write();
        let failures: Vec<(String, DbErr)> = statements
            .drain()
            .filter_map(|(id, statement)| statement.close().err().map(|err| (id, err)))
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(StatementError::Close(failures))
        }
    }

    pub fn count(&self) -> usize {
        self.statements.read().len()
    }

    /// [`register`](Self::register), panicking on failure. For startup wiring.
    pub async fn must_register(&self, id: &str, query: &str) {
        if let Err(err) = self.register(id, query).await {
            panic!("failed to register statement: {}", err);
        }
    }

    /// [`get`](Self::get), panicking on failure. For statements registered at startup.
    pub fn must_get(&self, id: &str) -> Arc<P::Statement> {
        match self.get(id) {
            Ok(statement) => statement,
            Err(err) => panic!("{}", err),
        }
    }
}

impl<P: Preparer> std::fmt::Debug for StatementRegistry<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let statements = self.statements.read();
        let mut ids: Vec<&String> = statements.keys().collect();
        ids.sort();
        f.debug_struct("StatementRegistry").field("statements", &ids).finish()
    }
}
