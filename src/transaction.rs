//! Transaction propagation through a [`Context`].
//!
//! [`Transactioner::exec`] runs a unit of work inside a transaction. The
//! outermost call begins the physical transaction and stores a [`TxHandle`]
//! in the context it hands to the unit of work; any `exec` reached with that
//! context reuses the handle instead of beginning another transaction, so a
//! chain of nested calls performs exactly one begin and one commit (or
//! rollback), no matter how deep it goes.
//!
//! This is participation, not savepoints: an error anywhere in the chain
//! rolls back everything the chain wrote once it reaches the outermost call.

use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::{DatabaseConnection, DatabaseTransaction, DbErr, TransactionTrait};

use crate::context::Context;
use crate::error::TxError;

/// Starts physical transactions.
#[async_trait]
pub trait TransactionBeginner: Send + Sync {
    type Transaction: PhysicalTransaction;

    async fn begin(&self) -> Result<Self::Transaction, DbErr>;
}

/// A physical transaction that can be finished exactly once.
#[async_trait]
pub trait PhysicalTransaction: Send + Sync + Sized + 'static {
    async fn commit(self) -> Result<(), DbErr>;

    async fn rollback(self) -> Result<(), DbErr>;
}

#[async_trait]
impl TransactionBeginner for DatabaseConnection {
    type Transaction = DatabaseTransaction;

    async fn begin(&self) -> Result<DatabaseTransaction, DbErr> {
        TransactionTrait::begin(self).await
    }
}

#[async_trait]
impl PhysicalTransaction for DatabaseTransaction {
    async fn commit(self) -> Result<(), DbErr> {
        DatabaseTransaction::commit(self).await
    }

    async fn rollback(self) -> Result<(), DbErr> {
        DatabaseTransaction::rollback(self).await
    }
}

/// Shared handle to the active transaction of a call chain.
///
/// Derefs to the physical transaction, so with SeaORM it can be passed
/// anywhere a `ConnectionTrait` is expected. Intended for sequential use
/// within the chain that created it.
#[derive(Debug)]
pub struct TxHandle<T>(Arc<T>);

impl<T> Clone for TxHandle<T> {
    fn clone(&self) -> Self {
        TxHandle(self.0.clone())
    }
}

impl<T> Deref for TxHandle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

/// What to do when a rollback fails after the unit of work already failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RollbackErrorPolicy {
    /// Log the rollback failure and return only the unit-of-work error.
    #[default]
    Discard,
    /// Return both errors as [`TxError::Rollback`].
    Surface,
}

/// Runs units of work in a shared transaction.
///
/// # Example
///
/// ```rust,ignore
/// use sea_orm::{ConnectionTrait, DbErr};
/// use sea_orm_tx_tracing::{Context, Transactioner, TxError};
///
/// let tx = Transactioner::new(db);
///
/// tx.exec(&Context::new(), |ctx| async move {
///     let conn = Transactioner::<DatabaseConnection>::active(&ctx).unwrap();
///     conn.execute_unprepared("INSERT INTO orders DEFAULT VALUES").await?;
///
///     // Joins the outer transaction instead of starting a new one.
///     tx.exec(&ctx, |ctx| async move { audit(&ctx).await })
///         .await
///         .map_err(TxError::flatten)?;
///     Ok::<_, DbErr>(())
/// })
/// .await?;
/// ```
#[derive(Debug, Clone)]
pub struct Transactioner<C> {
    conn: C,
    rollback_errors: RollbackErrorPolicy,
}

impl<C: TransactionBeginner> Transactioner<C> {
    pub fn new(conn: C) -> Self {
        Self {
            conn,
            rollback_errors: RollbackErrorPolicy::default(),
        }
    }

    /// Choose how rollback failures are reported.
    pub fn with_rollback_errors(mut self, policy: RollbackErrorPolicy) -> Self {
        self.rollback_errors = policy;
        self
    }

    pub fn connection(&self) -> &C {
        &self.conn
    }

    /// The transaction active in `ctx`, if any.
    pub fn active(ctx: &Context) -> Option<&TxHandle<C::Transaction>> {
        ctx.get::<TxHandle<C::Transaction>>()
    }

    /// Run `work` inside a transaction, joining the one active in `ctx` if there is one.
    pub async fn exec<F, Fut, T, E>(&self, ctx: &Context, work: F) -> Result<T, TxError<E>>
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if Self::active(ctx).is_some() {
            return work(ctx.clone()).await.map_err(TxError::Unit);
        }

        let tx = self.conn.begin().await.map_err(|err| {
            tracing::debug!(error = %err, "failed to begin transaction");
            TxError::Begin(err)
        })?;
        tracing::debug!("transaction started");

        let handle = Arc::new(tx);
        let scoped = ctx.with_value(TxHandle(handle.clone()));
        let outcome = work(scoped).await;

        // Every context handed to `work` should be gone by now; a surviving
        // clone means the handle escaped and cannot be finished here.
        let Ok(tx) = Arc::try_unwrap(handle) else {
            tracing::warn!("transaction handle escaped its unit of work; it will roll back on drop");
            return Err(match outcome {
                Ok(_) => TxError::HandleInUse,
                Err(err) => TxError::Unit(err),
            });
        };

        match outcome {
            Ok(value) => {
                tx.commit().await.map_err(TxError::Commit)?;
                tracing::debug!("transaction committed");
                Ok(value)
            }
            Err(err) => match tx.rollback().await {
                Ok(()) => {
                    tracing::debug!("transaction rolled back");
                    Err(TxError::Unit(err))
                }
                Err(rollback) => {
                    tracing::warn!(error = %rollback, "rollback failed after unit of work error");
                    Err(match self.rollback_errors {
                        RollbackErrorPolicy::Discard => TxError::Unit(err),
                        RollbackErrorPolicy::Surface => TxError::Rollback {
                            cause: err,
                            rollback,
                        },
                    })
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Store whose rows only become visible once a transaction commits.
    #[derive(Default)]
    struct FakeStore {
        begins: AtomicUsize,
        commits: AtomicUsize,
        rollbacks: AtomicUsize,
        committed: Mutex<Vec<String>>,
        fail_begin: bool,
        fail_commit: bool,
        fail_rollback: bool,
    }

    #[derive(Clone, Default)]
    struct FakeDb(Arc<FakeStore>);

    struct FakeTx {
        store: Arc<FakeStore>,
        pending: Mutex<Vec<String>>,
    }

    impl FakeTx {
        fn insert(&self, row: &str) {
            self.pending.lock().push(row.to_string());
        }
    }

    #[async_trait]
    impl TransactionBeginner for FakeDb {
        type Transaction = FakeTx;

        async fn begin(&self) -> Result<FakeTx, DbErr> {
            if self.0.fail_begin {
                return Err(DbErr::Custom("connection refused".into()));
            }
            self.0.begins.fetch_add(1, Ordering::SeqCst);
            Ok(FakeTx {
                store: self.0.clone(),
                pending: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl PhysicalTransaction for FakeTx {
        async fn commit(self) -> Result<(), DbErr> {
            self.store.commits.fetch_add(1, Ordering::SeqCst);
            if self.store.fail_commit {
                return Err(DbErr::Custom("commit failed".into()));
            }
            let rows = std::mem::take(&mut *self.pending.lock());
            self.store.committed.lock().extend(rows);
            Ok(())
        }

        async fn rollback(self) -> Result<(), DbErr> {
            self.store.rollbacks.fetch_add(1, Ordering::SeqCst);
            if self.store.fail_rollback {
                return Err(DbErr::Custom("rollback failed".into()));
            }
            Ok(())
        }
    }

    fn insert(ctx: &Context, row: &str) {
        Transactioner::<FakeDb>::active(ctx)
            .expect("inside a transaction")
            .insert(row);
    }

    fn counts(db: &FakeDb) -> (usize, usize, usize) {
        (
            db.0.begins.load(Ordering::SeqCst),
            db.0.commits.load(Ordering::SeqCst),
            db.0.rollbacks.load(Ordering::SeqCst),
        )
    }

    #[tokio::test]
    async fn test_nested_success_commits_both_rows() {
        let db = FakeDb::default();
        let tx = Transactioner::new(db.clone());

        let result = tx
            .exec(&Context::new(), |ctx| {
                let tx = &tx;
                async move {
                    insert(&ctx, "A");
                    tx.exec(&ctx, |ctx| async move {
                        insert(&ctx, "B");
                        Ok::<_, DbErr>(())
                    })
                    .await
                    .map_err(TxError::flatten)
                }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(counts(&db), (1, 1, 0));
        assert_eq!(*db.0.committed.lock(), vec!["A".to_string(), "B".to_string()]);
    }

    #[tokio::test]
    async fn test_nested_failure_rolls_back_everything() {
        let db = FakeDb::default();
        let tx = Transactioner::new(db.clone());

        let result: Result<(), _> = tx
            .exec(&Context::new(), |ctx| {
                let tx = &tx;
                async move {
                    insert(&ctx, "A");
                    tx.exec(&ctx, |ctx| async move {
                        insert(&ctx, "B");
                        Err::<(), _>(DbErr::Custom("inner failed".into()))
                    })
                    .await
                    .map_err(TxError::flatten)
                }
            })
            .await;

        match result {
            Err(TxError::Unit(err)) => assert_eq!(err, DbErr::Custom("inner failed".into())),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(counts(&db), (1, 0, 1));
        assert!(db.0.committed.lock().is_empty());
    }

    fn nest(
        tx: &Transactioner<FakeDb>,
        ctx: Context,
        depth: usize,
    ) -> Pin<Box<dyn Future<Output = Result<(), DbErr>> + '_>> {
        Box::pin(async move {
            insert(&ctx, &format!("row-{}", depth));
            if depth == 0 {
                return Ok(());
            }
            tx.exec(&ctx, |ctx| nest(tx, ctx, depth - 1))
                .await
                .map_err(TxError::flatten)
        })
    }

    #[tokio::test]
    async fn test_deep_nesting_begins_once() {
        let db = FakeDb::default();
        let tx = Transactioner::new(db.clone());

        tx.exec(&Context::new(), |ctx| nest(&tx, ctx, 5))
            .await
            .unwrap();

        assert_eq!(counts(&db), (1, 1, 0));
        assert_eq!(db.0.committed.lock().len(), 6);
    }

    #[tokio::test]
    async fn test_sequential_calls_use_separate_transactions() {
        let db = FakeDb::default();
        let tx = Transactioner::new(db.clone());
        let root = Context::new();

        for _ in 0..3 {
            tx.exec(&root, |ctx| async move {
                insert(&ctx, "row");
                Ok::<_, DbErr>(())
            })
            .await
            .unwrap();
        }

        assert_eq!(counts(&db), (3, 3, 0));
        assert!(Transactioner::<FakeDb>::active(&root).is_none());
    }

    #[tokio::test]
    async fn test_begin_failure_skips_work() {
        let db = FakeDb(Arc::new(FakeStore {
            fail_begin: true,
            ..Default::default()
        }));
        let tx = Transactioner::new(db.clone());
        let ran = AtomicUsize::new(0);

        let result = tx
            .exec(&Context::new(), |_| async {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok::<_, DbErr>(())
            })
            .await;

        assert!(matches!(result, Err(TxError::Begin(_))));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_commit_failure_is_returned() {
        let db = FakeDb(Arc::new(FakeStore {
            fail_commit: true,
            ..Default::default()
        }));
        let tx = Transactioner::new(db.clone());

        let result = tx
            .exec(&Context::new(), |_| async { Ok::<_, DbErr>(()) })
            .await;

        match result {
            Err(TxError::Commit(err)) => assert_eq!(err, DbErr::Custom("commit failed".into())),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rollback_failure_is_discarded_by_default() {
        let db = FakeDb(Arc::new(FakeStore {
            fail_rollback: true,
            ..Default::default()
        }));
        let tx = Transactioner::new(db.clone());

        let result = tx
            .exec(&Context::new(), |_| async {
                Err::<(), _>(DbErr::Custom("work failed".into()))
            })
            .await;

        match result {
            Err(TxError::Unit(err)) => assert_eq!(err, DbErr::Custom("work failed".into())),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(counts(&db), (1, 0, 1));
    }

    #[tokio::test]
    async fn test_rollback_failure_can_be_surfaced() {
        let db = FakeDb(Arc::new(FakeStore {
            fail_rollback: true,
            ..Default::default()
        }));
        let tx = Transactioner::new(db).with_rollback_errors(RollbackErrorPolicy::Surface);

        let result = tx
            .exec(&Context::new(), |_| async {
                Err::<(), _>(DbErr::Custom("work failed".into()))
            })
            .await;

        match result {
            Err(TxError::Rollback { cause, rollback }) => {
                assert_eq!(cause, DbErr::Custom("work failed".into()));
                assert_eq!(rollback, DbErr::Custom("rollback failed".into()));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_escaped_handle_is_reported() {
        let db = FakeDb::default();
        let tx = Transactioner::new(db.clone());
        let leaked = Mutex::new(None);

        let result = tx
            .exec(&Context::new(), |ctx| {
                let leaked = &leaked;
                async move {
                    *leaked.lock() = Some(ctx);
                    Ok::<_, DbErr>(())
                }
            })
            .await;

        assert!(matches!(result, Err(TxError::HandleInUse)));
        assert_eq!(counts(&db), (1, 0, 0));
    }

    #[tokio::test]
    async fn test_concurrent_chains_are_isolated() {
        let db = FakeDb::default();
        let tx = Arc::new(Transactioner::new(db.clone()));
        let root = Context::new();

        let mut tasks = Vec::new();
        for i in 0..8 {
            let tx = tx.clone();
            let root = root.clone();
            tasks.push(tokio::spawn(async move {
                tx.exec(&root, |ctx| async move {
                    insert(&ctx, &format!("row-{}", i));
                    tokio::task::yield_now().await;
                    if i % 2 == 0 {
                        Ok(())
                    } else {
                        Err(DbErr::Custom("odd".into()))
                    }
                })
                .await
            }));
        }
        for task in tasks {
            let _ = task.await.unwrap();
        }

        assert_eq!(counts(&db), (8, 4, 4));
        let mut committed = db.0.committed.lock().clone();
        committed.sort();
        assert_eq!(committed, vec!["row-0", "row-2", "row-4", "row-6"]);
    }
}
