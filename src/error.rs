//! Error types.

use sea_orm::DbErr;
use thiserror::Error;

/// Invalid tracing configuration. Raised at construction, never at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("database system identifier must not be empty")]
    EmptySystem,

    #[error("database name must not be empty")]
    EmptyDatabaseName,

    #[error("invalid database name attribute key {0:?}, expected \"db.name\" or \"db.namespace\"")]
    InvalidDbNameKey(String),

    #[error("invalid table attribute key {0:?}, expected \"db.sql.table\" or \"db.collection.name\"")]
    InvalidTableKey(String),

    #[error("at least one traceable operation is required")]
    EmptyOperations,

    #[error("invalid connection descriptor: {0}")]
    InvalidConnection(String),
}

/// Statement registry failures.
#[derive(Debug, Error)]
pub enum StatementError {
    #[error("statement {0:?} is already registered")]
    AlreadyRegistered(String),

    #[error("statement {0:?} is not registered")]
    NotRegistered(String),

    #[error("failed to prepare statement {id:?}: {source}")]
    Prepare {
        id: String,
        #[source]
        source: DbErr,
    },

    #[error("failed to close {} statement(s): {}", .0.len(), format_close_failures(.0))]
    Close(Vec<(String, DbErr)>),
}

fn format_close_failures(failures: &[(String, DbErr)]) -> String {
    failures
        .iter()
        .map(|(id, err)| format!("{}: {}", id, err))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Outcome of a failed [`Transactioner::exec`](crate::Transactioner::exec).
#[derive(Debug, Error)]
pub enum TxError<E> {
    /// The physical transaction could not be started; the unit of work did not run.
    #[error("failed to begin transaction: {0}")]
    Begin(DbErr),

    /// The unit of work failed and the transaction was rolled back.
    #[error("{0}")]
    Unit(E),

    /// The unit of work failed and the rollback failed too.
    ///
    /// Only produced with [`RollbackErrorPolicy::Surface`](crate::RollbackErrorPolicy::Surface).
    #[error("{cause} (rollback also failed: {rollback})")]
    Rollback { cause: E, rollback: DbErr },

    /// The unit of work succeeded but the commit failed.
    #[error("failed to commit transaction: {0}")]
    Commit(DbErr),

    /// A context carrying the transaction outlived the unit of work, so the
    /// transaction could not be reclaimed for commit.
    #[error("transaction handle is still referenced after the unit of work returned")]
    HandleInUse,
}

impl<E> TxError<E> {
    /// The unit-of-work error, if the failure originated there.
    pub fn cause(&self) -> Option<&E> {
        match self {
            TxError::Unit(cause) | TxError::Rollback { cause, .. } => Some(cause),
            _ => None,
        }
    }

    /// Collapse into the unit-of-work error type.
    ///
    /// Lets a nested `exec` compose with `?` inside an outer unit of work.
    pub fn flatten(self) -> E
    where
        E: From<DbErr>,
    {
        match self {
            TxError::Unit(cause) | TxError::Rollback { cause, .. } => cause,
            TxError::Begin(err) | TxError::Commit(err) => E::from(err),
            TxError::HandleInUse => E::from(DbErr::Custom(
                "transaction handle is still referenced".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_error_messages_are_distinguishable() {
        let dup = StatementError::AlreadyRegistered("select_one".into()).to_string();
        let miss = StatementError::NotRegistered("select_one".into()).to_string();
        assert!(dup.contains("already registered"));
        assert!(miss.contains("not registered"));
    }

    #[test]
    fn test_close_error_lists_every_failure() {
        let err = StatementError::Close(vec![
            ("a".into(), DbErr::Custom("boom".into())),
            ("b".into(), DbErr::Custom("bang".into())),
        ]);
        let msg = err.to_string();
        assert!(msg.starts_with("failed to close 2 statement(s)"));
        assert!(msg.contains("a: Custom Error: boom"));
        assert!(msg.contains("b: Custom Error: bang"));
    }

    #[test]
    fn test_flatten_keeps_cause() {
        let err: TxError<DbErr> = TxError::Rollback {
            cause: DbErr::Custom("work".into()),
            rollback: DbErr::Custom("rollback".into()),
        };
        assert_eq!(err.flatten(), DbErr::Custom("work".into()));

        let err: TxError<DbErr> = TxError::Commit(DbErr::Custom("commit".into()));
        assert_eq!(err.flatten(), DbErr::Custom("commit".into()));
    }
}
