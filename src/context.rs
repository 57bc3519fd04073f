//! Request-scoped, immutable value carrier.
//!
//! The carrier is [`opentelemetry::Context`]. Deriving a scope with
//! `with_value` returns a new context; the original, and anyone else holding
//! it, keeps seeing exactly what it saw before. Values are addressed by type,
//! so each carried concern gets its own newtype: the transactioner stores a
//! [`TxHandle`](crate::TxHandle) and the span backends store the active span
//! behind a private wrapper.
//!
//! ```rust
//! use sea_orm_tx_tracing::Context;
//!
//! #[derive(Debug, PartialEq)]
//! struct RequestId(u64);
//!
//! let root = Context::new();
//! let scoped = root.with_value(RequestId(42));
//!
//! assert_eq!(scoped.get::<RequestId>(), Some(&RequestId(42)));
//! assert_eq!(root.get::<RequestId>(), None);
//! ```

pub use opentelemetry::Context;
