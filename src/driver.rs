//! Driver boundary.
//!
//! The execution pipeline only talks to a database through these two traits. A
//! [`ConnectionPool`] lends out [`Connection`]s; a connection owns its cursor state, so the
//! rows, columns and affected count it reports always belong to the last statement it ran.
//!
//! [`crate::sqlx_pool`] implements them on top of `sqlx`.

use async_trait::async_trait;
use std::fmt;

use crate::schema::ColumnDescriptor;
use crate::value::Value;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Broad classification of a driver failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// The connection is stale or broken; a reconnect may fix it.
    Transient,
    /// The database rejected the statement (syntax, constraint, type).
    Statement,
}

/// A failure reported by the driver, carrying the original cause.
#[derive(Debug)]
pub struct DriverError {
    kind: DriverErrorKind,
    message: String,
    source: Option<BoxError>,
}

impl DriverError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: DriverErrorKind::Transient,
            message: message.into(),
            source: None,
        }
    }

    pub fn statement(message: impl Into<String>) -> Self {
        Self {
            kind: DriverErrorKind::Statement,
            message: message.into(),
            source: None,
        }
    }

    /// Attach the underlying error.
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn kind(&self) -> DriverErrorKind {
        self.kind
    }

    pub fn is_transient(&self) -> bool {
        self.kind == DriverErrorKind::Transient
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DriverErrorKind::Transient => write!(f, "connection failure: {}", self.message),
            DriverErrorKind::Statement => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for DriverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Result type for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

/// A pool of database connections.
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    type Connection: Connection;

    /// Open the pool. Called once before the first borrow; must be idempotent.
    async fn open(&self) -> DriverResult<()>;

    /// Borrow a connection, waiting for one to become available.
    async fn borrow(&self) -> DriverResult<Self::Connection>;

    /// Give a borrowed connection back.
    async fn release(&self, conn: Self::Connection);

    /// Check pooled connections and evict broken ones.
    async fn validate(&self) -> DriverResult<()>;

    /// Close the pool and every idle connection.
    async fn close(&self);
}

/// A borrowed connection together with its cursor.
#[async_trait]
pub trait Connection: Send {
    /// Execute one statement with one (possibly empty) tuple of values.
    async fn execute(&mut self, sql: &str, params: &[Value]) -> DriverResult<()>;

    /// Execute one statement once per tuple, as a single logical batch.
    async fn execute_batch(&mut self, sql: &str, params: &[Vec<Value>]) -> DriverResult<()>;

    /// Rows produced by the last statement, in database order.
    async fn fetch_all(&mut self) -> DriverResult<Vec<Vec<Value>>>;

    /// Column metadata of the last statement; empty when it produced no result set.
    fn columns(&self) -> Vec<ColumnDescriptor>;

    /// Rows affected (or matched) by the last statement.
    fn affected_rows(&self) -> u64;

    /// Command tag of the last statement, such as `SELECT` or `INSERT`.
    fn command_tag(&self) -> Option<String>;

    /// Start an explicit transaction; statements run inside it until [`Connection::commit`].
    async fn begin(&mut self) -> DriverResult<()>;

    /// Commit the active transaction, if any.
    async fn commit(&mut self) -> DriverResult<()>;
}
