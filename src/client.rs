//! The caller-facing entry point.

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::PostgresConfig;
use crate::driver::{Connection, ConnectionPool};
use crate::error::PgKitResult;
use crate::executor::{self, CommitMode};
use crate::insert;
use crate::params::{Params, ValueSet};
use crate::query::Query;
use crate::schema::{Outcome, RecordSchema, TypedOutcome};
use crate::sqlx_pool::SqlxPool;
use crate::transaction::Transaction;

/// A PostgreSQL client over a connection pool.
///
/// The pool opens on first use and stays open until [`Postgres::close`].
///
/// # Example
///
/// ```rust,ignore
/// use pgkit::prelude::*;
///
/// let db = Postgres::new(&PostgresConfig::new("app", "secret", "localhost"));
///
/// let users = db.run("SELECT id, name FROM users WHERE active = $1", params![true]).await?;
///
/// db.insert("users", vec![
///     Record::new().with("id", 3).with("name", "c"),
///     Record::new().with("id", 4),
/// ]).await?;
/// ```
pub struct Postgres<P: ConnectionPool = SqlxPool> {
    pool: P,
    open: AtomicBool,
}

impl Postgres<SqlxPool> {
    /// Create a client that connects lazily with the given configuration.
    pub fn new(config: &PostgresConfig) -> Self {
        Self::with_pool(SqlxPool::new(config))
    }
}

impl<P: ConnectionPool> Postgres<P> {
    /// Create a client over any pool implementation.
    pub fn with_pool(pool: P) -> Self {
        Self {
            pool,
            open: AtomicBool::new(false),
        }
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }

    /// Execute a query and return its rows or affected-row count.
    ///
    /// Column types are inferred from the driver's type names.
    pub async fn run(
        &self,
        query: impl Into<Query>,
        params: impl Into<Params>,
    ) -> PgKitResult<Outcome> {
        self.run_inner(query.into(), params.into(), None).await
    }

    /// Execute a query and convert its rows with a caller schema, matched by position.
    pub async fn run_with_schema(
        &self,
        query: impl Into<Query>,
        params: impl Into<Params>,
        schema: &RecordSchema,
    ) -> PgKitResult<Outcome> {
        self.run_inner(query.into(), params.into(), Some(schema)).await
    }

    /// Execute a query and deserialize its rows into `T`, matched by field name.
    pub async fn run_as<T: DeserializeOwned>(
        &self,
        query: impl Into<Query>,
        params: impl Into<Params>,
    ) -> PgKitResult<TypedOutcome<T>> {
        self.run(query, params).await?.into_typed()
    }

    /// Insert records into `table` with one statement; records may have different fields.
    pub async fn insert(&self, table: &str, values: impl Into<ValueSet>) -> PgKitResult<u64> {
        let outcome = self
            .run_inner(insert::table_prefix(table), Params::Values(values.into()), None)
            .await?;
        Ok(outcome.len())
    }

    /// Start a transaction on a freshly borrowed connection.
    pub async fn begin(&self) -> PgKitResult<Transaction<'_, P>> {
        self.ensure_open().await?;
        let mut conn = self.pool.borrow().await?;
        if let Err(e) = conn.begin().await {
            self.pool.release(conn).await;
            return Err(e.into());
        }
        Ok(Transaction::new(&self.pool, conn))
    }

    /// Run `f` inside a transaction.
    ///
    /// Commits exactly once when `f` succeeds. On error nothing is committed and the
    /// connection is handed back to the pool either way.
    ///
    /// ```rust,ignore
    /// db.transaction(|tx| Box::pin(async move {
    ///     tx.run("UPDATE accounts SET balance = balance - $1 WHERE id = $2", params![10, 1]).await?;
    ///     tx.run("UPDATE accounts SET balance = balance + $1 WHERE id = $2", params![10, 2]).await?;
    ///     Ok::<_, PgKitError>(())
    /// })).await?;
    /// ```
    pub async fn transaction<F, T>(&self, f: F) -> PgKitResult<T>
    where
        F: for<'t> FnOnce(&'t mut Transaction<'_, P>) -> BoxFuture<'t, PgKitResult<T>>,
    {
        let mut tx = self.begin().await?;
        match f(&mut tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(e) => {
                tx.release().await;
                Err(e)
            }
        }
    }

    /// Borrow a raw connection. Hand it back with [`Postgres::release`].
    pub async fn connection(&self) -> PgKitResult<P::Connection> {
        self.ensure_open().await?;
        Ok(self.pool.borrow().await?)
    }

    pub async fn release(&self, conn: P::Connection) {
        self.pool.release(conn).await;
    }

    /// Close the pool. A later call reopens it.
    pub async fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            self.pool.close().await;
        }
    }

    async fn ensure_open(&self) -> PgKitResult<()> {
        if !self.open.load(Ordering::Acquire) {
            self.pool.open().await?;
            self.open.store(true, Ordering::Release);
        }
        Ok(())
    }

    async fn run_inner(
        &self,
        query: Query,
        params: Params,
        schema: Option<&RecordSchema>,
    ) -> PgKitResult<Outcome> {
        self.ensure_open().await?;
        let mut conn = self.pool.borrow().await?;
        let result = executor::run(
            &self.pool,
            &mut conn,
            &query,
            &params,
            schema,
            CommitMode::Auto,
        )
        .await;
        self.pool.release(conn).await;
        result
    }
}
