//! Multi-statement transactions.

use serde::de::DeserializeOwned;

use crate::driver::{Connection, ConnectionPool};
use crate::error::PgKitResult;
use crate::executor::{self, CommitMode};
use crate::insert;
use crate::params::{Params, ValueSet};
use crate::query::Query;
use crate::schema::{Outcome, RecordSchema, TypedOutcome};

/// A transaction holding one borrowed connection.
///
/// Statements run through it share the connection and are not committed individually.
/// [`Transaction::commit`] commits once and gives the connection back; dropping the handle
/// without committing discards the connection's work.
pub struct Transaction<'a, P: ConnectionPool> {
    pool: &'a P,
    conn: P::Connection,
}

impl<'a, P: ConnectionPool> Transaction<'a, P> {
    pub(crate) fn new(pool: &'a P, conn: P::Connection) -> Self {
        Self { pool, conn }
    }

    /// Run a statement inside the transaction.
    pub async fn run(
        &mut self,
        query: impl Into<Query>,
        params: impl Into<Params>,
    ) -> PgKitResult<Outcome> {
        self.run_inner(query.into(), params.into(), None).await
    }

    /// Run a statement and convert its rows with a caller schema.
    pub async fn run_with_schema(
        &mut self,
        query: impl Into<Query>,
        params: impl Into<Params>,
        schema: &RecordSchema,
    ) -> PgKitResult<Outcome> {
        self.run_inner(query.into(), params.into(), Some(schema)).await
    }

    /// Run a statement and deserialize its rows into `T`.
    pub async fn run_as<T: DeserializeOwned>(
        &mut self,
        query: impl Into<Query>,
        params: impl Into<Params>,
    ) -> PgKitResult<TypedOutcome<T>> {
        self.run(query, params).await?.into_typed()
    }

    /// Insert records into `table`; records may have different fields.
    pub async fn insert(&mut self, table: &str, values: impl Into<ValueSet>) -> PgKitResult<u64> {
        let outcome = self
            .run_inner(insert::table_prefix(table), Params::Values(values.into()), None)
            .await?;
        Ok(outcome.len())
    }

    /// Commit and release the connection.
    pub async fn commit(self) -> PgKitResult<()> {
        let Transaction { pool, mut conn } = self;
        let result = conn.commit().await;
        pool.release(conn).await;
        tracing::debug!("Transaction committed: {}", result.is_ok());
        Ok(result?)
    }

    /// Release the connection without committing.
    pub async fn release(self) {
        let Transaction { pool, conn } = self;
        pool.release(conn).await;
    }

    async fn run_inner(
        &mut self,
        query: Query,
        params: Params,
        schema: Option<&RecordSchema>,
    ) -> PgKitResult<Outcome> {
        executor::run(
            self.pool,
            &mut self.conn,
            &query,
            &params,
            schema,
            CommitMode::Deferred,
        )
        .await
    }
}
