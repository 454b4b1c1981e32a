//! Statement execution with a single retry on transient connection failures.
//!
//! Each call walks `normalize -> dispatch -> commit`. If dispatch fails with a
//! connection-level error on the first attempt, the pool is asked to validate its
//! connections and the whole sequence runs once more. Statement errors are never retried.

use crate::driver::{Connection, ConnectionPool, DriverResult};
use crate::error::PgKitResult;
use crate::params::{self, Binding, Params, Statement};
use crate::query::{Query, ToSql};
use crate::schema::{self, Outcome, RecordSchema};

/// Attempts per call: the first try plus exactly one retry.
pub const MAX_ATTEMPTS: u32 = 2;

/// Whether the executor commits after a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    /// Commit after every statement that is not a `SELECT`.
    Auto,
    /// An enclosing transaction commits at scope exit.
    Deferred,
}

/// Run `query` with `params` on `conn`.
///
/// The outcome is left on the connection; see [`schema::materialize`].
pub async fn execute<P>(
    pool: &P,
    conn: &mut P::Connection,
    query: &Query,
    params: &Params,
    commit: CommitMode,
) -> PgKitResult<()>
where
    P: ConnectionPool + ?Sized,
{
    for attempt in 1..=MAX_ATTEMPTS {
        let statement = params::normalize(query, params)?;

        match dispatch(conn, &statement).await {
            Ok(()) => {
                if commit == CommitMode::Auto && !is_read_only(conn.command_tag().as_deref()) {
                    conn.commit().await?;
                }
                return Ok(());
            }
            Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                tracing::warn!(attempt, "Transient failure, validating pool before retry: {}", e);
                if let Err(ve) = pool.validate().await {
                    tracing::warn!("Pool validation failed: {}", ve);
                }
            }
            Err(e) => return Err(e.into()),
        }
    }

    unreachable!("the last attempt always returns")
}

/// Execute, then materialize the result.
pub async fn run<P>(
    pool: &P,
    conn: &mut P::Connection,
    query: &Query,
    params: &Params,
    schema: Option<&RecordSchema>,
    commit: CommitMode,
) -> PgKitResult<Outcome>
where
    P: ConnectionPool + ?Sized,
{
    execute(pool, conn, query, params, commit).await?;
    schema::materialize(conn, schema).await
}

async fn dispatch<C>(conn: &mut C, statement: &Statement) -> DriverResult<()>
where
    C: Connection + ?Sized,
{
    let sql = statement.query.to_sql();
    match &statement.binding {
        Binding::None => {
            tracing::debug!("Executing: {}", sql);
            conn.execute(&sql, &[]).await
        }
        Binding::Single(values) => {
            tracing::debug!("Executing with {} value(s): {}", values.len(), sql);
            conn.execute(&sql, values).await
        }
        Binding::Batch(tuples) => {
            tracing::debug!("Executing batch of {}: {}", tuples.len(), sql);
            conn.execute_batch(&sql, tuples).await
        }
    }
}

fn is_read_only(command_tag: Option<&str>) -> bool {
    command_tag.is_some_and(|tag| tag.trim_start().to_ascii_uppercase().starts_with("SELECT"))
}
