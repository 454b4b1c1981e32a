//! # pgkit
//!
//! > **Records in, records out.**
//!
//! pgkit runs SQL against PostgreSQL with whatever parameters you have at hand (a tuple, a
//! batch of tuples, a struct, a list of structs, or a set of structs with different fields)
//! and hands back either the affected-row count or the returned rows as records.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use pgkit::prelude::*;
//!
//! let db = Postgres::new(&PostgresConfig::new("app", "secret", "localhost"));
//!
//! // Rows, typed from the column types PostgreSQL reports
//! let outcome = db.run("SELECT id, name FROM t", ()).await?;
//!
//! // One INSERT for records with different fields; missing fields use DEFAULT
//! db.run("INSERT INTO t", ValueSet::new(vec![
//!     Record::new().with("id", 1).with("name", "a"),
//!     Record::new().with("id", 2),
//! ])).await?;
//! // => INSERT INTO t ("id", "name") VALUES ($1, $2), ($3, DEFAULT)
//! ```
//!
//! ## Parameter shapes
//!
//! | Params              | Executes as                          |
//! |---------------------|--------------------------------------|
//! | `Empty`             | one statement, nothing bound         |
//! | `Tuple`             | one statement, one tuple             |
//! | `TupleList`         | one batch, one tuple per row         |
//! | `Record`            | one statement, fields in order       |
//! | `RecordList`        | one batch, first record's field order |
//! | `Values`            | one rewritten multi-row `INSERT`     |
//!
//! Transient connection failures are retried once after the pool validates its
//! connections; everything else surfaces as a [`PgKitError`].

pub mod client;
pub mod config;
pub mod driver;
pub mod error;
pub mod executor;
pub mod insert;
pub mod params;
pub mod query;
pub mod schema;
mod ser;
pub mod sqlx_pool;
pub mod transaction;
pub mod typed;
pub mod value;

pub use client::Postgres;
pub use config::PostgresConfig;
pub use error::{PgKitError, PgKitResult};
pub use params::{Params, ValueSet};
pub use query::{Composed, Query};
pub use schema::{ColumnType, Outcome, RecordSchema, TypedOutcome};
pub use transaction::Transaction;
pub use value::{Record, Value};

pub mod prelude {
    pub use crate::client::Postgres;
    pub use crate::config::PostgresConfig;
    pub use crate::driver::{Connection, ConnectionPool, DriverError, DriverErrorKind};
    pub use crate::error::*;
    pub use crate::params;
    pub use crate::params::{Params, ValueSet};
    pub use crate::query::{Composed, Query, ToSql};
    pub use crate::schema::{ColumnDescriptor, ColumnType, Outcome, RecordSchema, TypedOutcome};
    pub use crate::sqlx_pool::SqlxPool;
    pub use crate::transaction::Transaction;
    pub use crate::value::{Record, Value};
}
