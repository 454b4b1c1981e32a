//! `sqlx` implementation of the driver boundary.
//!
//! [`SqlxPool`] wraps a lazily opened `sqlx::PgPool`. Each [`SqlxConnection`] buffers the
//! rows and affected count of the last statement it ran, which is what the materializer
//! reads back.

use async_trait::async_trait;
use futures::TryStreamExt;
use serde::Serialize;
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::pool::PoolConnection;
use sqlx::postgres::types::{Oid, PgInterval, PgTimeTz};
use sqlx::postgres::{
    PgArgumentBuffer, PgArguments, PgConnectOptions, PgHasArrayType, PgPoolOptions, PgRow,
    PgTypeInfo, PgValueFormat, Postgres,
};
use sqlx::query::Query as SqlxQuery;
use sqlx::types::ipnetwork::IpNetwork;
use sqlx::{Column, Either, PgPool, Row, TypeInfo, ValueRef};
use tokio::sync::RwLock;

use crate::config::PostgresConfig;
use crate::driver::{Connection, ConnectionPool, DriverError, DriverResult};
use crate::schema::ColumnDescriptor;
use crate::value::Value;

/// A connection pool backed by `sqlx`.
pub struct SqlxPool {
    options: Option<(PgConnectOptions, PgPoolOptions)>,
    pool: RwLock<Option<PgPool>>,
}

impl SqlxPool {
    /// Create a pool that connects on [`ConnectionPool::open`].
    pub fn new(config: &PostgresConfig) -> Self {
        let connect = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.database);
        let pool = PgPoolOptions::new()
            .min_connections(config.pool_min_size)
            .max_connections(config.pool_max_size)
            .acquire_timeout(config.acquire_timeout_duration());

        Self {
            options: Some((connect, pool)),
            pool: RwLock::new(None),
        }
    }

    /// Wrap an already connected `sqlx` pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            options: None,
            pool: RwLock::new(Some(pool)),
        }
    }

    async fn current(&self) -> DriverResult<PgPool> {
        self.pool
            .read()
            .await
            .clone()
            .ok_or_else(|| DriverError::statement("connection pool is closed"))
    }
}

#[async_trait]
impl ConnectionPool for SqlxPool {
    type Connection = SqlxConnection;

    async fn open(&self) -> DriverResult<()> {
        let mut slot = self.pool.write().await;
        if slot.is_some() {
            return Ok(());
        }
        let Some((connect, options)) = &self.options else {
            return Err(DriverError::statement(
                "externally supplied pool was closed and cannot be reopened",
            ));
        };

        tracing::info!("Opening connection pool...");
        let pool = options
            .clone()
            .connect_with(connect.clone())
            .await
            .map_err(classify)?;
        tracing::info!("Connection pool: {} idle, {} total", pool.num_idle(), pool.size());
        *slot = Some(pool);
        Ok(())
    }

    async fn borrow(&self) -> DriverResult<SqlxConnection> {
        let pool = self.current().await?;
        let conn = pool.acquire().await.map_err(classify)?;
        Ok(SqlxConnection::new(conn, pool))
    }

    async fn release(&self, mut conn: SqlxConnection) {
        conn.abandon_transaction().await;
    }

    async fn validate(&self) -> DriverResult<()> {
        use sqlx::Connection as _;

        let pool = self.current().await?;
        let mut evicted = 0;
        for _ in 0..pool.num_idle() {
            let Some(mut conn) = pool.try_acquire() else {
                break;
            };
            if conn.ping().await.is_err() {
                drop(conn.detach());
                evicted += 1;
            }
        }
        tracing::debug!("Pool validation evicted {} connection(s)", evicted);
        Ok(())
    }

    async fn close(&self) {
        if let Some(pool) = self.pool.write().await.take() {
            pool.close().await;
            tracing::info!("Connection pool closed");
        }
    }
}

/// A pooled `sqlx` connection plus the buffered result of its last statement.
pub struct SqlxConnection {
    conn: Option<PoolConnection<Postgres>>,
    pool: PgPool,
    broken: bool,
    in_transaction: bool,
    rows: Vec<PgRow>,
    columns: Vec<ColumnDescriptor>,
    affected: u64,
    tag: Option<String>,
}

impl SqlxConnection {
    fn new(conn: PoolConnection<Postgres>, pool: PgPool) -> Self {
        Self {
            conn: Some(conn),
            pool,
            broken: false,
            in_transaction: false,
            rows: Vec::new(),
            columns: Vec::new(),
            affected: 0,
            tag: None,
        }
    }

    /// The live connection, replacing a broken one when no transaction depends on it.
    async fn live(&mut self) -> DriverResult<&mut PoolConnection<Postgres>> {
        if self.broken {
            if self.in_transaction {
                return Err(DriverError::transient(
                    "connection was lost inside a transaction",
                ));
            }
            if let Some(old) = self.conn.take() {
                drop(old.detach());
            }
            self.conn = Some(self.pool.acquire().await.map_err(classify)?);
            self.broken = false;
        }
        self.conn
            .as_mut()
            .ok_or_else(|| DriverError::transient("connection already released"))
    }

    fn reset(&mut self, sql: &str) {
        self.rows.clear();
        self.columns.clear();
        self.affected = 0;
        self.tag = leading_keyword(sql);
    }

    fn fail(&mut self, e: sqlx::Error) -> DriverError {
        let err = classify(e);
        if err.is_transient() {
            self.broken = true;
        }
        err
    }

    async fn simple(&mut self, sql: &str) -> DriverResult<()> {
        let conn = self.live().await?;
        let result = sqlx::query(sql).execute(&mut **conn).await;
        result.map(|_| ()).map_err(|e| self.fail(e))
    }

    async fn run_one(&mut self, sql: &str, params: &[Value]) -> DriverResult<(u64, Vec<PgRow>)> {
        let conn = self.live().await?;
        let query = params
            .iter()
            .fold(sqlx::query(sql), |query, value| bind_value(query, value));

        let mut affected = 0;
        let mut rows = Vec::new();
        #[allow(deprecated)]
        let mut stream = query.fetch_many(&mut **conn);
        let outcome: Result<(), sqlx::Error> = async {
            while let Some(item) = stream.try_next().await? {
                match item {
                    Either::Left(done) => affected += done.rows_affected(),
                    Either::Right(row) => rows.push(row),
                }
            }
            Ok(())
        }
        .await;
        drop(stream);

        match outcome {
            Ok(()) => Ok((affected, rows)),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Roll back a transaction left open by a failed scope before the connection goes back
    /// to the pool.
    async fn abandon_transaction(&mut self) {
        if !self.in_transaction {
            return;
        }
        if let Err(e) = self.simple("ROLLBACK").await {
            tracing::warn!("Rollback on release failed, discarding connection: {}", e);
            if let Some(conn) = self.conn.take() {
                drop(conn.detach());
            }
        }
        self.in_transaction = false;
    }
}

impl Drop for SqlxConnection {
    fn drop(&mut self) {
        // A connection still inside a transaction must not be reused; closing the socket
        // makes the server roll it back.
        if self.in_transaction
            && let Some(conn) = self.conn.take()
        {
            drop(conn.detach());
        }
    }
}

#[async_trait]
impl Connection for SqlxConnection {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> DriverResult<()> {
        self.reset(sql);
        let (affected, rows) = self.run_one(sql, params).await?;
        if let Some(first) = rows.first() {
            self.columns = first
                .columns()
                .iter()
                .map(|c| ColumnDescriptor::new(c.name(), c.type_info().name()))
                .collect();
        }
        self.affected = affected;
        self.rows = rows;
        Ok(())
    }

    async fn execute_batch(&mut self, sql: &str, params: &[Vec<Value>]) -> DriverResult<()> {
        self.reset(sql);
        let own_transaction = !self.in_transaction;
        if own_transaction {
            self.simple("BEGIN").await?;
        }

        let mut total = 0;
        for tuple in params {
            match self.run_one(sql, tuple).await {
                Ok((affected, _)) => total += affected,
                Err(e) => {
                    if own_transaction && !self.broken {
                        let _ = self.simple("ROLLBACK").await;
                    }
                    return Err(e);
                }
            }
        }

        if own_transaction {
            self.simple("COMMIT").await?;
        }
        self.affected = total;
        Ok(())
    }

    async fn fetch_all(&mut self) -> DriverResult<Vec<Vec<Value>>> {
        Ok(std::mem::take(&mut self.rows)
            .iter()
            .map(|row| (0..row.len()).map(|i| decode_cell(row, i)).collect())
            .collect())
    }

    fn columns(&self) -> Vec<ColumnDescriptor> {
        self.columns.clone()
    }

    fn affected_rows(&self) -> u64 {
        self.affected
    }

    fn command_tag(&self) -> Option<String> {
        self.tag.clone()
    }

    async fn begin(&mut self) -> DriverResult<()> {
        self.simple("BEGIN").await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> DriverResult<()> {
        if !self.in_transaction {
            return Ok(());
        }
        self.simple("COMMIT").await?;
        self.in_transaction = false;
        Ok(())
    }
}

/// A NULL bound without a declared type, so the server infers it from context.
struct UntypedNull;

impl sqlx::Type<Postgres> for UntypedNull {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_oid(Oid(0))
    }
}

impl sqlx::Encode<'_, Postgres> for UntypedNull {
    fn encode_by_ref(&self, _buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        Ok(IsNull::Yes)
    }
}

fn bind_value<'q>(
    query: SqlxQuery<'q, Postgres, PgArguments>,
    value: &Value,
) -> SqlxQuery<'q, Postgres, PgArguments> {
    match value {
        Value::Null => query.bind(UntypedNull),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.clone()),
        Value::Date(v) => query.bind(*v),
        Value::DateTime(v) => query.bind(*v),
        Value::Uuid(v) => query.bind(*v),
        Value::Decimal(v) => query.bind(*v),
        Value::Json(v) => query.bind(sqlx::types::Json(v.clone())),
    }
}

/// Decode one cell by the column's reported type name.
///
/// Types without a decoder here, and cells a decoder rejects, fall back to the raw wire
/// value, so one unusual column never fails the whole result.
fn decode_cell(row: &PgRow, index: usize) -> Value {
    fn get<'r, T>(row: &'r PgRow, index: usize) -> Result<Option<T>, sqlx::Error>
    where
        T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
    {
        row.try_get::<Option<T>, _>(index)
    }

    fn array<T>(row: &PgRow, index: usize) -> Result<Option<Value>, sqlx::Error>
    where
        T: for<'a> sqlx::Decode<'a, Postgres> + sqlx::Type<Postgres> + PgHasArrayType + Serialize,
    {
        get::<Vec<Option<T>>>(row, index)
            .map(|v| v.map(|items| Value::Json(serde_json::to_value(items).unwrap_or_default())))
    }

    let text = |v: Option<String>| v.map(Value::Text);

    let column = &row.columns()[index];
    let type_name = column.type_info().name();

    let decoded = match type_name {
        "BOOL" => get::<bool>(row, index).map(|v| v.map(Value::Bool)),
        "INT2" => get::<i16>(row, index).map(|v| v.map(Value::from)),
        "INT4" => get::<i32>(row, index).map(|v| v.map(Value::from)),
        "INT8" => get::<i64>(row, index).map(|v| v.map(Value::Int)),
        "OID" => get::<Oid>(row, index).map(|v| v.map(|oid| Value::Int(oid.0.into()))),
        "FLOAT4" => get::<f32>(row, index).map(|v| v.map(Value::from)),
        "FLOAT8" => get::<f64>(row, index).map(|v| v.map(Value::Float)),
        "NUMERIC" => get::<rust_decimal::Decimal>(row, index)
            .map(|v| v.map(Value::Decimal))
            .or_else(|e| {
                raw_bytes(row, index)
                    .and_then(numeric_to_f64)
                    .map(|f| Some(Value::Float(f)))
                    .ok_or(e)
            }),
        "DATE" => get::<chrono::NaiveDate>(row, index).map(|v| v.map(Value::Date)),
        "TIMESTAMP" => get::<chrono::NaiveDateTime>(row, index).map(|v| v.map(Value::DateTime)),
        "TIMESTAMPTZ" => get::<chrono::DateTime<chrono::Utc>>(row, index)
            .map(|v| v.map(|dt| Value::DateTime(dt.naive_utc()))),
        "TIME" => get::<chrono::NaiveTime>(row, index).map(|v| text(v.map(|t| t.to_string()))),
        "TIMETZ" => get::<PgTimeTz<chrono::NaiveTime, chrono::FixedOffset>>(row, index)
            .map(|v| text(v.map(|t| format!("{}{}", t.time, t.offset)))),
        "INTERVAL" => get::<PgInterval>(row, index).map(|v| text(v.map(|i| format_interval(&i)))),
        "BYTEA" => get::<Vec<u8>>(row, index).map(|v| text(v.map(|b| hex_bytes(&b)))),
        "INET" | "CIDR" => get::<IpNetwork>(row, index).map(|v| text(v.map(|n| n.to_string()))),
        "UUID" => get::<uuid::Uuid>(row, index).map(|v| v.map(Value::Uuid)),
        "JSON" | "JSONB" => get::<serde_json::Value>(row, index).map(|v| v.map(Value::Json)),
        "BOOL[]" => array::<bool>(row, index),
        "INT2[]" => array::<i16>(row, index),
        "INT4[]" => array::<i32>(row, index),
        "INT8[]" => array::<i64>(row, index),
        "FLOAT4[]" => array::<f32>(row, index),
        "FLOAT8[]" => array::<f64>(row, index),
        "TEXT[]" | "VARCHAR[]" | "BPCHAR[]" | "NAME[]" => array::<String>(row, index),
        "UUID[]" => array::<uuid::Uuid>(row, index),
        "JSON[]" | "JSONB[]" => array::<serde_json::Value>(row, index),
        _ => get::<String>(row, index).map(text),
    };

    match decoded {
        Ok(value) => value.unwrap_or(Value::Null),
        Err(e) => {
            tracing::debug!(
                "Column '{}' of type {} read raw: {}",
                column.name(),
                type_name,
                e
            );
            decode_raw(row, index)
        }
    }
}

/// The cell's wire value: text-format values as they are, binary ones as UTF-8 text when
/// they are printable and `\x` hex otherwise.
fn decode_raw(row: &PgRow, index: usize) -> Value {
    let Ok(raw) = row.try_get_raw(index) else {
        return Value::Null;
    };
    if raw.is_null() {
        return Value::Null;
    }
    match raw.format() {
        PgValueFormat::Text => <&str as sqlx::Decode<Postgres>>::decode(raw)
            .map(|s| Value::Text(s.to_string()))
            .unwrap_or(Value::Null),
        PgValueFormat::Binary => <&[u8] as sqlx::Decode<Postgres>>::decode(raw)
            .map(render_bytes)
            .unwrap_or(Value::Null),
    }
}

fn render_bytes(bytes: &[u8]) -> Value {
    match std::str::from_utf8(bytes) {
        Ok(s) if !s.chars().any(|c| c.is_control() && !c.is_whitespace()) => {
            Value::Text(s.to_string())
        }
        _ => Value::Text(hex_bytes(bytes)),
    }
}

fn raw_bytes(row: &PgRow, index: usize) -> Option<&[u8]> {
    let raw = row.try_get_raw(index).ok()?;
    if raw.is_null() {
        return None;
    }
    <&[u8] as sqlx::Decode<Postgres>>::decode(raw).ok()
}

/// Binary NUMERIC as a float, for values `Decimal` cannot hold: NaN, the infinities and
/// anything past 28 significant digits.
fn numeric_to_f64(bytes: &[u8]) -> Option<f64> {
    let word = |i: usize| {
        bytes
            .get(i * 2..i * 2 + 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
    };
    let (ndigits, weight, sign) = (word(0)?, word(1)? as i16, word(2)?);
    match sign {
        0xC000 => return Some(f64::NAN),
        0xD000 => return Some(f64::INFINITY),
        0xF000 => return Some(f64::NEG_INFINITY),
        _ => {}
    }

    // Base-10000 digits, the first one at 10000^weight.
    let mut value = 0f64;
    for i in 0..usize::from(ndigits) {
        let digit = f64::from(word(4 + i)?);
        value += digit * 10000f64.powi(i32::from(weight) - i as i32);
    }
    Some(if sign == 0x4000 { -value } else { value })
}

/// PostgreSQL's `bytea` hex output.
fn hex_bytes(bytes: &[u8]) -> String {
    format!("\\x{}", hex::encode(bytes))
}

/// Render an interval the way PostgreSQL's default `IntervalStyle` does.
fn format_interval(interval: &PgInterval) -> String {
    fn unit(n: i64, name: &str) -> String {
        format!("{} {}{}", n, name, if n.abs() == 1 { "" } else { "s" })
    }

    let mut parts = Vec::new();
    let (years, months) = (interval.months / 12, interval.months % 12);
    if years != 0 {
        parts.push(unit(years.into(), "year"));
    }
    if months != 0 {
        parts.push(unit(months.into(), "mon"));
    }
    if interval.days != 0 {
        parts.push(unit(interval.days.into(), "day"));
    }
    if interval.microseconds != 0 || parts.is_empty() {
        let sign = if interval.microseconds < 0 { "-" } else { "" };
        let total = interval.microseconds.unsigned_abs();
        let (secs, micros) = (total / 1_000_000, total % 1_000_000);
        let mut time = format!(
            "{}{:02}:{:02}:{:02}",
            sign,
            secs / 3600,
            secs / 60 % 60,
            secs % 60
        );
        if micros != 0 {
            time.push_str(format!(".{:06}", micros).trim_end_matches('0'));
        }
        parts.push(time);
    }
    parts.join(" ")
}

/// Sort a `sqlx` error into a transient connection failure or a statement failure.
fn classify(e: sqlx::Error) -> DriverError {
    let transient = match &e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::WorkerCrashed => true,
        // Class 08 is "connection exception"; 57P01..57P03 are server shutdown/startup.
        sqlx::Error::Database(db) => db
            .code()
            .is_some_and(|code| code.starts_with("08") || matches!(&*code, "57P01" | "57P02" | "57P03")),
        _ => false,
    };

    let message = e.to_string();
    let err = if transient {
        DriverError::transient(message)
    } else {
        DriverError::statement(message)
    };
    err.with_source(e)
}

fn leading_keyword(sql: &str) -> Option<String> {
    sql.split_whitespace()
        .next()
        .map(|word| word.trim_start_matches('(').to_ascii_uppercase())
        .filter(|word| !word.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leading_keyword() {
        assert_eq!(leading_keyword("  select 1"), Some("SELECT".to_string()));
        assert_eq!(leading_keyword("(SELECT 1) UNION (SELECT 2)"), Some("SELECT".to_string()));
        assert_eq!(leading_keyword("   "), None);
    }

    #[test]
    fn test_classify() {
        assert!(classify(sqlx::Error::PoolTimedOut).is_transient());
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "broken pipe");
        assert!(classify(sqlx::Error::Io(io)).is_transient());
        assert!(!classify(sqlx::Error::RowNotFound).is_transient());
    }

    /// A server error carrying only a SQLSTATE.
    #[derive(Debug)]
    struct ServerError(&'static str);

    impl std::fmt::Display for ServerError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "server error {}", self.0)
        }
    }

    impl std::error::Error for ServerError {}

    impl sqlx::error::DatabaseError for ServerError {
        fn message(&self) -> &str {
            "server error"
        }

        fn code(&self) -> Option<std::borrow::Cow<'_, str>> {
            Some(self.0.into())
        }

        fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> sqlx::error::ErrorKind {
            sqlx::error::ErrorKind::Other
        }
    }

    #[test]
    fn test_classify_by_sqlstate() {
        let cases = [
            ("08006", true),
            ("08003", true),
            ("57P01", true),
            ("57P03", true),
            ("57014", false),
            ("23505", false),
            ("42P01", false),
        ];
        for (code, transient) in cases {
            let err = classify(sqlx::Error::Database(Box::new(ServerError(code))));
            assert_eq!(err.is_transient(), transient, "SQLSTATE {code}");
        }
    }

    #[test]
    fn test_format_interval() {
        let interval = |months, days, microseconds| PgInterval {
            months,
            days,
            microseconds,
        };
        let cases = [
            (interval(0, 0, 0), "00:00:00"),
            (interval(0, 1, 0), "1 day"),
            (interval(14, 3, 14_706_000_000), "1 year 2 mons 3 days 04:05:06"),
            (interval(0, -2, -1_500_000), "-2 days -00:00:01.5"),
            (interval(1, 0, 90_000_000), "1 mon 00:01:30"),
        ];
        for (value, expected) in cases {
            assert_eq!(format_interval(&value), expected);
        }
    }

    #[test]
    fn test_numeric_fallback() {
        let nan = [0, 0, 0, 0, 0xC0, 0, 0, 0];
        assert!(numeric_to_f64(&nan).is_some_and(f64::is_nan));
        assert_eq!(numeric_to_f64(&[0, 0, 0, 0, 0xF0, 0, 0, 0]), Some(f64::NEG_INFINITY));

        // -12345.6: digits 1, 2345, 6000 with weight 1.
        let bytes = [0, 3, 0, 1, 0x40, 0, 0, 1, 0, 1, 0x09, 0x29, 0x17, 0x70];
        let value = numeric_to_f64(&bytes).unwrap();
        assert!((value + 12345.6).abs() < 1e-9, "{value}");

        assert_eq!(numeric_to_f64(&[0, 1]), None);
    }

    #[test]
    fn test_render_bytes() {
        assert_eq!(hex_bytes(&[0xde, 0xad, 0x01]), "\\xdead01");
        assert_eq!(render_bytes(b"happy"), Value::Text("happy".into()));
        assert_eq!(render_bytes(&[0, 0, 0, 7]), Value::Text("\\x00000007".into()));
        assert_eq!(render_bytes(&[0xff, 0xfe]), Value::Text("\\xfffe".into()));
    }
}
