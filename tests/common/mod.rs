//! A scripted in-memory pool for driving the execution pipeline without a server.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use pgkit::driver::{Connection, ConnectionPool, DriverError, DriverResult};
use pgkit::schema::ColumnDescriptor;
use pgkit::{Postgres, Value};

/// What the next statement should produce.
#[derive(Debug, Clone)]
pub enum Reply {
    Rows {
        columns: Vec<ColumnDescriptor>,
        rows: Vec<Vec<Value>>,
    },
    Affected(u64),
    Transient(&'static str),
    Rejected(&'static str),
}

impl Reply {
    pub fn rows(columns: &[(&str, &str)], rows: Vec<Vec<Value>>) -> Self {
        Reply::Rows {
            columns: columns
                .iter()
                .map(|(name, ty)| ColumnDescriptor::new(*name, *ty))
                .collect(),
            rows,
        }
    }
}

/// Everything a connection was asked to do, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Execute { sql: String, params: Vec<Value> },
    Batch { sql: String, params: Vec<Vec<Value>> },
    Begin,
    Commit,
}

#[derive(Debug, Default)]
pub struct State {
    pub replies: VecDeque<Reply>,
    pub calls: Vec<Call>,
    pub opens: usize,
    pub closes: usize,
    pub borrows: usize,
    pub releases: usize,
    pub validations: usize,
}

#[derive(Clone, Default)]
pub struct MockPool {
    state: Arc<Mutex<State>>,
}

impl MockPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue replies for upcoming statements; unscripted statements affect no rows.
    pub fn script(&self, replies: impl IntoIterator<Item = Reply>) {
        self.state().replies.extend(replies);
    }

    pub fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn commits(&self) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| matches!(c, Call::Commit))
            .count()
    }

    pub fn statements(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Execute { sql, .. } | Call::Batch { sql, .. } => Some(sql.clone()),
                _ => None,
            })
            .collect()
    }
}

pub struct MockConnection {
    state: Arc<Mutex<State>>,
    columns: Vec<ColumnDescriptor>,
    rows: Vec<Vec<Value>>,
    affected: u64,
    tag: Option<String>,
}

impl MockConnection {
    fn apply(&mut self, sql: &str, call: Call) -> DriverResult<()> {
        let reply = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(call);
            state.replies.pop_front().unwrap_or(Reply::Affected(0))
        };

        self.columns.clear();
        self.rows.clear();
        self.affected = 0;
        self.tag = None;

        match reply {
            Reply::Rows { columns, rows } => {
                self.affected = rows.len() as u64;
                self.columns = columns;
                self.rows = rows;
            }
            Reply::Affected(n) => self.affected = n,
            Reply::Transient(msg) => return Err(DriverError::transient(msg)),
            Reply::Rejected(msg) => return Err(DriverError::statement(msg)),
        }
        self.tag = sql
            .split_whitespace()
            .next()
            .map(|word| word.to_ascii_uppercase());
        Ok(())
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> DriverResult<()> {
        let call = Call::Execute {
            sql: sql.to_string(),
            params: params.to_vec(),
        };
        self.apply(sql, call)
    }

    async fn execute_batch(&mut self, sql: &str, params: &[Vec<Value>]) -> DriverResult<()> {
        let call = Call::Batch {
            sql: sql.to_string(),
            params: params.to_vec(),
        };
        self.apply(sql, call)
    }

    async fn fetch_all(&mut self) -> DriverResult<Vec<Vec<Value>>> {
        Ok(std::mem::take(&mut self.rows))
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
        self.state.lock().unwrap().calls.push(Call::Begin);
        Ok(())
    }

    async fn commit(&mut self) -> DriverResult<()> {
        self.state.lock().unwrap().calls.push(Call::Commit);
        Ok(())
    }
}

#[async_trait]
impl ConnectionPool for MockPool {
    type Connection = MockConnection;

    async fn open(&self) -> DriverResult<()> {
        self.state().opens += 1;
        Ok(())
    }

    async fn borrow(&self) -> DriverResult<MockConnection> {
        self.state().borrows += 1;
        Ok(MockConnection {
            state: Arc::clone(&self.state),
            columns: Vec::new(),
            rows: Vec::new(),
            affected: 0,
            tag: None,
        })
    }

    async fn release(&self, _conn: MockConnection) {
        self.state().releases += 1;
    }

    async fn validate(&self) -> DriverResult<()> {
        self.state().validations += 1;
        Ok(())
    }

    async fn close(&self) {
        self.state().closes += 1;
    }
}

/// A client over a fresh mock pool, plus a handle to inspect it.
pub fn client() -> (Postgres<MockPool>, MockPool) {
    let pool = MockPool::new();
    (Postgres::with_pool(pool.clone()), pool)
}
