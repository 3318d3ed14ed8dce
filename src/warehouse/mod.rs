// src/warehouse/mod.rs

//! Warehouse boundary.
//!
//! Executors only ever talk to a [`WarehouseClient`]: run a statement, or run
//! a query and read the first column of the first row. There is no retry logic
//! here; retries belong to the scheduler.
//!
//! - [`pool`] hands out one connection per executor attempt.
//! - [`shell`] is the production client that pipes SQL into a shell command
//!   such as `psql`.

pub mod pool;
pub mod shell;

use std::fmt;

use crate::errors::WarehouseError;
use crate::types::BoxFuture;

pub use pool::{PooledConnection, WarehousePool};
pub use shell::ShellWarehouse;

/// Narrow, mockable interface to the warehouse.
pub trait WarehouseClient: Send + Sync {
    /// Execute a statement, discarding any result set.
    fn execute<'a>(&'a self, statement: &'a str) -> BoxFuture<'a, Result<(), WarehouseError>>;

    /// Run a query and return the first column of the first row.
    ///
    /// `Ok(None)` means the query returned no rows.
    fn query_scalar<'a>(
        &'a self,
        statement: &'a str,
    ) -> BoxFuture<'a, Result<Option<ScalarValue>, WarehouseError>>;
}

/// A single value read back from the warehouse.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ScalarValue {
    /// Interpret a textual cell (as printed by a CLI client).
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case("null") {
            return ScalarValue::Null;
        }
        if let Ok(i) = raw.parse::<i64>() {
            return ScalarValue::Int(i);
        }
        if let Ok(f) = raw.parse::<f64>() {
            return ScalarValue::Float(f);
        }
        match raw {
            "t" | "true" | "TRUE" => ScalarValue::Bool(true),
            "f" | "false" | "FALSE" => ScalarValue::Bool(false),
            _ => ScalarValue::Text(raw.to_string()),
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            ScalarValue::Int(i) => Some(*i as f64),
            ScalarValue::Float(f) => Some(*f),
            ScalarValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Value equality with numeric coercion, so `Int(0)`, `Float(0.0)` and
    /// `Text("0")` all compare equal.
    pub fn same_value(&self, other: &ScalarValue) -> bool {
        match (self, other) {
            (ScalarValue::Null, ScalarValue::Null) => true,
            (ScalarValue::Bool(a), ScalarValue::Bool(b)) => a == b,
            (ScalarValue::Text(a), ScalarValue::Text(b)) => a == b,
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null => f.write_str("NULL"),
            ScalarValue::Bool(b) => write!(f, "{b}"),
            ScalarValue::Int(i) => write!(f, "{i}"),
            ScalarValue::Float(x) => write!(f, "{x}"),
            ScalarValue::Text(s) => write!(f, "'{s}'"),
        }
    }
}

impl From<i64> for ScalarValue {
    fn from(v: i64) -> Self {
        ScalarValue::Int(v)
    }
}

impl From<i32> for ScalarValue {
    fn from(v: i32) -> Self {
        ScalarValue::Int(i64::from(v))
    }
}

impl From<f64> for ScalarValue {
    fn from(v: f64) -> Self {
        ScalarValue::Float(v)
    }
}

impl From<bool> for ScalarValue {
    fn from(v: bool) -> Self {
        ScalarValue::Bool(v)
    }
}

impl From<&str> for ScalarValue {
    fn from(v: &str) -> Self {
        ScalarValue::Text(v.to_string())
    }
}
