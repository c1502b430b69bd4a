//! Scalar value and row types carried over the wire.

use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch, as produced by `chrono::Utc::now().timestamp_millis()`.
pub type Timestamp = i64;

/// A single column value in a row, or a bound parameter value in a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(Timestamp),
}

/// Metadata describing one column of a result set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub name: String,
    pub type_name: String,
    pub nullable: bool,
}

/// One row of a result set, column-aligned with the preceding metadata chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Row {
    pub values: Vec<Value>,
}

impl Row {
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }
}
