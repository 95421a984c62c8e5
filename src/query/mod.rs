//! The record query language: a JSON document decoded into a typed AST,
//! then compiled into SQL plus positional parameters for a given table.

pub mod ast;
pub mod compile;
pub mod decode;
pub mod dialect;

use crate::data_types::ColumnId;

pub use ast::{Query, QueryKind};
pub use compile::{CompiledStatement, QueryCompiler};
pub use decode::{decode_query, DecodeOptions};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum QueryError {
    #[error("Invalid query at {path}: {reason}")]
    Decode { path: String, reason: String },

    #[error("Limit {limit} exceeds the maximum of {max}")]
    LimitTooLarge { limit: u64, max: u64 },

    #[error("Offset {offset} exceeds the maximum of {max}")]
    OffsetTooLarge { offset: u64, max: u64 },

    #[error("Column {0} doesn't exist in this table")]
    UnknownColumn(ColumnId),

    #[error("Invalid alias {0:?}")]
    InvalidAlias(String),

    #[error("Row {row} has {actual} value(s) but {expected} column(s) were given")]
    RowWidthMismatch {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Not implemented: {0}")]
    Unimplemented(String),
}

pub type Result<T, E = QueryError> = std::result::Result<T, E>;
