//! Compilation of decoded queries into SQL over the `records` table.
//!
//! Records keep their whole payload in the JSON `data` column, keyed by
//! column id. The table's column definitions decide how each key is cast
//! when it's read back.

use std::collections::HashMap;

use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use super::ast::{Expr, InsertQuery, MetadataField, Query, SelectQuery};
use super::decode::MAX_OFFSET;
use super::dialect::SqlDialect;
use super::{QueryError, Result};
use crate::data_types::{CastTarget, Column, ColumnId, RecordId, TableId, Timestamp};

lazy_static! {
    static ref ALIAS_PATTERN: Regex = Regex::new(r"^[A-Za-z0-9_]+$").unwrap();
}

/// A value bound to a `$n` placeholder
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Uuid(Uuid),
    /// A whole JSON document, stored in a JSON column
    Json(Value),
    Timestamp(Timestamp),
    /// A literal from the query, bound as the closest SQL scalar
    Value(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<Param>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledInsert {
    pub query: CompiledQuery,
    /// Generated record ids, in row order
    pub record_ids: Vec<RecordId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledSelect {
    pub query: CompiledQuery,
    /// Number of output columns, aliased `_0` to `_{width - 1}`
    pub width: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompiledStatement {
    Insert(CompiledInsert),
    Select(CompiledSelect),
}

fn push_param(params: &mut Vec<Param>, param: Param) -> String {
    params.push(param);
    format!("${}", params.len())
}

pub fn alias(position: usize) -> Result<String> {
    let alias = format!("_{position}");
    validate_alias(&alias)?;
    Ok(alias)
}

pub fn validate_alias(alias: &str) -> Result<()> {
    if ALIAS_PATTERN.is_match(alias) {
        Ok(())
    } else {
        Err(QueryError::InvalidAlias(alias.to_string()))
    }
}

pub fn cast(dialect: &SqlDialect, target: CastTarget, expr: &str) -> String {
    match target {
        CastTarget::Character => dialect.cast_character.replace("expr", expr),
        CastTarget::SignedInteger => dialect.cast_signed_integer.replace("expr", expr),
        CastTarget::Float => dialect.cast_float.replace("expr", expr),
        CastTarget::Json => expr.to_string(),
    }
}

pub struct QueryCompiler<'a> {
    dialect: &'a SqlDialect,
    table_id: TableId,
    columns: HashMap<ColumnId, &'a Column>,
}

impl<'a> QueryCompiler<'a> {
    pub fn new(dialect: &'a SqlDialect, table_id: TableId, columns: &'a [Column]) -> Self {
        Self {
            dialect,
            table_id,
            columns: columns.iter().map(|c| (c.id, c)).collect(),
        }
    }

    pub fn compile(&self, query: &Query, now: Timestamp) -> Result<CompiledStatement> {
        let statement = match query {
            Query::Insert(insert) => CompiledStatement::Insert(self.compile_insert(insert, now)?),
            Query::Select(select) => CompiledStatement::Select(self.compile_select(select)?),
            Query::Update(_) | Query::Delete(_) => {
                return Err(QueryError::Unimplemented(format!(
                    "{} queries",
                    query.kind()
                )))
            }
        };
        Ok(statement)
    }

    fn column(&self, id: &ColumnId) -> Result<&'a Column> {
        self.columns
            .get(id)
            .copied()
            .ok_or(QueryError::UnknownColumn(*id))
    }

    /// One multi-row INSERT; every row gets a fresh id and shares the same
    /// timestamps.
    pub fn compile_insert(&self, query: &InsertQuery, now: Timestamp) -> Result<CompiledInsert> {
        for column_id in &query.columns {
            self.column(column_id)?;
        }

        let mut params = Vec::with_capacity(query.values.len() * 5);
        let mut record_ids = Vec::with_capacity(query.values.len());
        let mut tuples = Vec::with_capacity(query.values.len());

        for (row_number, row) in query.values.iter().enumerate() {
            if row.len() != query.columns.len() {
                return Err(QueryError::RowWidthMismatch {
                    row: row_number,
                    expected: query.columns.len(),
                    actual: row.len(),
                });
            }

            let data: Map<String, Value> = query
                .columns
                .iter()
                .zip(row)
                .map(|(id, value)| (id.to_string(), value.clone()))
                .collect();

            let record_id = Uuid::new_v4();
            record_ids.push(record_id);

            let placeholders = [
                push_param(&mut params, Param::Uuid(record_id)),
                push_param(&mut params, Param::Uuid(self.table_id)),
                push_param(&mut params, Param::Json(Value::Object(data))),
                push_param(&mut params, Param::Timestamp(now)),
                push_param(&mut params, Param::Timestamp(now)),
            ];
            tuples.push(format!("({})", placeholders.join(", ")));
        }

        let sql = format!(
            "INSERT INTO records (id, table_id, data, created_at, updated_at) VALUES {}",
            tuples.join(", ")
        );
        debug!("Compiled insert of {} record(s): {}", record_ids.len(), sql);

        Ok(CompiledInsert {
            query: CompiledQuery { sql, params },
            record_ids,
        })
    }

    pub fn compile_select(&self, query: &SelectQuery) -> Result<CompiledSelect> {
        if query.filter.is_some() {
            return Err(QueryError::Unimplemented(
                "filter predicates in select queries".to_string(),
            ));
        }

        let mut params = vec![Param::Uuid(self.table_id)];

        let projection = query
            .columns
            .iter()
            .enumerate()
            .map(|(i, expr)| {
                Ok(format!(
                    "{} AS {}",
                    self.compile_output(expr, &mut params)?,
                    alias(i)?
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut sql = format!(
            "SELECT {} FROM records WHERE records.table_id = $1",
            projection.join(", ")
        );

        if !query.order_by.is_empty() {
            let order_by = query
                .order_by
                .iter()
                .map(|s| {
                    Ok(format!(
                        "{} {}",
                        self.compile_expr(&s.expr, &mut params)?,
                        s.direction.to_sql()
                    ))
                })
                .collect::<Result<Vec<_>>>()?;
            sql.push_str(&format!(" ORDER BY {}", order_by.iter().join(", ")));
        }

        if query.offset > MAX_OFFSET {
            return Err(QueryError::OffsetTooLarge {
                offset: query.offset,
                max: MAX_OFFSET,
            });
        }
        sql.push_str(&format!(" LIMIT {} OFFSET {}", query.limit, query.offset));
        debug!("Compiled select: {}", sql);

        Ok(CompiledSelect {
            query: CompiledQuery { sql, params },
            width: query.columns.len(),
        })
    }

    /// Output columns render timestamps as text so both backends return the
    /// same format. Sorting still uses the raw column.
    fn compile_output(&self, expr: &Expr, params: &mut Vec<Param>) -> Result<String> {
        match expr {
            Expr::Metadata(MetadataField::CreatedAt) => {
                Ok(self.dialect.timestamp_to_text("records.created_at"))
            }
            _ => self.compile_expr(expr, params),
        }
    }

    fn compile_expr(&self, expr: &Expr, params: &mut Vec<Param>) -> Result<String> {
        match expr {
            Expr::Metadata(MetadataField::Id) => Ok(self.dialect.uuid_to_text("records.id")),
            Expr::Metadata(MetadataField::CreatedAt) => Ok("records.created_at".to_string()),
            Expr::Column(id) => {
                let column = self.column(id)?;
                let key = id.to_string();
                let target = column.column_type.cast_target();
                let extracted = match target {
                    CastTarget::Json => self.dialect.json_raw("records.data", &key),
                    _ => self.dialect.json_scalar("records.data", &key),
                };
                Ok(cast(self.dialect, target, &extracted))
            }
            Expr::Value(value) => Ok(push_param(params, Param::Value(value.clone()))),
            Expr::Function { name, .. } => Err(QueryError::Unimplemented(format!(
                "function {name:?} in record queries"
            ))),
            Expr::Binary { op, .. } => Err(QueryError::Unimplemented(format!(
                "operator {op} in record queries"
            ))),
            Expr::Unary { op, .. } => Err(QueryError::Unimplemented(format!(
                "operator {op} in record queries"
            ))),
        }
    }
}
