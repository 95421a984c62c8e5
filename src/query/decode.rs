//! Decoding of wire queries into the typed AST.
//!
//! Every expression is a single-key object and the key alone decides its
//! shape, so we dispatch on it directly instead of trying each shape in turn.
//! Errors carry the JSON path of the offending node relative to the query
//! body, e.g. `.values[1][0]`.

use std::str::FromStr;

use serde_json::{Map, Value};
use uuid::Uuid;

use super::ast::{
    BinaryOperator, DeleteQuery, Expr, InsertQuery, MetadataField, Query, QueryKind,
    SelectQuery, SortExpr, UnaryOperator, UpdateQuery,
};
use super::{QueryError, Result};
use crate::sort::Direction;

pub const DEFAULT_LIMIT: u64 = 10;
pub const MAX_LIMIT: u64 = 999;
/// Offsets are bound as signed 64-bit integers by both catalog backends
pub const MAX_OFFSET: u64 = i64::MAX as u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    pub default_limit: u64,
    pub max_limit: u64,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_LIMIT,
            max_limit: MAX_LIMIT,
        }
    }
}

fn error<T>(path: &str, reason: impl Into<String>) -> Result<T> {
    Err(QueryError::Decode {
        path: if path.is_empty() {
            ".".to_string()
        } else {
            path.to_string()
        },
        reason: reason.into(),
    })
}

fn as_object<'a>(value: &'a Value, path: &str) -> Result<&'a Map<String, Value>> {
    match value.as_object() {
        Some(object) => Ok(object),
        None => error(path, "expected an object"),
    }
}

fn as_array<'a>(value: &'a Value, path: &str) -> Result<&'a Vec<Value>> {
    match value.as_array() {
        Some(array) => Ok(array),
        None => error(path, "expected an array"),
    }
}

fn as_u64(value: &Value, path: &str) -> Result<u64> {
    match value.as_u64() {
        Some(n) => Ok(n),
        None => error(path, "expected a non-negative integer"),
    }
}

/// Split a single-key object into its key and payload
fn single_key<'a>(value: &'a Value, path: &str) -> Result<(&'a str, &'a Value)> {
    let object = as_object(value, path)?;
    let mut entries = object.iter();
    match (entries.next(), entries.next()) {
        (Some((key, payload)), None) => Ok((key.as_str(), payload)),
        _ => error(path, "expected an object with exactly one key"),
    }
}

/// Reject keys other than the ones a query body understands
fn check_keys(object: &Map<String, Value>, allowed: &[&str], path: &str) -> Result<()> {
    match object.keys().find(|k| !allowed.contains(&k.as_str())) {
        Some(key) => error(path, format!("unknown field {key:?}")),
        None => Ok(()),
    }
}

fn required<'a>(object: &'a Map<String, Value>, key: &str, path: &str) -> Result<&'a Value> {
    match object.get(key) {
        Some(value) => Ok(value),
        None => error(path, format!("missing field {key:?}")),
    }
}

pub fn decode_column_id(value: &Value, path: &str) -> Result<Uuid> {
    match value.as_str().map(Uuid::parse_str) {
        Some(Ok(id)) => Ok(id),
        _ => error(path, "expected a column UUID"),
    }
}

pub fn decode_expr(value: &Value, path: &str) -> Result<Expr> {
    let (key, payload) = single_key(value, path)?;
    let path = format!("{path}.{key}");

    match key {
        "metadata" => match payload.as_str().map(MetadataField::from_str) {
            Some(Ok(field)) => Ok(Expr::Metadata(field)),
            _ => error(&path, "expected one of \"id\", \"created_at\""),
        },
        "column" => Ok(Expr::Column(decode_column_id(payload, &path)?)),
        "value" => Ok(Expr::Value(payload.clone())),
        "func" => {
            let object = as_object(payload, &path)?;
            check_keys(object, &["name", "args"], &path)?;
            let name = match required(object, "name", &path)?.as_str() {
                Some(name) => name.to_string(),
                None => return error(&format!("{path}.name"), "expected a string"),
            };
            let args = match object.get("args") {
                Some(args) => decode_expr_list(args, &format!("{path}.args"))?,
                None => vec![],
            };
            Ok(Expr::Function { name, args })
        }
        op => {
            if let Ok(op) = BinaryOperator::from_str(op) {
                let operands = as_array(payload, &path)?;
                if operands.len() != 2 {
                    return error(
                        &path,
                        format!("expected 2 operands, got {}", operands.len()),
                    );
                }
                Ok(Expr::Binary {
                    op,
                    left: Box::new(decode_expr(&operands[0], &format!("{path}[0]"))?),
                    right: Box::new(decode_expr(&operands[1], &format!("{path}[1]"))?),
                })
            } else if let Ok(op) = UnaryOperator::from_str(op) {
                Ok(Expr::Unary {
                    op,
                    operand: Box::new(decode_expr(payload, &path)?),
                })
            } else {
                error(&path, format!("unknown expression {op:?}"))
            }
        }
    }
}

fn decode_expr_list(value: &Value, path: &str) -> Result<Vec<Expr>> {
    as_array(value, path)?
        .iter()
        .enumerate()
        .map(|(i, e)| decode_expr(e, &format!("{path}[{i}]")))
        .collect()
}

fn decode_sort_expr(value: &Value, path: &str) -> Result<SortExpr> {
    let object = as_object(value, path)?;
    check_keys(object, &["expr", "direction"], path)?;

    let expr = decode_expr(required(object, "expr", path)?, &format!("{path}.expr"))?;
    let direction = match object.get("direction") {
        None | Some(Value::Null) => Direction::Asc,
        Some(direction) => match direction.as_str().map(Direction::from_str) {
            Some(Ok(direction)) => direction,
            _ => {
                return error(
                    &format!("{path}.direction"),
                    "expected \"asc\" or \"desc\"",
                )
            }
        },
    };
    Ok(SortExpr { expr, direction })
}

fn decode_insert(value: &Value) -> Result<InsertQuery> {
    let object = as_object(value, "")?;
    check_keys(object, &["columns", "values"], "")?;

    let columns = as_array(required(object, "columns", "")?, ".columns")?
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let path = format!(".columns[{i}]");
            match decode_expr(c, &path)? {
                Expr::Column(id) => Ok(id),
                _ => error(&path, "expected a column reference"),
            }
        })
        .collect::<Result<Vec<_>>>()?;

    let rows = as_array(required(object, "values", "")?, ".values")?;
    if rows.is_empty() {
        return error(".values", "expected at least one row");
    }

    let values = rows
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let row_path = format!(".values[{i}]");
            as_array(row, &row_path)?
                .iter()
                .enumerate()
                .map(|(j, v)| {
                    let path = format!("{row_path}[{j}]");
                    match decode_expr(v, &path)? {
                        Expr::Value(value) => Ok(value),
                        _ => error(&path, "expected a value expression"),
                    }
                })
                .collect::<Result<Vec<_>>>()
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(InsertQuery { columns, values })
}

fn decode_select(value: &Value, options: &DecodeOptions) -> Result<SelectQuery> {
    let object = as_object(value, "")?;
    check_keys(
        object,
        &["columns", "where", "order_by", "offset", "limit"],
        "",
    )?;

    let columns = decode_expr_list(required(object, "columns", "")?, ".columns")?;
    if columns.is_empty() {
        return error(".columns", "expected at least one column");
    }

    let filter = match object.get("where") {
        None | Some(Value::Null) => None,
        Some(filter) => Some(decode_expr(filter, ".where")?),
    };

    let order_by = match object.get("order_by") {
        None | Some(Value::Null) => SortExpr::default_order(),
        Some(order_by) => as_array(order_by, ".order_by")?
            .iter()
            .enumerate()
            .map(|(i, s)| decode_sort_expr(s, &format!(".order_by[{i}]")))
            .collect::<Result<Vec<_>>>()?,
    };

    let offset = match object.get("offset") {
        None | Some(Value::Null) => 0,
        Some(offset) => as_u64(offset, ".offset")?,
    };
    if offset > MAX_OFFSET {
        return Err(QueryError::OffsetTooLarge {
            offset,
            max: MAX_OFFSET,
        });
    }

    let limit = match object.get("limit") {
        None | Some(Value::Null) => options.default_limit,
        Some(limit) => as_u64(limit, ".limit")?,
    };
    if limit > options.max_limit {
        return Err(QueryError::LimitTooLarge {
            limit,
            max: options.max_limit,
        });
    }

    Ok(SelectQuery {
        columns,
        filter,
        order_by,
        offset,
        limit,
    })
}

/// Decode a wire query: a single-key object whose key selects the kind
pub fn decode_query(value: &Value, options: &DecodeOptions) -> Result<Query> {
    let (key, body) = single_key(value, "")?;

    match QueryKind::from_str(key) {
        Ok(QueryKind::Insert) => Ok(Query::Insert(decode_insert(body)?)),
        Ok(QueryKind::Select) => Ok(Query::Select(decode_select(body, options)?)),
        Ok(QueryKind::Update) => {
            as_object(body, "")?;
            Ok(Query::Update(UpdateQuery {}))
        }
        Ok(QueryKind::Delete) => {
            as_object(body, "")?;
            Ok(Query::Delete(DeleteQuery {}))
        }
        Err(_) => error("", format!("unknown query kind {key:?}")),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const C1: &str = "6f9619ff-8b86-d011-b42d-00cf4fc964ff";
    const C2: &str = "0b5b3c70-2f0a-4d3e-9b7b-6a8b1f0e2c11";

    fn decode(value: Value) -> Result<Query> {
        decode_query(&value, &DecodeOptions::default())
    }

    fn decode_error_path(value: Value) -> String {
        match decode(value).unwrap_err() {
            QueryError::Decode { path, .. } => path,
            e => panic!("unexpected error {e:?}"),
        }
    }

    #[test]
    fn test_decode_insert() {
        let query = decode(json!({"insert": {
            "columns": [{"column": C1}, {"column": C2}],
            "values": [
                [{"value": "a"}, {"value": 1}],
                [{"value": "b"}, {"value": null}]
            ]
        }}))
        .unwrap();

        assert_eq!(
            query,
            Query::Insert(InsertQuery {
                columns: vec![Uuid::parse_str(C1).unwrap(), Uuid::parse_str(C2).unwrap()],
                values: vec![vec![json!("a"), json!(1)], vec![json!("b"), Value::Null]],
            })
        );
        assert_eq!(query.kind(), QueryKind::Insert);
    }

    #[test]
    fn test_decode_select_defaults() {
        let query = decode(json!({"select": {"columns": [{"metadata": "id"}]}})).unwrap();

        assert_eq!(
            query,
            Query::Select(SelectQuery {
                columns: vec![Expr::Metadata(MetadataField::Id)],
                filter: None,
                order_by: SortExpr::default_order(),
                offset: 0,
                limit: 10,
            })
        );
    }

    #[test]
    fn test_decode_select_order_by() {
        let query = decode(json!({"select": {
            "columns": [{"column": C1}],
            "order_by": [
                {"expr": {"column": C1}, "direction": "DESC"},
                {"expr": {"metadata": "created_at"}}
            ],
            "offset": 5,
            "limit": 999
        }}))
        .unwrap();

        let Query::Select(select) = query else {
            panic!("expected a select query")
        };
        assert_eq!(
            select.order_by,
            vec![
                SortExpr {
                    expr: Expr::Column(Uuid::parse_str(C1).unwrap()),
                    direction: Direction::Desc
                },
                SortExpr {
                    expr: Expr::Metadata(MetadataField::CreatedAt),
                    direction: Direction::Asc
                },
            ]
        );
        assert_eq!(select.offset, 5);
        assert_eq!(select.limit, 999);
    }

    #[test]
    fn test_decode_limit_too_large() {
        assert_eq!(
            decode(json!({"select": {"columns": [{"metadata": "id"}], "limit": 1000}}))
                .unwrap_err(),
            QueryError::LimitTooLarge {
                limit: 1000,
                max: 999
            }
        );
    }

    #[test]
    fn test_decode_expressions() {
        let expr = decode_expr(
            &json!({"and": [
                {"eq": [{"column": C1}, {"value": "x"}]},
                {"not": {"is_null": {"metadata": "id"}}}
            ]}),
            ".where",
        )
        .unwrap();

        assert_eq!(
            expr,
            Expr::Binary {
                op: BinaryOperator::And,
                left: Box::new(Expr::Binary {
                    op: BinaryOperator::Eq,
                    left: Box::new(Expr::Column(Uuid::parse_str(C1).unwrap())),
                    right: Box::new(Expr::Value(json!("x"))),
                }),
                right: Box::new(Expr::Unary {
                    op: UnaryOperator::Not,
                    operand: Box::new(Expr::Unary {
                        op: UnaryOperator::IsNull,
                        operand: Box::new(Expr::Metadata(MetadataField::Id)),
                    }),
                }),
            }
        );

        assert_eq!(
            decode_expr(&json!({"func": {"name": "lower", "args": [{"value": "A"}]}}), "")
                .unwrap(),
            Expr::Function {
                name: "lower".to_string(),
                args: vec![Expr::Value(json!("A"))]
            }
        );
    }

    #[test]
    fn test_decode_error_paths() {
        assert_eq!(
            decode_error_path(json!({"insert": {
                "columns": [{"column": C1}],
                "values": [[{"value": 1}], [{"column": C1}]]
            }})),
            ".values[1][0]"
        );
        assert_eq!(
            decode_error_path(json!({"select": {"columns": [{"metadata": "updated_at"}]}})),
            ".columns[0].metadata"
        );
        assert_eq!(
            decode_error_path(json!({"select": {
                "columns": [{"metadata": "id"}],
                "order_by": [{"expr": {"metadata": "id"}, "direction": "sideways"}]
            }})),
            ".order_by[0].direction"
        );
        assert_eq!(
            decode_error_path(json!({"select": {
                "columns": [{"eq": [{"value": 1}]}]
            }})),
            ".columns[0].eq"
        );
        assert_eq!(
            decode_error_path(json!({"select": {"columns": [{"column": "not-a-uuid"}]}})),
            ".columns[0].column"
        );
        assert_eq!(decode_error_path(json!({"upsert": {}})), ".");
        assert_eq!(decode_error_path(json!({})), ".");
        assert_eq!(
            decode_error_path(json!({"select": {"columns": [], "limit": 1}})),
            ".columns"
        );
        assert_eq!(
            decode_error_path(json!({"select": {"columns": [{"metadata": "id"}], "limit": -1}})),
            ".limit"
        );
    }

    #[test]
    fn test_decode_offset_out_of_range() {
        assert_eq!(
            decode(json!({"select": {
                "columns": [{"metadata": "id"}],
                "offset": u64::MAX
            }}))
            .unwrap_err(),
            QueryError::OffsetTooLarge {
                offset: u64::MAX,
                max: MAX_OFFSET
            }
        );

        let select = match decode(json!({"select": {
            "columns": [{"metadata": "id"}],
            "offset": i64::MAX
        }}))
        .unwrap()
        {
            Query::Select(select) => select,
            other => panic!("expected a select, got {other:?}"),
        };
        assert_eq!(select.offset, MAX_OFFSET);
    }

    #[test]
    fn test_decode_update_delete() {
        assert_eq!(
            decode(json!({"update": {}})).unwrap(),
            Query::Update(UpdateQuery {})
        );
        assert_eq!(
            decode(json!({"delete": {}})).unwrap().kind(),
            QueryKind::Delete
        );
    }
}
