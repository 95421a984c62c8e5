use serde_json::Value;
use strum_macros::{AsRefStr, Display, EnumString};

use crate::data_types::ColumnId;
use crate::sort::Direction;

/// A decoded record query. Update and delete are accepted on the wire but
/// carry no payload and can't be compiled yet.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Insert(InsertQuery),
    Select(SelectQuery),
    Update(UpdateQuery),
    Delete(DeleteQuery),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum QueryKind {
    Insert,
    Select,
    Update,
    Delete,
}

impl Query {
    pub fn kind(&self) -> QueryKind {
        match self {
            Query::Insert(_) => QueryKind::Insert,
            Query::Select(_) => QueryKind::Select,
            Query::Update(_) => QueryKind::Update,
            Query::Delete(_) => QueryKind::Delete,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertQuery {
    pub columns: Vec<ColumnId>,
    /// One literal per referenced column, in the same order
    pub values: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    pub columns: Vec<Expr>,
    pub filter: Option<Expr>,
    pub order_by: Vec<SortExpr>,
    pub offset: u64,
    pub limit: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateQuery {}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteQuery {}

#[derive(Debug, Clone, PartialEq)]
pub struct SortExpr {
    pub expr: Expr,
    pub direction: Direction,
}

/// Implicit record fields addressable with a `metadata` expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum MetadataField {
    Id,
    CreatedAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum BinaryOperator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Like,
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum UnaryOperator {
    Not,
    Neg,
    IsNull,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Metadata(MetadataField),
    Column(ColumnId),
    Value(Value),
    Function {
        name: String,
        args: Vec<Expr>,
    },
    Binary {
        op: BinaryOperator,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOperator,
        operand: Box<Expr>,
    },
}

impl SortExpr {
    /// `metadata:created_at asc, metadata:id asc`
    pub fn default_order() -> Vec<SortExpr> {
        vec![
            SortExpr {
                expr: Expr::Metadata(MetadataField::CreatedAt),
                direction: Direction::Asc,
            },
            SortExpr {
                expr: Expr::Metadata(MetadataField::Id),
                direction: Direction::Asc,
            },
        ]
    }
}
