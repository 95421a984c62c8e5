//! Compile list-sort directives (as passed in `?sort=` by the HTTP frontend)
//! into an ORDER BY clause over filesystem entries.
//!
//! A directive is `field` or `field:direction`, where field is one of
//! `id`, `type`, `created_at`, `updated_at` or `properties.<key>`.

use std::str::FromStr;

use itertools::Itertools;
use strum_macros::{AsRefStr, Display, EnumString};

use crate::properties::validate_key;
use crate::query::dialect::SqlDialect;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn to_sql(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortField {
    Id,
    Type,
    CreatedAt,
    UpdatedAt,
    Property(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: SortField,
    pub direction: Direction,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SortError {
    #[error("Unknown sort field {0:?}")]
    UnknownField(String),

    #[error("Invalid sort direction {0:?}: expected \"asc\" or \"desc\"")]
    InvalidDirection(String),
}

impl FromStr for SortField {
    type Err = SortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "id" => Ok(SortField::Id),
            "type" => Ok(SortField::Type),
            "created_at" => Ok(SortField::CreatedAt),
            "updated_at" => Ok(SortField::UpdatedAt),
            other => match other.strip_prefix("properties.") {
                Some(key) if validate_key(key).is_ok() => {
                    Ok(SortField::Property(key.to_string()))
                }
                _ => Err(SortError::UnknownField(other.to_string())),
            },
        }
    }
}

impl FromStr for SortKey {
    type Err = SortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (field, direction) = match s.split_once(':') {
            Some((field, direction)) => (
                field,
                Direction::from_str(direction)
                    .map_err(|_| SortError::InvalidDirection(direction.to_string()))?,
            ),
            None => (s, Direction::Asc),
        };

        Ok(SortKey {
            field: field.trim().parse()?,
            direction,
        })
    }
}

pub fn parse_sort_keys<S: AsRef<str>>(directives: &[S]) -> Result<Vec<SortKey>, SortError> {
    directives
        .iter()
        .map(|d| d.as_ref())
        .filter(|d| !d.trim().is_empty())
        .map(SortKey::from_str)
        .collect()
}

fn field_to_sql(field: &SortField, table_alias: &str, dialect: &SqlDialect) -> String {
    match field {
        SortField::Id => format!("{table_alias}.id"),
        SortField::Type => format!("{table_alias}.type"),
        SortField::CreatedAt => format!("{table_alias}.created_at"),
        SortField::UpdatedAt => format!("{table_alias}.updated_at"),
        SortField::Property(key) => {
            dialect.json_text(&format!("{table_alias}.properties"), key)
        }
    }
}

/// Build the ORDER BY clause. Without any keys, entries are sorted by
/// creation time; the id is always appended as the final tie-breaker.
pub fn compile_order_by(keys: &[SortKey], table_alias: &str, dialect: &SqlDialect) -> String {
    let mut keys = keys.to_vec();
    if keys.is_empty() {
        keys.push(SortKey {
            field: SortField::CreatedAt,
            direction: Direction::Asc,
        });
    }
    if !keys.iter().any(|k| k.field == SortField::Id) {
        keys.push(SortKey {
            field: SortField::Id,
            direction: Direction::Asc,
        });
    }

    format!(
        "ORDER BY {}",
        keys.iter()
            .map(|k| format!(
                "{} {}",
                field_to_sql(&k.field, table_alias, dialect),
                k.direction.to_sql()
            ))
            .join(", ")
    )
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::query::dialect::{POSTGRES, SQLITE};

    #[rstest]
    #[case("id", SortField::Id, Direction::Asc)]
    #[case("type:desc", SortField::Type, Direction::Desc)]
    #[case("created_at:ASC", SortField::CreatedAt, Direction::Asc)]
    #[case("updated_at:Desc", SortField::UpdatedAt, Direction::Desc)]
    #[case("properties.name", SortField::Property("name".to_string()), Direction::Asc)]
    fn test_parse_sort_key(
        #[case] directive: &str,
        #[case] field: SortField,
        #[case] direction: Direction,
    ) {
        assert_eq!(
            directive.parse::<SortKey>().unwrap(),
            SortKey { field, direction }
        );
    }

    #[rstest]
    #[case("name", SortError::UnknownField("name".to_string()))]
    #[case("properties.a b", SortError::UnknownField("properties.a b".to_string()))]
    #[case("properties.", SortError::UnknownField("properties.".to_string()))]
    #[case("id:up", SortError::InvalidDirection("up".to_string()))]
    fn test_parse_sort_key_errors(#[case] directive: &str, #[case] error: SortError) {
        assert_eq!(directive.parse::<SortKey>().unwrap_err(), error);
    }

    #[test]
    fn test_compile_default_order() {
        assert_eq!(
            compile_order_by(&[], "e", &SQLITE),
            "ORDER BY e.created_at ASC, e.id ASC"
        );
    }

    #[test]
    fn test_compile_property_order() {
        let keys = parse_sort_keys(&["properties.name:desc", "id:desc"]).unwrap();
        assert_eq!(
            compile_order_by(&keys, "e", &POSTGRES),
            "ORDER BY e.properties ->> 'name' DESC, e.id DESC"
        );
        assert_eq!(
            compile_order_by(&keys, "e", &SQLITE),
            "ORDER BY json_extract(e.properties, '$.\"name\"') DESC, e.id DESC"
        );
    }
}
