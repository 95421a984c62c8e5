use std::{fmt::Debug, time::Duration};

use async_trait::async_trait;
use futures::TryStreamExt;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{
    migrate::{MigrateDatabase, Migrator},
    postgres::PgPoolOptions,
    Executor, PgPool, Postgres, QueryBuilder, Row, TypeInfo, ValueRef,
};
use uuid::Uuid;

use crate::{
    data_types::{
        now, ColumnId, ColumnUpdate, EntryId, EntryType, NewColumn, OrganizationId,
        TableId, Timestamp,
    },
    implement_repository, ordering,
    properties::{Properties, PropertiesUpdate},
    query::{
        compile::{CompiledQuery, Param},
        dialect::{SqlDialect, POSTGRES},
    },
};

use super::{
    default::RepositoryQueries,
    interface::{
        ColumnRecord, EntryRecord, Error, InvalidMove, OrganizationRecord, Repository,
        Result,
    },
};

#[derive(Debug)]
pub struct PostgresRepository {
    pub executor: PgPool,
    pub schema_name: String,
}

impl PostgresRepository {
    pub const MIGRATOR: Migrator = sqlx::migrate!("migrations/postgres");
    pub const QUERIES: RepositoryQueries = RepositoryQueries {
        // Column reorders read then rewrite a whole table's indices
        begin_transaction: Some("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE"),
        dialect: &POSTGRES,
    };

    pub async fn try_new(
        dsn: String,
        schema_name: String,
    ) -> std::result::Result<Self, sqlx::Error> {
        if !Postgres::database_exists(&dsn).await? {
            let _ = Postgres::create_database(&dsn).await;
        }

        let repo = PostgresRepository::connect(dsn, schema_name.clone()).await?;

        repo.executor
            .execute(format!("CREATE SCHEMA IF NOT EXISTS {schema_name};").as_str())
            .await?;

        // Setup the schema
        repo.setup().await;
        Ok(repo)
    }

    pub async fn connect(
        dsn: String,
        schema_name: String,
    ) -> std::result::Result<Self, sqlx::Error> {
        let search_path_schema = schema_name.clone();

        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(16)
            .idle_timeout(Duration::from_millis(30000))
            .test_before_acquire(true)
            .after_connect(move |c, _m| {
                let schema_name = search_path_schema.to_owned();
                Box::pin(async move {
                    let query = format!("SET search_path TO {schema_name},public;");
                    c.execute(sqlx::query(&query)).await?;
                    Ok(())
                })
            })
            .connect(&dsn)
            .await?;

        Ok(Self {
            executor: pool,
            schema_name,
        })
    }

    pub fn interpret_error(error: sqlx::Error) -> Error {
        if let sqlx::Error::Database(ref d) = error {
            // Reference: https://www.postgresql.org/docs/current/errcodes-appendix.html
            if let Some(code) = d.code() {
                if code == "23505" {
                    return Error::UniqueConstraintViolation(error);
                } else if code == "23503" {
                    return Error::FKConstraintViolation(error);
                } else if code == "40001" {
                    return Error::SerializationFailure(error);
                }
            }
        }
        Error::SqlxError(error)
    }
}

implement_repository!(PostgresRepository, Postgres);

pub mod testutils {
    use rand::Rng;

    use super::PostgresRepository;

    pub fn get_random_schema() -> String {
        let mut rng = rand::thread_rng();
        (&mut rng)
            .sample_iter(rand::distributions::Alphanumeric)
            .filter(|c| c.is_ascii_alphabetic())
            .take(20)
            .map(char::from)
            .collect::<String>()
    }

    pub async fn make_repository(dsn: &str) -> PostgresRepository {
        let schema_name = get_random_schema();

        PostgresRepository::try_new(dsn.to_string(), schema_name)
            .await
            .expect("Error setting up the database")
    }
}

#[cfg(test)]
mod tests {
    use std::{env, sync::Arc};

    use super::super::interface::tests::run_generic_repository_tests;
    use super::testutils::make_repository;

    #[tokio::test]
    async fn test_postgres_repository() {
        let dsn = match env::var("DATABASE_URL") {
            Ok(dsn) => dsn,
            Err(_) => {
                eprintln!("DATABASE_URL isn't set, skipping the PostgreSQL repository tests");
                return;
            }
        };
        let repository = Arc::new(make_repository(&dsn).await);

        run_generic_repository_tests(repository).await;
    }
}
