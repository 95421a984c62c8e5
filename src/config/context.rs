use std::sync::Arc;

use tracing::info;

#[cfg(feature = "catalog-postgres")]
use crate::repository::postgres::PostgresRepository;
use crate::{
    catalog::Metastore,
    repository::{interface::Repository, sqlite::SqliteRepository},
};

use super::schema;

/// Open the catalog database described by the config and wrap it in a `Metastore`
pub async fn build_metastore(
    config: &schema::TabulaConfig,
) -> Result<Metastore, sqlx::Error> {
    let repository: Arc<dyn Repository> = match &config.catalog {
        #[cfg(feature = "catalog-postgres")]
        schema::Catalog::Postgres(schema::Postgres { dsn, schema }) => {
            info!("Connecting to the PostgreSQL catalog (schema {schema})");
            Arc::new(PostgresRepository::try_new(dsn.to_string(), schema.to_string()).await?)
        }
        schema::Catalog::Sqlite(schema::Sqlite {
            dsn,
            journal_mode,
            read_only: false,
        }) => {
            info!("Opening the SQLite catalog at {dsn}");
            Arc::new(SqliteRepository::try_new(dsn.to_string(), *journal_mode).await?)
        }
        schema::Catalog::Sqlite(schema::Sqlite {
            dsn,
            journal_mode,
            read_only: true,
        }) => {
            info!("Opening the SQLite catalog at {dsn} in read-only mode");
            Arc::new(
                SqliteRepository::try_new_read_only(dsn.to_string(), *journal_mode)
                    .await?,
            )
        }
    };

    Ok(Metastore::new_from_repository(
        repository,
        config.misc.decode_options(),
    ))
}
