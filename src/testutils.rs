use std::sync::Arc;

use sqlx::sqlite::SqliteJournalMode;

use crate::catalog::Metastore;
use crate::query::DecodeOptions;
use crate::repository::sqlite::SqliteRepository;

/// A metastore backed by a fresh in-memory SQLite database
pub async fn make_metastore() -> Metastore {
    let repository = SqliteRepository::try_new(
        "sqlite::memory:".to_string(),
        SqliteJournalMode::Wal,
    )
    .await
    .expect("Error setting up the database");

    Metastore::new_from_repository(Arc::new(repository), DecodeOptions::default())
}
