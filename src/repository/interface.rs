use std::fmt::Debug;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::types::Json;

use crate::data_types::{
    ColumnId, ColumnUpdate, EntryId, EntryType, NewColumn, OrganizationId, TableId,
    Timestamp,
};
use crate::properties::{Properties, PropertiesUpdate};
use crate::query::compile::CompiledQuery;
use crate::query::dialect::SqlDialect;

#[derive(sqlx::FromRow, Debug, Clone, PartialEq, Eq)]
pub struct OrganizationRecord {
    pub id: OrganizationId,
    pub name: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct EntryRecord {
    pub id: EntryId,
    pub organization_id: OrganizationId,
    pub r#type: String,
    pub parent_folder_id: Option<EntryId>,
    pub properties: Json<Properties>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct ColumnRecord {
    pub id: ColumnId,
    pub table_id: TableId,
    pub index: i32,
    pub name: String,
    pub r#type: String,
    pub properties: Json<Properties>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Why a move was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidMove {
    /// The destination is the entry itself or one of its descendants
    Cycle,
    OrganizationMismatch,
    NotAFolder,
    DestinationNotFound,
}

/// Wrapper for conversion of database-specific error codes into actual errors
#[derive(Debug)]
pub enum Error {
    UniqueConstraintViolation(sqlx::Error),
    FKConstraintViolation(sqlx::Error),
    /// A serializable transaction lost to a concurrent one (PostgreSQL only)
    SerializationFailure(sqlx::Error),
    InvalidMove {
        entry_id: EntryId,
        destination_id: EntryId,
        reason: InvalidMove,
    },

    // All other errors
    SqlxError(sqlx::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[async_trait]
pub trait Repository: Send + Sync + Debug {
    async fn setup(&self);

    /// SQL snippets for compiling record queries against this backend
    fn dialect(&self) -> &'static SqlDialect;

    async fn create_organization(&self, name: &str) -> Result<OrganizationRecord, Error>;

    async fn get_organization(
        &self,
        id: OrganizationId,
    ) -> Result<OrganizationRecord, Error>;

    async fn list_organizations(&self) -> Result<Vec<OrganizationRecord>, Error>;

    async fn rename_organization(
        &self,
        id: OrganizationId,
        name: &str,
    ) -> Result<OrganizationRecord, Error>;

    async fn delete_organization(&self, id: OrganizationId) -> Result<(), Error>;

    /// Create a folder or a table (with its initial columns, in order)
    async fn create_entry(
        &self,
        organization_id: OrganizationId,
        entry_type: EntryType,
        parent_folder_id: Option<EntryId>,
        properties: &Properties,
        columns: &[NewColumn],
    ) -> Result<EntryRecord, Error>;

    async fn get_entry(&self, id: EntryId) -> Result<EntryRecord, Error>;

    /// A page of the immediate children of a folder (or of the organization
    /// root when `parent_folder_id` is None), plus the total number of children.
    async fn list_children(
        &self,
        organization_id: OrganizationId,
        parent_folder_id: Option<EntryId>,
        order_by: &str,
        offset: u64,
        limit: u64,
    ) -> Result<(Vec<EntryRecord>, i64), Error>;

    async fn update_entry_properties(
        &self,
        id: EntryId,
        update: &PropertiesUpdate,
    ) -> Result<EntryRecord, Error>;

    /// Reattach an entry under another folder (or the organization root when
    /// `parent_folder_id` is None). The destination's ancestry is checked in
    /// the same transaction as the update.
    async fn move_entry(
        &self,
        id: EntryId,
        parent_folder_id: Option<EntryId>,
    ) -> Result<EntryRecord, Error>;

    async fn delete_entry(&self, id: EntryId) -> Result<(), Error>;

    /// All columns of a table, in index order
    async fn list_columns(&self, table_id: TableId) -> Result<Vec<ColumnRecord>, Error>;

    async fn get_column(&self, id: ColumnId) -> Result<ColumnRecord, Error>;

    async fn create_column(
        &self,
        table_id: TableId,
        column: &NewColumn,
        index: Option<usize>,
    ) -> Result<ColumnRecord, Error>;

    async fn update_column(
        &self,
        id: ColumnId,
        update: &ColumnUpdate,
    ) -> Result<ColumnRecord, Error>;

    async fn delete_column(&self, id: ColumnId) -> Result<(), Error>;

    async fn reorder_columns(
        &self,
        table_id: TableId,
        column_ids: &[ColumnId],
    ) -> Result<Vec<ColumnRecord>, Error>;

    /// Run a compiled insert, returning the number of inserted records
    async fn insert_records(&self, query: &CompiledQuery) -> Result<u64, Error>;

    /// Run a compiled select, returning each row's `_0.._width` values in order
    async fn select_records(
        &self,
        query: &CompiledQuery,
        width: usize,
    ) -> Result<Vec<Vec<Value>>, Error>;
}

#[cfg(test)]
pub mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;
    use uuid::Uuid;

    use crate::data_types::{Column, ColumnType};
    use crate::query::ast::{Expr, InsertQuery, MetadataField, SelectQuery, SortExpr};
    use crate::query::compile::QueryCompiler;
    use crate::sort::{compile_order_by, parse_sort_keys, Direction};

    use super::*;

    fn new_column(name: &str) -> NewColumn {
        NewColumn {
            name: name.to_string(),
            column_type: ColumnType::String,
            properties: Properties::default(),
        }
    }

    fn properties(value: Value) -> Properties {
        Properties::try_from_map(value.as_object().unwrap().clone()).unwrap()
    }

    async fn column_names(repository: &Arc<dyn Repository>, table_id: TableId) -> Vec<String> {
        let columns = repository.list_columns(table_id).await.unwrap();

        // Indices are always dense and in order
        let indices: Vec<i32> = columns.iter().map(|c| c.index).collect();
        assert_eq!(indices, (0..columns.len() as i32).collect::<Vec<_>>());

        columns.into_iter().map(|c| c.name).collect()
    }

    pub async fn run_generic_repository_tests(repository: Arc<dyn Repository>) {
        let organization_id = test_organizations(repository.clone()).await;
        let (folder_id, table_id) =
            test_create_entries(repository.clone(), organization_id).await;
        test_list_children(repository.clone(), organization_id, folder_id).await;
        test_column_ordering(repository.clone(), table_id).await;
        test_records(repository.clone(), table_id).await;
        test_error_propagation(repository.clone(), organization_id, table_id).await;
        test_move_entry(repository.clone(), organization_id, folder_id, table_id).await;
        test_cascading_delete(repository, organization_id, folder_id, table_id).await;
    }

    async fn test_organizations(repository: Arc<dyn Repository>) -> OrganizationId {
        assert_eq!(repository.list_organizations().await.unwrap(), vec![]);

        let organization = repository.create_organization("acme").await.unwrap();
        assert_eq!(organization.name, "acme");
        assert_eq!(
            repository.get_organization(organization.id).await.unwrap(),
            organization
        );

        let renamed = repository
            .rename_organization(organization.id, "acme inc")
            .await
            .unwrap();
        assert_eq!(renamed.name, "acme inc");
        assert_eq!(renamed.created_at, organization.created_at);

        let other = repository.create_organization("other").await.unwrap();
        assert_eq!(repository.list_organizations().await.unwrap().len(), 2);
        repository.delete_organization(other.id).await.unwrap();
        assert_eq!(
            repository.list_organizations().await.unwrap(),
            vec![renamed]
        );

        organization.id
    }

    async fn test_create_entries(
        repository: Arc<dyn Repository>,
        organization_id: OrganizationId,
    ) -> (EntryId, TableId) {
        let folder = repository
            .create_entry(
                organization_id,
                EntryType::Folder,
                None,
                &properties(json!({"name": "folder"})),
                &[],
            )
            .await
            .unwrap();
        assert_eq!(folder.r#type, "folder");
        assert_eq!(folder.parent_folder_id, None);

        let table = repository
            .create_entry(
                organization_id,
                EntryType::Table,
                Some(folder.id),
                &properties(json!({"name": "table"})),
                &[new_column("a"), new_column("b")],
            )
            .await
            .unwrap();
        assert_eq!(table.r#type, "table");
        assert_eq!(table.parent_folder_id, Some(folder.id));
        assert_eq!(table.properties.0, properties(json!({"name": "table"})));

        let fetched = repository.get_entry(table.id).await.unwrap();
        assert_eq!(fetched.id, table.id);
        assert_eq!(fetched.organization_id, organization_id);

        assert_eq!(column_names(&repository, table.id).await, vec!["a", "b"]);

        // Properties update: null deletes the key
        let update = PropertiesUpdate::try_from_map(
            json!({"name": "renamed", "color": "red"})
                .as_object()
                .unwrap()
                .clone(),
        )
        .unwrap();
        repository
            .update_entry_properties(folder.id, &update)
            .await
            .unwrap();
        let update = PropertiesUpdate::try_from_map(
            json!({"color": null}).as_object().unwrap().clone(),
        )
        .unwrap();
        let updated = repository
            .update_entry_properties(folder.id, &update)
            .await
            .unwrap();
        assert_eq!(updated.properties.0, properties(json!({"name": "renamed"})));

        (folder.id, table.id)
    }

    async fn test_list_children(
        repository: Arc<dyn Repository>,
        organization_id: OrganizationId,
        folder_id: EntryId,
    ) {
        let dialect = repository.dialect();

        for name in ["c", "a", "b"] {
            repository
                .create_entry(
                    organization_id,
                    EntryType::Folder,
                    Some(folder_id),
                    &properties(json!({ "name": name })),
                    &[],
                )
                .await
                .unwrap();
        }

        let order_by = compile_order_by(
            &parse_sort_keys(&["properties.name:desc"]).unwrap(),
            "e",
            dialect,
        );
        let (children, total) = repository
            .list_children(organization_id, Some(folder_id), &order_by, 1, 2)
            .await
            .unwrap();
        assert_eq!(total, 4);
        let names: Vec<_> = children
            .iter()
            .map(|c| c.properties.0.get("name").unwrap().clone())
            .collect();
        // "table", "c", "b", "a" sorted descending, skipping the first
        assert_eq!(names, vec![json!("c"), json!("b")]);

        let order_by = compile_order_by(&[], "e", dialect);
        let (roots, total) = repository
            .list_children(organization_id, None, &order_by, 0, 10)
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(roots[0].id, folder_id);
    }

    async fn test_column_ordering(repository: Arc<dyn Repository>, table_id: TableId) {
        // Explicit position shifts everything at or after it
        repository
            .create_column(table_id, &new_column("c"), Some(0))
            .await
            .unwrap();
        assert_eq!(column_names(&repository, table_id).await, vec!["c", "a", "b"]);

        // Past the end clamps to the tail
        let d = repository
            .create_column(table_id, &new_column("d"), Some(100))
            .await
            .unwrap();
        assert_eq!(d.index, 3);

        // Appending by default
        repository
            .create_column(table_id, &new_column("e"), None)
            .await
            .unwrap();
        assert_eq!(
            column_names(&repository, table_id).await,
            vec!["c", "a", "b", "d", "e"]
        );

        // Move a column forwards, rename it at the same time
        let updated = repository
            .update_column(
                d.id,
                &ColumnUpdate {
                    name: Some("d2".to_string()),
                    index: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.index, 1);
        assert_eq!(
            column_names(&repository, table_id).await,
            vec!["c", "d2", "a", "b", "e"]
        );

        // Delete closes the gap
        repository.delete_column(d.id).await.unwrap();
        assert_eq!(
            column_names(&repository, table_id).await,
            vec!["c", "a", "b", "e"]
        );

        // Partial reorder, with an id that doesn't belong to this table
        let columns = repository.list_columns(table_id).await.unwrap();
        let reordered = repository
            .reorder_columns(table_id, &[columns[3].id, Uuid::new_v4(), columns[1].id])
            .await
            .unwrap();
        assert_eq!(
            reordered.into_iter().map(|c| c.name).collect::<Vec<_>>(),
            vec!["e", "a", "c", "b"]
        );
        assert_eq!(
            column_names(&repository, table_id).await,
            vec!["e", "a", "c", "b"]
        );
    }

    async fn test_records(repository: Arc<dyn Repository>, table_id: TableId) {
        let columns: Vec<Column> = repository
            .list_columns(table_id)
            .await
            .unwrap()
            .into_iter()
            .map(|c| Column {
                id: c.id,
                table_id: c.table_id,
                index: c.index,
                name: c.name,
                column_type: ColumnType::String,
                properties: c.properties.0,
                created_at: c.created_at,
                updated_at: c.updated_at,
            })
            .collect();
        let (c1, c2) = (columns[0].id, columns[1].id);
        let compiler = QueryCompiler::new(repository.dialect(), table_id, &columns);
        let created_at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
            + Duration::milliseconds(678);

        let insert = compiler
            .compile_insert(
                &InsertQuery {
                    columns: vec![c1, c2],
                    values: vec![
                        vec![json!("abc"), json!("x")],
                        vec![json!("def"), Value::Null],
                        vec![json!("aaa"), json!(true)],
                    ],
                },
                created_at,
            )
            .unwrap();
        assert_eq!(repository.insert_records(&insert.query).await.unwrap(), 3);

        let select = compiler
            .compile_select(&SelectQuery {
                columns: vec![
                    Expr::Column(c1),
                    Expr::Column(c2),
                    Expr::Column(columns[2].id),
                    Expr::Metadata(MetadataField::Id),
                    Expr::Metadata(MetadataField::CreatedAt),
                ],
                filter: None,
                order_by: vec![SortExpr {
                    expr: Expr::Column(c1),
                    direction: Direction::Asc,
                }],
                offset: 0,
                limit: 10,
            })
            .unwrap();
        let rows = repository
            .select_records(&select.query, select.width)
            .await
            .unwrap();

        // Same text on every backend
        let ts = json!("2024-01-02T03:04:05.678+00:00");
        let id = |i: usize| json!(insert.record_ids[i].to_string());
        assert_eq!(
            rows,
            vec![
                vec![json!("aaa"), json!("1"), Value::Null, id(2), ts.clone()],
                vec![json!("abc"), json!("x"), Value::Null, id(0), ts.clone()],
                vec![json!("def"), Value::Null, Value::Null, id(1), ts],
            ]
        );
    }

    async fn test_error_propagation(
        repository: Arc<dyn Repository>,
        organization_id: OrganizationId,
        table_id: TableId,
    ) {
        assert!(matches!(
            repository.get_entry(Uuid::new_v4()).await.unwrap_err(),
            Error::SqlxError(sqlx::Error::RowNotFound)
        ));
        assert!(matches!(
            repository.delete_column(Uuid::new_v4()).await.unwrap_err(),
            Error::SqlxError(sqlx::Error::RowNotFound)
        ));

        // Parent must be a folder
        assert!(matches!(
            repository
                .create_entry(
                    organization_id,
                    EntryType::Folder,
                    Some(table_id),
                    &Properties::default(),
                    &[]
                )
                .await
                .unwrap_err(),
            Error::FKConstraintViolation(_)
        ));

        // Columns can only be attached to tables
        assert!(matches!(
            repository
                .create_column(Uuid::new_v4(), &new_column("x"), None)
                .await
                .unwrap_err(),
            Error::FKConstraintViolation(_)
        ));
    }

    async fn test_move_entry(
        repository: Arc<dyn Repository>,
        organization_id: OrganizationId,
        folder_id: EntryId,
        table_id: TableId,
    ) {
        let create_folder = |organization_id: OrganizationId, parent: Option<EntryId>| {
            let repository = repository.clone();
            async move {
                repository
                    .create_entry(
                        organization_id,
                        EntryType::Folder,
                        parent,
                        &Properties::default(),
                        &[],
                    )
                    .await
                    .unwrap()
            }
        };
        let x = create_folder(organization_id, Some(folder_id)).await;
        let y = create_folder(organization_id, Some(folder_id)).await;

        let moved = repository.move_entry(x.id, Some(y.id)).await.unwrap();
        assert_eq!(moved.id, x.id);
        assert_eq!(moved.parent_folder_id, Some(y.id));
        assert!(moved.updated_at >= x.updated_at);

        let reason = |result: Result<EntryRecord, Error>| match result {
            Err(Error::InvalidMove { reason, .. }) => reason,
            other => panic!("expected an invalid move, got {other:?}"),
        };
        assert_eq!(
            reason(repository.move_entry(y.id, Some(x.id)).await),
            InvalidMove::Cycle
        );
        assert_eq!(
            reason(repository.move_entry(y.id, Some(y.id)).await),
            InvalidMove::Cycle
        );
        assert_eq!(
            reason(repository.move_entry(y.id, Some(table_id)).await),
            InvalidMove::NotAFolder
        );
        assert_eq!(
            reason(repository.move_entry(y.id, Some(Uuid::new_v4())).await),
            InvalidMove::DestinationNotFound
        );

        let other = repository.create_organization("other").await.unwrap();
        let foreign = create_folder(other.id, None).await;
        assert_eq!(
            reason(repository.move_entry(y.id, Some(foreign.id)).await),
            InvalidMove::OrganizationMismatch
        );
        repository.delete_organization(other.id).await.unwrap();

        assert!(matches!(
            repository.move_entry(Uuid::new_v4(), None).await.unwrap_err(),
            Error::SqlxError(sqlx::Error::RowNotFound)
        ));

        // Refused moves leave the tree as it was
        assert_eq!(
            repository.get_entry(y.id).await.unwrap().parent_folder_id,
            Some(folder_id)
        );

        let detached = repository.move_entry(x.id, None).await.unwrap();
        assert_eq!(detached.parent_folder_id, None);
        repository.move_entry(x.id, Some(folder_id)).await.unwrap();
    }

    async fn test_cascading_delete(
        repository: Arc<dyn Repository>,
        organization_id: OrganizationId,
        folder_id: EntryId,
        table_id: TableId,
    ) {
        repository.delete_entry(folder_id).await.unwrap();

        assert!(repository.get_entry(table_id).await.is_err());
        assert!(repository.list_columns(table_id).await.unwrap().is_empty());

        let order_by = compile_order_by(&[], "e", repository.dialect());
        let (_, total) = repository
            .list_children(organization_id, None, &order_by, 0, 10)
            .await
            .unwrap();
        assert_eq!(total, 0);

        repository.delete_organization(organization_id).await.unwrap();
        assert!(matches!(
            repository.get_organization(organization_id).await.unwrap_err(),
            Error::SqlxError(sqlx::Error::RowNotFound)
        ));
    }
}
