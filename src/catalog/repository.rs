use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::catalog::{
    CatalogError, CatalogResult, ColumnStore, EntryStore, OrganizationStore, RecordStore,
};
use crate::data_types::{
    Column, ColumnId, ColumnType, ColumnUpdate, EntryId, EntryKind, EntryType,
    FilesystemEntry, NewColumn, Organization, OrganizationId, TableId,
};
use crate::properties::{Properties, PropertiesUpdate};
use crate::query::compile::CompiledQuery;
use crate::query::dialect::SqlDialect;
use crate::repository::interface::{
    ColumnRecord, EntryRecord, Error as RepositoryError, InvalidMove, OrganizationRecord,
    Repository,
};
use crate::sort::{compile_order_by, SortKey};

// The native catalog implementation, backed by a relational `Repository`.
pub struct RepositoryStore {
    pub repository: Arc<dyn Repository>,
}

impl From<RepositoryError> for CatalogError {
    fn from(err: RepositoryError) -> CatalogError {
        match err {
            RepositoryError::InvalidMove {
                entry_id,
                destination_id,
                reason,
            } => match reason {
                InvalidMove::Cycle => CatalogError::CycleDetected {
                    entry_id,
                    destination_id,
                },
                InvalidMove::OrganizationMismatch => CatalogError::OrganizationMismatch {
                    entry_id,
                    destination_id,
                },
                InvalidMove::NotAFolder => CatalogError::NotAFolder { id: destination_id },
                InvalidMove::DestinationNotFound => {
                    CatalogError::EntryNotFound { id: destination_id }
                }
            },
            RepositoryError::SerializationFailure(e) => CatalogError::ConcurrentModification(e),
            RepositoryError::UniqueConstraintViolation(e)
            | RepositoryError::FKConstraintViolation(e)
            | RepositoryError::SqlxError(e) => CatalogError::Storage(e),
        }
    }
}

impl From<OrganizationRecord> for Organization {
    fn from(record: OrganizationRecord) -> Self {
        Organization {
            id: record.id,
            name: record.name,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

impl TryFrom<EntryRecord> for FilesystemEntry {
    type Error = CatalogError;

    fn try_from(record: EntryRecord) -> CatalogResult<Self> {
        let kind = match EntryType::from_str(&record.r#type) {
            Ok(EntryType::Folder) => EntryKind::Folder,
            Ok(EntryType::Table) => EntryKind::Table { columns: None },
            Err(_) => {
                return Err(CatalogError::Corrupt {
                    reason: format!(
                        "entry {} has unknown type {:?}",
                        record.id, record.r#type
                    ),
                })
            }
        };

        Ok(FilesystemEntry {
            id: record.id,
            organization_id: record.organization_id,
            parent_folder_id: record.parent_folder_id,
            properties: record.properties.0,
            created_at: record.created_at,
            updated_at: record.updated_at,
            path: None,
            kind,
        })
    }
}

impl TryFrom<ColumnRecord> for Column {
    type Error = CatalogError;

    fn try_from(record: ColumnRecord) -> CatalogResult<Self> {
        let column_type =
            ColumnType::from_str(&record.r#type).map_err(|_| CatalogError::Corrupt {
                reason: format!(
                    "column {} has unknown type {:?}",
                    record.id, record.r#type
                ),
            })?;

        Ok(Column {
            id: record.id,
            table_id: record.table_id,
            index: record.index,
            name: record.name,
            column_type,
            properties: record.properties.0,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

fn organization_not_found(id: OrganizationId) -> impl Fn(RepositoryError) -> CatalogError {
    move |e| match e {
        RepositoryError::SqlxError(sqlx::error::Error::RowNotFound) => {
            CatalogError::OrganizationNotFound { id }
        }
        e => e.into(),
    }
}

fn entry_not_found(id: EntryId) -> impl Fn(RepositoryError) -> CatalogError {
    move |e| match e {
        RepositoryError::SqlxError(sqlx::error::Error::RowNotFound) => {
            CatalogError::EntryNotFound { id }
        }
        e => e.into(),
    }
}

fn column_not_found(id: ColumnId) -> impl Fn(RepositoryError) -> CatalogError {
    move |e| match e {
        RepositoryError::SqlxError(sqlx::error::Error::RowNotFound) => {
            CatalogError::ColumnNotFound { id }
        }
        e => e.into(),
    }
}

fn columns_from_records(records: Vec<ColumnRecord>) -> CatalogResult<Vec<Column>> {
    records.into_iter().map(Column::try_from).collect()
}

#[async_trait]
impl OrganizationStore for RepositoryStore {
    async fn create(&self, name: &str) -> CatalogResult<Organization> {
        let organization = self.repository.create_organization(name).await?;
        Ok(organization.into())
    }

    async fn get(&self, id: OrganizationId) -> CatalogResult<Organization> {
        let organization = self
            .repository
            .get_organization(id)
            .await
            .map_err(organization_not_found(id))?;
        Ok(organization.into())
    }

    async fn list(&self) -> CatalogResult<Vec<Organization>> {
        let organizations = self.repository.list_organizations().await?;
        Ok(organizations.into_iter().map(Organization::from).collect())
    }

    async fn rename(&self, id: OrganizationId, name: &str) -> CatalogResult<Organization> {
        let organization = self
            .repository
            .rename_organization(id, name)
            .await
            .map_err(organization_not_found(id))?;
        Ok(organization.into())
    }

    async fn delete(&self, id: OrganizationId) -> CatalogResult<()> {
        self.repository
            .delete_organization(id)
            .await
            .map_err(organization_not_found(id))
    }
}

#[async_trait]
impl EntryStore for RepositoryStore {
    async fn create(
        &self,
        organization_id: OrganizationId,
        entry_type: EntryType,
        parent_folder_id: Option<EntryId>,
        properties: &Properties,
        columns: &[NewColumn],
    ) -> CatalogResult<FilesystemEntry> {
        let entry = self
            .repository
            .create_entry(
                organization_id,
                entry_type,
                parent_folder_id,
                properties,
                columns,
            )
            .await
            .map_err(|e| match (e, parent_folder_id) {
                (RepositoryError::FKConstraintViolation(_), Some(id)) => {
                    CatalogError::NotAFolder { id }
                }
                (RepositoryError::FKConstraintViolation(_), None) => {
                    CatalogError::OrganizationNotFound {
                        id: organization_id,
                    }
                }
                (e, _) => e.into(),
            })?;

        entry.try_into()
    }

    async fn get(&self, id: EntryId) -> CatalogResult<FilesystemEntry> {
        self.repository
            .get_entry(id)
            .await
            .map_err(entry_not_found(id))?
            .try_into()
    }

    async fn list_children(
        &self,
        organization_id: OrganizationId,
        parent_folder_id: Option<EntryId>,
        sort: &[SortKey],
        offset: u64,
        limit: u64,
    ) -> CatalogResult<(Vec<FilesystemEntry>, i64)> {
        let order_by = compile_order_by(sort, "e", self.repository.dialect());

        let (records, total) = self
            .repository
            .list_children(organization_id, parent_folder_id, &order_by, offset, limit)
            .await?;

        let entries = records
            .into_iter()
            .map(FilesystemEntry::try_from)
            .collect::<CatalogResult<_>>()?;
        Ok((entries, total))
    }

    async fn update_properties(
        &self,
        id: EntryId,
        update: &PropertiesUpdate,
    ) -> CatalogResult<FilesystemEntry> {
        self.repository
            .update_entry_properties(id, update)
            .await
            .map_err(entry_not_found(id))?
            .try_into()
    }

    async fn move_to(
        &self,
        id: EntryId,
        parent_folder_id: Option<EntryId>,
    ) -> CatalogResult<FilesystemEntry> {
        self.repository
            .move_entry(id, parent_folder_id)
            .await
            .map_err(entry_not_found(id))?
            .try_into()
    }

    async fn delete(&self, id: EntryId) -> CatalogResult<()> {
        self.repository
            .delete_entry(id)
            .await
            .map_err(entry_not_found(id))
    }
}

#[async_trait]
impl ColumnStore for RepositoryStore {
    async fn list(&self, table_id: TableId) -> CatalogResult<Vec<Column>> {
        columns_from_records(self.repository.list_columns(table_id).await?)
    }

    async fn get(&self, id: ColumnId) -> CatalogResult<Column> {
        self.repository
            .get_column(id)
            .await
            .map_err(column_not_found(id))?
            .try_into()
    }

    async fn create(
        &self,
        table_id: TableId,
        column: &NewColumn,
        index: Option<usize>,
    ) -> CatalogResult<Column> {
        self.repository
            .create_column(table_id, column, index)
            .await
            .map_err(|e| match e {
                RepositoryError::FKConstraintViolation(_) => {
                    CatalogError::TableNotFound { id: table_id }
                }
                e => e.into(),
            })?
            .try_into()
    }

    async fn update(&self, id: ColumnId, update: &ColumnUpdate) -> CatalogResult<Column> {
        self.repository
            .update_column(id, update)
            .await
            .map_err(column_not_found(id))?
            .try_into()
    }

    async fn delete(&self, id: ColumnId) -> CatalogResult<()> {
        self.repository
            .delete_column(id)
            .await
            .map_err(column_not_found(id))
    }

    async fn reorder(
        &self,
        table_id: TableId,
        column_ids: &[ColumnId],
    ) -> CatalogResult<Vec<Column>> {
        columns_from_records(self.repository.reorder_columns(table_id, column_ids).await?)
    }
}

#[async_trait]
impl RecordStore for RepositoryStore {
    fn dialect(&self) -> &'static SqlDialect {
        self.repository.dialect()
    }

    async fn insert(&self, query: &CompiledQuery) -> CatalogResult<u64> {
        Ok(self.repository.insert_records(query).await?)
    }

    async fn select(
        &self,
        query: &CompiledQuery,
        width: usize,
    ) -> CatalogResult<Vec<Vec<Value>>> {
        Ok(self.repository.select_records(query, width).await?)
    }
}
