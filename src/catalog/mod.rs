use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::data_types::{
    Column, ColumnId, ColumnUpdate, EntryId, EntryType, FilesystemEntry, NewColumn,
    Organization, OrganizationId, RecordId, TableId,
};
use crate::properties::{Properties, PropertiesUpdate, PropertyError};
use crate::query::compile::CompiledQuery;
use crate::query::dialect::SqlDialect;
use crate::query::QueryError;
use crate::sort::{SortError, SortKey};

pub mod metastore;
mod repository;

pub use metastore::Metastore;

/// How a failure should be reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidInput,
    Conflict,
    Unimplemented,
    Storage,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    // Missing entities
    #[error("Organization {id} doesn't exist")]
    OrganizationNotFound { id: OrganizationId },

    #[error("Entry {id} doesn't exist")]
    EntryNotFound { id: EntryId },

    #[error("Table {id} doesn't exist")]
    TableNotFound { id: TableId },

    #[error("Column {id} doesn't exist")]
    ColumnNotFound { id: ColumnId },

    // Invalid input
    #[error("Column {column_id} doesn't belong to table {table_id}")]
    WrongTable {
        column_id: ColumnId,
        table_id: TableId,
    },

    #[error("Unknown column type {name:?}")]
    InvalidType { name: String },

    #[error("Invalid column index {index}: must not be negative")]
    InvalidIndex { index: i64 },

    #[error("Limit {limit} exceeds the maximum of {max}")]
    InvalidLimit { limit: u64, max: u64 },

    #[error("Offset {offset} exceeds the maximum of {max}")]
    InvalidOffset { offset: u64, max: u64 },

    #[error(transparent)]
    InvalidProperty(#[from] PropertyError),

    #[error(transparent)]
    InvalidSort(#[from] SortError),

    #[error(transparent)]
    InvalidQuery(QueryError),

    #[error("Entry {id} is not a folder")]
    NotAFolder { id: EntryId },

    // Conflicts
    #[error("Can't move entry {entry_id} into {destination_id}: it's the entry itself or one of its descendants")]
    CycleDetected {
        entry_id: EntryId,
        destination_id: EntryId,
    },

    #[error("Can't move entry {entry_id} into {destination_id}: they belong to different organizations")]
    OrganizationMismatch {
        entry_id: EntryId,
        destination_id: EntryId,
    },

    #[error("Conflicting concurrent update, try again: {0:?}")]
    ConcurrentModification(sqlx::Error),

    #[error("Not implemented: {reason}")]
    Unimplemented { reason: String },

    // Storage failures
    #[error("Internal SQL error: {0:?}")]
    Storage(sqlx::Error),

    #[error("Invalid value stored in the catalog: {reason}")]
    Corrupt { reason: String },
}

impl CatalogError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CatalogError::OrganizationNotFound { .. }
            | CatalogError::EntryNotFound { .. }
            | CatalogError::TableNotFound { .. }
            | CatalogError::ColumnNotFound { .. } => ErrorKind::NotFound,
            CatalogError::WrongTable { .. }
            | CatalogError::InvalidType { .. }
            | CatalogError::InvalidIndex { .. }
            | CatalogError::InvalidLimit { .. }
            | CatalogError::InvalidOffset { .. }
            | CatalogError::InvalidProperty(_)
            | CatalogError::InvalidSort(_)
            | CatalogError::InvalidQuery(_)
            | CatalogError::NotAFolder { .. } => ErrorKind::InvalidInput,
            CatalogError::CycleDetected { .. }
            | CatalogError::OrganizationMismatch { .. }
            | CatalogError::ConcurrentModification(_) => ErrorKind::Conflict,
            CatalogError::Unimplemented { .. } => ErrorKind::Unimplemented,
            CatalogError::Storage(_) | CatalogError::Corrupt { .. } => ErrorKind::Storage,
        }
    }
}

impl From<QueryError> for CatalogError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::Unimplemented(reason) => CatalogError::Unimplemented { reason },
            e => CatalogError::InvalidQuery(e),
        }
    }
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// A column as declared by a client, before its type has been checked
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

/// Requested changes to a column; absent fields are left alone
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ColumnChanges {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub column_type: Option<String>,
    pub properties: Option<Map<String, Value>>,
    pub index: Option<i64>,
}

/// Where to list children from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parent {
    Root(OrganizationId),
    Folder(EntryId),
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ChildrenPage {
    pub entries: Vec<FilesystemEntry>,
    pub total: i64,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum QueryResult {
    Inserted { ids: Vec<RecordId> },
    Rows { rows: Vec<Vec<Value>> },
}

#[async_trait]
pub trait OrganizationStore: Sync + Send {
    async fn create(&self, name: &str) -> CatalogResult<Organization>;

    async fn get(&self, id: OrganizationId) -> CatalogResult<Organization>;

    async fn list(&self) -> CatalogResult<Vec<Organization>>;

    async fn rename(&self, id: OrganizationId, name: &str) -> CatalogResult<Organization>;

    async fn delete(&self, id: OrganizationId) -> CatalogResult<()>;
}

/// Raw access to filesystem entries. Entries come back without their path
/// or columns; `Metastore` fills those in.
#[async_trait]
pub trait EntryStore: Sync + Send {
    async fn create(
        &self,
        organization_id: OrganizationId,
        entry_type: EntryType,
        parent_folder_id: Option<EntryId>,
        properties: &Properties,
        columns: &[NewColumn],
    ) -> CatalogResult<FilesystemEntry>;

    async fn get(&self, id: EntryId) -> CatalogResult<FilesystemEntry>;

    async fn list_children(
        &self,
        organization_id: OrganizationId,
        parent_folder_id: Option<EntryId>,
        sort: &[SortKey],
        offset: u64,
        limit: u64,
    ) -> CatalogResult<(Vec<FilesystemEntry>, i64)>;

    async fn update_properties(
        &self,
        id: EntryId,
        update: &PropertiesUpdate,
    ) -> CatalogResult<FilesystemEntry>;

    /// Move an entry, refusing destinations that would create a cycle, cross
    /// organizations or aren't folders. Checked atomically with the update.
    async fn move_to(
        &self,
        id: EntryId,
        parent_folder_id: Option<EntryId>,
    ) -> CatalogResult<FilesystemEntry>;

    async fn delete(&self, id: EntryId) -> CatalogResult<()>;
}

#[async_trait]
pub trait ColumnStore: Sync + Send {
    async fn list(&self, table_id: TableId) -> CatalogResult<Vec<Column>>;

    async fn get(&self, id: ColumnId) -> CatalogResult<Column>;

    async fn create(
        &self,
        table_id: TableId,
        column: &NewColumn,
        index: Option<usize>,
    ) -> CatalogResult<Column>;

    async fn update(&self, id: ColumnId, update: &ColumnUpdate) -> CatalogResult<Column>;

    async fn delete(&self, id: ColumnId) -> CatalogResult<()>;

    async fn reorder(
        &self,
        table_id: TableId,
        column_ids: &[ColumnId],
    ) -> CatalogResult<Vec<Column>>;
}

#[async_trait]
pub trait RecordStore: Sync + Send {
    fn dialect(&self) -> &'static SqlDialect;

    async fn insert(&self, query: &CompiledQuery) -> CatalogResult<u64>;

    async fn select(
        &self,
        query: &CompiledQuery,
        width: usize,
    ) -> CatalogResult<Vec<Vec<Value>>>;
}
