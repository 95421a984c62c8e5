use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::catalog::repository::RepositoryStore;
use crate::catalog::{
    CatalogError, CatalogResult, ChildrenPage, ColumnChanges, ColumnDefinition,
    ColumnStore, EntryStore, OrganizationStore, Parent, QueryResult, RecordStore,
};
use crate::data_types::{
    now, Column, ColumnId, ColumnType, ColumnUpdate, EntryId, EntryKind, EntryType,
    FilesystemEntry, NewColumn, OrganizationId, PathElement, TableId,
};
use crate::properties::{Properties, PropertiesUpdate};
use crate::query::decode::MAX_OFFSET;
use crate::query::{decode_query, CompiledStatement, DecodeOptions, QueryCompiler};
use crate::repository::interface::Repository;
use crate::sort::parse_sort_keys;

// This is the main entrypoint to all the individual stores. Anything that
// spans several entries (paths, moves, listings) or needs a table's columns
// (record queries) is resolved here.
#[derive(Clone)]
pub struct Metastore {
    pub organizations: Arc<dyn OrganizationStore>,
    pub entries: Arc<dyn EntryStore>,
    pub columns: Arc<dyn ColumnStore>,
    pub records: Arc<dyn RecordStore>,
    pub options: DecodeOptions,
}

fn parse_column_type(name: &str) -> CatalogResult<ColumnType> {
    ColumnType::from_str(name).map_err(|_| CatalogError::InvalidType {
        name: name.to_string(),
    })
}

fn check_offset(offset: u64) -> CatalogResult<u64> {
    if offset > MAX_OFFSET {
        return Err(CatalogError::InvalidOffset {
            offset,
            max: MAX_OFFSET,
        });
    }
    Ok(offset)
}

fn parse_index(index: Option<i64>) -> CatalogResult<Option<usize>> {
    match index {
        Some(index) if index < 0 => Err(CatalogError::InvalidIndex { index }),
        Some(index) => Ok(Some(index as usize)),
        None => Ok(None),
    }
}

impl TryFrom<ColumnDefinition> for NewColumn {
    type Error = CatalogError;

    fn try_from(definition: ColumnDefinition) -> CatalogResult<Self> {
        Ok(NewColumn {
            column_type: parse_column_type(&definition.column_type)?,
            properties: Properties::try_from_map(definition.properties)?,
            name: definition.name,
        })
    }
}

impl Metastore {
    pub fn new_from_repository(
        repository: Arc<dyn Repository>,
        options: DecodeOptions,
    ) -> Self {
        let repository_store = Arc::new(RepositoryStore { repository });

        Self {
            organizations: repository_store.clone(),
            entries: repository_store.clone(),
            columns: repository_store.clone(),
            records: repository_store,
            options,
        }
    }

    fn check_limit(&self, limit: Option<u64>) -> CatalogResult<u64> {
        match limit {
            None => Ok(self.options.default_limit),
            Some(limit) if limit > self.options.max_limit => Err(CatalogError::InvalidLimit {
                limit,
                max: self.options.max_limit,
            }),
            Some(limit) => Ok(limit),
        }
    }

    /// Fetch a folder that new children can be attached to
    async fn get_folder(&self, id: EntryId) -> CatalogResult<FilesystemEntry> {
        let folder = self.entries.get(id).await?;
        if !folder.is_folder() {
            return Err(CatalogError::NotAFolder { id });
        }
        Ok(folder)
    }

    async fn require_table(&self, id: TableId) -> CatalogResult<FilesystemEntry> {
        match self.entries.get(id).await {
            Ok(entry) if entry.entry_type() == EntryType::Table => Ok(entry),
            Ok(_) | Err(CatalogError::EntryNotFound { .. }) => {
                Err(CatalogError::TableNotFound { id })
            }
            Err(e) => Err(e),
        }
    }

    /// Column of a given table, failing if it belongs to another one
    async fn table_column(&self, table_id: TableId, column_id: ColumnId) -> CatalogResult<Column> {
        let column = self.columns.get(column_id).await?;
        if column.table_id != table_id {
            return Err(CatalogError::WrongTable {
                column_id,
                table_id,
            });
        }
        Ok(column)
    }

    // Filesystem entries

    pub async fn create_entry(
        &self,
        organization_id: OrganizationId,
        entry_type: EntryType,
        parent_folder_id: Option<EntryId>,
        properties: Map<String, Value>,
        columns: Vec<ColumnDefinition>,
    ) -> CatalogResult<FilesystemEntry> {
        let properties = Properties::try_from_map(properties)?;
        let columns = columns
            .into_iter()
            .map(NewColumn::try_from)
            .collect::<CatalogResult<Vec<_>>>()?;

        self.organizations.get(organization_id).await?;
        if let Some(parent_id) = parent_folder_id {
            let parent = self.get_folder(parent_id).await?;
            // Folders of other organizations are invisible from this one
            if parent.organization_id != organization_id {
                return Err(CatalogError::EntryNotFound { id: parent_id });
            }
        }

        let mut entry = self
            .entries
            .create(
                organization_id,
                entry_type,
                parent_folder_id,
                &properties,
                &columns,
            )
            .await?;
        info!(
            "Created {} {} in organization {}",
            entry_type, entry.id, organization_id
        );

        if entry_type == EntryType::Table {
            entry.kind = EntryKind::Table {
                columns: Some(self.columns.list(entry.id).await?),
            };
        }
        Ok(entry)
    }

    pub async fn create_folder(
        &self,
        organization_id: OrganizationId,
        parent_folder_id: Option<EntryId>,
        properties: Map<String, Value>,
    ) -> CatalogResult<FilesystemEntry> {
        self.create_entry(
            organization_id,
            EntryType::Folder,
            parent_folder_id,
            properties,
            vec![],
        )
        .await
    }

    pub async fn create_table(
        &self,
        organization_id: OrganizationId,
        parent_folder_id: Option<EntryId>,
        properties: Map<String, Value>,
        columns: Vec<ColumnDefinition>,
    ) -> CatalogResult<FilesystemEntry> {
        self.create_entry(
            organization_id,
            EntryType::Table,
            parent_folder_id,
            properties,
            columns,
        )
        .await
    }

    /// Fetch an entry; tables always come with their columns
    pub async fn get_entry(
        &self,
        id: EntryId,
        compute_path: bool,
    ) -> CatalogResult<FilesystemEntry> {
        let mut entry = self.entries.get(id).await?;

        if entry.entry_type() == EntryType::Table {
            entry.kind = EntryKind::Table {
                columns: Some(self.columns.list(id).await?),
            };
        }
        if compute_path {
            entry.path = Some(self.path_of(&entry).await?);
        }
        Ok(entry)
    }

    /// Ancestors of an entry, root first, not including the entry itself
    pub async fn compute_path(&self, id: EntryId) -> CatalogResult<Vec<PathElement>> {
        let entry = self.entries.get(id).await?;
        self.path_of(&entry).await
    }

    async fn path_of(&self, entry: &FilesystemEntry) -> CatalogResult<Vec<PathElement>> {
        let mut path = Vec::new();
        let mut visited = HashSet::from([entry.id]);
        let mut next = entry.parent_folder_id;

        while let Some(parent_id) = next {
            if !visited.insert(parent_id) {
                warn!(
                    "Cycle in the ancestors of entry {}: {} visited twice",
                    entry.id, parent_id
                );
                break;
            }

            let parent = self.entries.get(parent_id).await?;
            next = parent.parent_folder_id;
            path.push(parent.to_path_element());
        }

        path.reverse();
        Ok(path)
    }

    pub async fn get_children<S: AsRef<str>>(
        &self,
        parent: Parent,
        sort: &[S],
        offset: u64,
        limit: Option<u64>,
        compute_path: bool,
    ) -> CatalogResult<ChildrenPage> {
        let sort = parse_sort_keys(sort)?;
        let limit = self.check_limit(limit)?;
        let offset = check_offset(offset)?;

        let (organization_id, parent_folder_id, path) = match parent {
            Parent::Root(organization_id) => {
                self.organizations.get(organization_id).await?;
                (organization_id, None, vec![])
            }
            Parent::Folder(id) => {
                let folder = self.get_folder(id).await?;
                // All children share the same parent, so the path is only built once
                let path = if compute_path {
                    let mut path = self.path_of(&folder).await?;
                    path.push(folder.to_path_element());
                    path
                } else {
                    vec![]
                };
                (folder.organization_id, Some(id), path)
            }
        };

        let (mut entries, total) = self
            .entries
            .list_children(organization_id, parent_folder_id, &sort, offset, limit)
            .await?;

        if compute_path {
            for entry in entries.iter_mut() {
                entry.path = Some(path.clone());
            }
        }

        Ok(ChildrenPage { entries, total })
    }

    /// Check that `entry` can be moved under `destination_id` (the organization
    /// root when None). Read-only: `move_entry` repeats the same checks inside
    /// its own transaction.
    pub async fn validate_move(
        &self,
        entry: &FilesystemEntry,
        destination_id: Option<EntryId>,
    ) -> CatalogResult<()> {
        let destination_id = match destination_id {
            None => return Ok(()),
            Some(destination_id) => destination_id,
        };

        let cycle = CatalogError::CycleDetected {
            entry_id: entry.id,
            destination_id,
        };
        if destination_id == entry.id {
            return Err(cycle);
        }

        let destination = self.get_folder(destination_id).await?;
        if destination.organization_id != entry.organization_id {
            return Err(CatalogError::OrganizationMismatch {
                entry_id: entry.id,
                destination_id,
            });
        }

        let path = self.path_of(&destination).await?;
        if path.iter().any(|ancestor| ancestor.id == entry.id) {
            return Err(cycle);
        }

        Ok(())
    }

    pub async fn move_entry(
        &self,
        id: EntryId,
        destination_id: Option<EntryId>,
    ) -> CatalogResult<FilesystemEntry> {
        self.entries.move_to(id, destination_id).await?;
        info!("Moved entry {} into {:?}", id, destination_id);

        self.get_entry(id, false).await
    }

    pub async fn update_entry_properties(
        &self,
        id: EntryId,
        properties: Map<String, Value>,
    ) -> CatalogResult<FilesystemEntry> {
        let update = PropertiesUpdate::try_from_map(properties)?;
        self.entries.update_properties(id, &update).await?;
        self.get_entry(id, false).await
    }

    pub async fn delete_entry(&self, id: EntryId) -> CatalogResult<()> {
        self.entries.delete(id).await?;
        info!("Deleted entry {} and everything under it", id);
        Ok(())
    }

    // Columns

    pub async fn list_columns(&self, table_id: TableId) -> CatalogResult<Vec<Column>> {
        self.require_table(table_id).await?;
        self.columns.list(table_id).await
    }

    pub async fn create_column(
        &self,
        table_id: TableId,
        definition: ColumnDefinition,
        index: Option<i64>,
    ) -> CatalogResult<Column> {
        let index = parse_index(index)?;
        let column = NewColumn::try_from(definition)?;
        self.require_table(table_id).await?;

        let column = self.columns.create(table_id, &column, index).await?;
        debug!(
            "Created column {} at index {} in table {}",
            column.id, column.index, table_id
        );
        Ok(column)
    }

    pub async fn update_column(
        &self,
        table_id: TableId,
        column_id: ColumnId,
        changes: ColumnChanges,
    ) -> CatalogResult<Column> {
        let update = ColumnUpdate {
            index: parse_index(changes.index)?,
            column_type: changes
                .column_type
                .as_deref()
                .map(parse_column_type)
                .transpose()?,
            properties: changes
                .properties
                .map(PropertiesUpdate::try_from_map)
                .transpose()?,
            name: changes.name,
        };

        self.require_table(table_id).await?;
        self.table_column(table_id, column_id).await?;

        self.columns.update(column_id, &update).await
    }

    pub async fn delete_column(
        &self,
        table_id: TableId,
        column_id: ColumnId,
    ) -> CatalogResult<()> {
        self.require_table(table_id).await?;
        self.table_column(table_id, column_id).await?;

        self.columns.delete(column_id).await?;
        debug!("Deleted column {} from table {}", column_id, table_id);
        Ok(())
    }

    pub async fn reorder_columns(
        &self,
        table_id: TableId,
        column_ids: &[ColumnId],
    ) -> CatalogResult<Vec<Column>> {
        self.require_table(table_id).await?;
        self.columns.reorder(table_id, column_ids).await
    }

    // Records

    pub async fn execute_query(
        &self,
        table_id: TableId,
        query: &Value,
    ) -> CatalogResult<QueryResult> {
        let query = decode_query(query, &self.options)?;

        self.require_table(table_id).await?;
        let columns = self.columns.list(table_id).await?;

        let compiler = QueryCompiler::new(self.records.dialect(), table_id, &columns);
        match compiler.compile(&query, now())? {
            CompiledStatement::Insert(insert) => {
                let count = self.records.insert(&insert.query).await?;
                debug!("Inserted {} record(s) into table {}", count, table_id);
                Ok(QueryResult::Inserted {
                    ids: insert.record_ids,
                })
            }
            CompiledStatement::Select(select) => {
                let rows = self.records.select(&select.query, select.width).await?;
                Ok(QueryResult::Rows { rows })
            }
        }
    }
}
