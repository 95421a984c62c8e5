use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::properties::{Properties, PropertiesUpdate};

pub type OrganizationId = Uuid;
pub type EntryId = Uuid;
pub type TableId = Uuid;
pub type ColumnId = Uuid;
pub type RecordId = Uuid;
pub type Timestamp = DateTime<Utc>;

/// Current time, truncated to whole seconds.
pub fn now() -> Timestamp {
    Utc::now().trunc_subsecs(0)
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

#[derive(
    Serialize,
    Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumString,
    Display,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntryType {
    Folder,
    Table,
}

/// Summary of an ancestor folder, as carried in an entry's `path`
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct PathElement {
    pub id: EntryId,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub properties: Properties,
}

/// Variant-specific payload of a filesystem entry. Tables carry their
/// columns when they've been loaded.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryKind {
    Folder,
    Table {
        #[serde(skip_serializing_if = "Option::is_none")]
        columns: Option<Vec<Column>>,
    },
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct FilesystemEntry {
    pub id: EntryId,
    pub organization_id: OrganizationId,
    pub parent_folder_id: Option<EntryId>,
    pub properties: Properties,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<PathElement>>,
    #[serde(flatten)]
    pub kind: EntryKind,
}

impl FilesystemEntry {
    pub fn entry_type(&self) -> EntryType {
        match self.kind {
            EntryKind::Folder => EntryType::Folder,
            EntryKind::Table { .. } => EntryType::Table,
        }
    }

    pub fn is_folder(&self) -> bool {
        self.entry_type() == EntryType::Folder
    }

    pub fn to_path_element(&self) -> PathElement {
        PathElement {
            id: self.id,
            entry_type: self.entry_type(),
            properties: self.properties.clone(),
        }
    }
}

/// Column types recognized by the store. Unknown type names are rejected
/// when a column is created or retyped.
#[derive(
    Serialize,
    Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumString,
    Display,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ColumnType {
    String,
}

/// SQL type a stored JSON value is cast to when read back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastTarget {
    Character,
    SignedInteger,
    Float,
    Json,
}

impl ColumnType {
    pub fn cast_target(&self) -> CastTarget {
        match self {
            ColumnType::String => CastTarget::Character,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub id: ColumnId,
    pub table_id: TableId,
    pub index: i32,
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    pub properties: Properties,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A column definition that hasn't been persisted yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewColumn {
    pub name: String,
    pub column_type: ColumnType,
    pub properties: Properties,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnUpdate {
    pub name: Option<String>,
    pub column_type: Option<ColumnType>,
    pub properties: Option<PropertiesUpdate>,
    pub index: Option<usize>,
}
