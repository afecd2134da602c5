use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::disk::codec::DataTypeTag;
use crate::index::IndexKind;

pub const CATALOG_VERSION: &str = "0.3.0";

/// Root of the catalog, persisted as one blob under `system/catalog.dat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalCatalog {
    pub databases: BTreeMap<String, Database>, // database name -> descriptor
    pub version: String,
    pub created_at: DateTime<Utc>,
}

impl Default for GlobalCatalog {
    fn default() -> Self {
        Self {
            databases: BTreeMap::new(),
            version: CATALOG_VERSION.into(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Database {
    pub db_id: u32,
    pub db_name: String,
    pub db_schemas: BTreeMap<String, u32>, // schema name -> schema id
    pub db_created_at: DateTime<Utc>,
}

impl Database {
    pub fn new(db_id: u32, db_name: &str) -> Self {
        Self {
            db_id,
            db_name: db_name.into(),
            db_schemas: BTreeMap::new(),
            db_created_at: Utc::now(),
        }
    }

    pub fn add_schema(&mut self, name: &str, id: u32) {
        self.db_schemas.insert(name.into(), id);
    }

    pub fn schema_id(&self, name: &str) -> Option<u32> {
        self.db_schemas.get(name).copied()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub sch_id: u32,
    pub sch_name: String,
    pub sch_db_id: u32,                   // parent database id
    pub sch_tables: BTreeMap<String, u32>, // table name -> table id
}

impl Schema {
    pub fn new(sch_id: u32, sch_name: &str, sch_db_id: u32) -> Self {
        Self {
            sch_id,
            sch_name: sch_name.into(),
            sch_db_id,
            sch_tables: BTreeMap::new(),
        }
    }

    pub fn add_table(&mut self, name: &str, id: u32) {
        self.sch_tables.insert(name.into(), id);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub col_name: String,
    pub col_type: DataTypeTag,
    pub col_len: u32,          // declared byte width
    pub col_not_null: bool,
    pub col_has_default: bool,
}

impl Column {
    pub fn new(col_name: &str, col_type: DataTypeTag, col_len: u32, not_null: bool, has_default: bool) -> Self {
        Self {
            col_name: col_name.into(),
            col_type,
            col_len,
            col_not_null: not_null,
            col_has_default: has_default,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Index {
    pub idx_id: u32,
    pub idx_kind: IndexKind,
    pub idx_name: String,
    pub idx_file: PathBuf,      // backing file path
    pub idx_tuples: u64,
    pub idx_columns: Vec<usize>, // key column positions, single-column today
    pub idx_is_primary: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    pub tab_id: u32,
    pub tab_name: String,
    pub tab_namespace: u32, // parent schema id
    pub tab_tuples: u64,    // live tuple count
    pub tab_pages: u32,
    pub tab_page_size: u32,
    pub tab_columns: Vec<Column>, // declaration order defines the packing order
    pub tab_indexes: Vec<Index>,
}

impl Table {
    pub fn new(tab_id: u32, tab_name: &str, tab_namespace: u32, columns: Vec<Column>) -> Self {
        Self {
            tab_id,
            tab_name: tab_name.into(),
            tab_namespace,
            tab_tuples: 0,
            tab_pages: 1,
            tab_page_size: 8192,
            tab_columns: columns,
            tab_indexes: Vec::new(),
        }
    }

    pub fn column_position(&self, name: &str) -> Option<usize> {
        self.tab_columns.iter().position(|c| c.col_name == name)
    }

    pub fn column(&self, position: usize) -> Option<&Column> {
        self.tab_columns.get(position)
    }

    pub fn primary_index(&self) -> Option<&Index> {
        self.tab_indexes.iter().find(|i| i.idx_is_primary)
    }

    /// Indexes whose key column is `position`, in attachment order.
    pub fn indexes_on(&self, position: usize) -> Vec<&Index> {
        self.tab_indexes
            .iter()
            .filter(|i| i.idx_columns.first() == Some(&position))
            .collect()
    }

    pub fn index_of_kind(&self, kind: IndexKind) -> Option<&Index> {
        self.tab_indexes.iter().find(|i| i.idx_kind == kind)
    }

    pub fn add_index(&mut self, index: Index) {
        self.tab_indexes.push(index);
    }
}
