use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{debug, info};

use crate::catalog::def::{Column, Database, GlobalCatalog, Index, Schema, Table};
use crate::catalog::fs::{BlobBody, FileManager};
use crate::catalog::path::PathBuilder;
use crate::error::EngineError;
use crate::index::{IndexCallback, IndexFile, IndexKind, KeyCodec};

/// Owner of the catalog tree: the global catalog blob, per-entity metadata
/// blobs, id generation, and the callback tables the operator layer uses
/// to mirror heap mutations into every attached index.
#[derive(Debug)]
pub struct CatalogManager {
    paths: PathBuilder,
    fs: FileManager,
    catalog: GlobalCatalog,
}

impl CatalogManager {
    pub fn open(data_dir: &Path) -> Result<Self> {
        let paths = PathBuilder::new(data_dir);
        let fs = FileManager;
        fs.create_dir(&paths.system_dir())?;

        let catalog_file = paths.catalog_file();
        let catalog = if fs.exists(&catalog_file) {
            fs.read_catalog(&catalog_file)?
        } else {
            let catalog = GlobalCatalog::default();
            fs.write_blob(&catalog_file, BlobBody::Catalog(catalog.clone()))?;
            info!("initialized catalog under {:?}", data_dir);
            catalog
        };
        Ok(Self { paths, fs, catalog })
    }

    pub fn paths(&self) -> &PathBuilder {
        &self.paths
    }

    pub fn version(&self) -> &str {
        &self.catalog.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.catalog.created_at
    }

    pub fn database_names(&self) -> Vec<String> {
        self.catalog.databases.keys().cloned().collect()
    }

    fn save_catalog(&self) -> Result<()> {
        self.fs
            .write_blob(&self.paths.catalog_file(), BlobBody::Catalog(self.catalog.clone()))
    }

    pub fn get_database(&self, db: &str) -> Result<&Database> {
        self.catalog
            .databases
            .get(db)
            .ok_or_else(|| EngineError::DatabaseNotFound(db.into()).into())
    }

    pub fn get_schema(&self, db: &str, schema: &str) -> Result<Schema> {
        let database = self.get_database(db)?;
        if database.schema_id(schema).is_none() {
            return Err(EngineError::SchemaNotFound(format!("{}.{}", db, schema)).into());
        }
        self.fs.read_schema(&self.paths.schema_meta(db, schema))
    }

    pub fn get_schemas(&self, db: &str) -> Result<Vec<Schema>> {
        let database = self.get_database(db)?;
        database
            .db_schemas
            .keys()
            .map(|name| self.fs.read_schema(&self.paths.schema_meta(db, name)))
            .collect()
    }

    pub fn get_table(&self, db: &str, schema: &str, table: &str) -> Result<Table> {
        let schema_meta = self.get_schema(db, schema)?;
        if !schema_meta.sch_tables.contains_key(table) {
            return Err(EngineError::TableNotFound(format!("{}.{}.{}", db, schema, table)).into());
        }
        self.fs.read_table(&self.paths.table_meta(db, schema, table))
    }

    pub fn get_tables(&self, db: &str, schema: &str) -> Result<Vec<Table>> {
        let schema_meta = self.get_schema(db, schema)?;
        schema_meta
            .sch_tables
            .keys()
            .map(|name| self.fs.read_table(&self.paths.table_meta(db, schema, name)))
            .collect()
    }

    pub fn save_table(&self, db: &str, schema: &str, table: &Table) -> Result<()> {
        let path = self.paths.table_meta(db, schema, &table.tab_name);
        self.fs.write_blob(&path, BlobBody::Table(table.clone()))
    }

    // ids are max + 1 within the parent scope

    fn next_database_id(&self) -> u32 {
        self.catalog.databases.values().map(|d| d.db_id).max().unwrap_or(0) + 1
    }

    fn next_schema_id(&self, database: &Database) -> u32 {
        database.db_schemas.values().copied().max().unwrap_or(0) + 1
    }

    fn next_table_id(&self, schema: &Schema) -> u32 {
        schema.sch_tables.values().copied().max().unwrap_or(0) + 1
    }

    fn next_index_id(&self, table: &Table) -> u32 {
        table.tab_indexes.iter().map(|i| i.idx_id).max().unwrap_or(0) + 1
    }

    pub fn create_database(&mut self, name: &str) -> Result<()> {
        if self.catalog.databases.contains_key(name) {
            return Err(EngineError::DuplicateName(format!("database {}", name)).into());
        }
        self.fs.create_dir(&self.paths.database_dir(name))?;

        let database = Database::new(self.next_database_id(), name);
        self.fs
            .write_blob(&self.paths.database_meta(name), BlobBody::Database(database.clone()))?;
        self.catalog.databases.insert(name.into(), database);
        self.save_catalog()?;
        debug!("created database {}", name);
        Ok(())
    }

    pub fn create_schema(&mut self, db: &str, name: &str) -> Result<()> {
        let database = self.get_database(db)?;
        if database.schema_id(name).is_some() {
            return Err(EngineError::DuplicateName(format!("schema {}.{}", db, name)).into());
        }
        let schema_id = self.next_schema_id(database);
        let db_id = database.db_id;

        self.fs.create_dir(&self.paths.schema_dir(db, name))?;
        let schema = Schema::new(schema_id, name, db_id);
        self.fs
            .write_blob(&self.paths.schema_meta(db, name), BlobBody::Schema(schema))?;

        let database = self.catalog.databases.get_mut(db).expect("checked above");
        database.add_schema(name, schema_id);
        self.fs.write_blob(
            &self.paths.database_meta(db),
            BlobBody::Database(database.clone()),
        )?;
        self.save_catalog()?;
        debug!("created schema {}.{}", db, name);
        Ok(())
    }

    /// Creates the table directory, its metadata blob and an empty heap
    /// file. The primary index is the operator layer's follow-up call.
    pub fn create_table(&mut self, db: &str, schema: &str, name: &str, columns: Vec<Column>) -> Result<()> {
        let mut schema_meta = self.get_schema(db, schema)?;
        if schema_meta.sch_tables.contains_key(name) {
            return Err(EngineError::DuplicateName(format!("table {}.{}.{}", db, schema, name)).into());
        }

        self.fs.create_dir(&self.paths.table_dir(db, schema, name))?;
        self.fs.create_file(&self.paths.table_data(db, schema, name))?;

        let table_id = self.next_table_id(&schema_meta);
        let table = Table::new(table_id, name, schema_meta.sch_id, columns);
        self.fs
            .write_blob(&self.paths.table_meta(db, schema, name), BlobBody::Table(table))?;

        schema_meta.add_table(name, table_id);
        self.fs
            .write_blob(&self.paths.schema_meta(db, schema), BlobBody::Schema(schema_meta))?;
        debug!("created table {}.{}.{}", db, schema, name);
        Ok(())
    }

    pub fn create_index(
        &mut self,
        db: &str,
        schema: &str,
        table: &str,
        name: &str,
        kind: IndexKind,
        key_column: usize,
        is_primary: bool,
    ) -> Result<Index> {
        if kind == IndexKind::Sequential {
            return Err(EngineError::UnsupportedStatement("SEQUENTIAL indexes are not implemented".into()).into());
        }
        let mut table_meta = self.get_table(db, schema, table)?;
        if table_meta.tab_indexes.iter().any(|i| i.idx_name == name) {
            return Err(EngineError::DuplicateName(format!("index {} on {}", name, table)).into());
        }
        if is_primary && table_meta.primary_index().is_some() {
            return Err(EngineError::PrimaryIndexExists(table.into()).into());
        }
        if table_meta.column(key_column).is_none() {
            return Err(EngineError::ColumnNotFound(format!("position {} of {}", key_column, table)).into());
        }

        let index = Index {
            idx_id: self.next_index_id(&table_meta),
            idx_kind: kind,
            idx_name: name.into(),
            idx_file: self.paths.table_index(db, schema, table, name),
            idx_tuples: 0,
            idx_columns: vec![key_column],
            idx_is_primary: is_primary,
        };
        self.fs.create_file(&index.idx_file)?;
        table_meta.add_index(index.clone());
        self.save_table(db, schema, &table_meta)?;
        debug!("created {} index {} on {}.{}.{}({})", kind, name, db, schema, table, key_column);
        Ok(index)
    }

    pub fn position_of_column(&self, db: &str, schema: &str, table: &str, column: &str) -> Result<Option<usize>> {
        Ok(self.get_table(db, schema, table)?.column_position(column))
    }

    /// Adjust the live tuple counters of the table and every attached
    /// index after an INSERT/COPY/DELETE statement.
    pub fn bump_tuples(&self, db: &str, schema: &str, table: &str, delta: i64) -> Result<()> {
        let mut table_meta = self.get_table(db, schema, table)?;
        table_meta.tab_tuples = table_meta.tab_tuples.saturating_add_signed(delta);
        for index in &mut table_meta.tab_indexes {
            index.idx_tuples = index.idx_tuples.saturating_add_signed(delta);
        }
        self.save_table(db, schema, &table_meta)
    }

    /// Open every attached index of a table: the callback table operator
    /// code iterates to mirror heap mutations.
    pub fn callbacks_for(&self, db: &str, schema: &str, table: &str) -> Result<Vec<IndexCallback>> {
        let table_meta = self.get_table(db, schema, table)?;
        let mut callbacks = Vec::with_capacity(table_meta.tab_indexes.len());
        for index in &table_meta.tab_indexes {
            let key_col = *index.idx_columns.first().ok_or_else(|| {
                EngineError::CorruptNode(format!("index {} has no key column", index.idx_name))
            })?;
            let column = table_meta
                .column(key_col)
                .ok_or_else(|| EngineError::ColumnNotFound(format!("position {} of {}", key_col, table)))?;
            let key = KeyCodec::new(column.col_type, column.col_len as usize);
            callbacks.push(IndexCallback {
                idx_id: index.idx_id,
                kind: index.idx_kind,
                key_col,
                file: IndexFile::open(index.idx_kind, &index.idx_file, key)?,
            });
        }
        Ok(callbacks)
    }
}

#[cfg(test)]
mod mgr_tests {

    use std::env::set_var;

    use tempfile::TempDir;

    use super::*;
    use crate::disk::codec::DataTypeTag;
    use crate::util;

    fn setup() {
        set_var("RUST_LOG", "info");
        util::init();
    }

    fn employee_columns() -> Vec<Column> {
        vec![
            Column::new("id", DataTypeTag::Int, 4, false, false),
            Column::new("name", DataTypeTag::Varchar, 50, false, false),
        ]
    }

    #[test]
    fn ddl_flow_and_ids() {
        setup();
        let dir = TempDir::new().unwrap();
        let mut catalog = CatalogManager::open(dir.path()).unwrap();

        catalog.create_database("ecm").unwrap();
        catalog.create_schema("ecm", "store").unwrap();
        catalog.create_table("ecm", "store", "employees", employee_columns()).unwrap();
        catalog
            .create_index("ecm", "store", "employees", "pk", IndexKind::BTree, 0, true)
            .unwrap();

        let table = catalog.get_table("ecm", "store", "employees").unwrap();
        assert_eq!(table.tab_id, 1);
        assert_eq!(table.tab_indexes.len(), 1);
        assert!(table.tab_indexes[0].idx_is_primary);
        assert!(table.tab_indexes[0].idx_file.exists());

        catalog.create_table("ecm", "store", "products", employee_columns()).unwrap();
        let products = catalog.get_table("ecm", "store", "products").unwrap();
        assert_eq!(products.tab_id, 2);

        assert_eq!(
            catalog.position_of_column("ecm", "store", "employees", "name").unwrap(),
            Some(1)
        );
        assert_eq!(
            catalog.position_of_column("ecm", "store", "employees", "nope").unwrap(),
            None
        );
    }

    #[test]
    fn duplicate_names_are_rejected() {
        setup();
        let dir = TempDir::new().unwrap();
        let mut catalog = CatalogManager::open(dir.path()).unwrap();
        catalog.create_database("ecm").unwrap();
        assert!(catalog.create_database("ecm").is_err());

        catalog.create_schema("ecm", "store").unwrap();
        assert!(catalog.create_schema("ecm", "store").is_err());

        catalog.create_table("ecm", "store", "t", employee_columns()).unwrap();
        assert!(catalog.create_table("ecm", "store", "t", employee_columns()).is_err());

        catalog.create_index("ecm", "store", "t", "pk", IndexKind::BTree, 0, true).unwrap();
        assert!(catalog
            .create_index("ecm", "store", "t", "pk", IndexKind::Hash, 1, false)
            .is_err());
        // a second primary is a catalog error even under a fresh name
        assert!(catalog
            .create_index("ecm", "store", "t", "pk2", IndexKind::BTree, 0, true)
            .is_err());
    }

    #[test]
    fn missing_entities_surface_catalog_errors() {
        setup();
        let dir = TempDir::new().unwrap();
        let catalog = CatalogManager::open(dir.path()).unwrap();
        let err = catalog.get_table("nope", "store", "t").unwrap_err();
        assert!(err.to_string().starts_with("DatabaseNotFound"));
    }

    #[test]
    fn catalog_survives_reopen() {
        setup();
        let dir = TempDir::new().unwrap();
        {
            let mut catalog = CatalogManager::open(dir.path()).unwrap();
            catalog.create_database("ecm").unwrap();
            catalog.create_schema("ecm", "store").unwrap();
            catalog.create_table("ecm", "store", "employees", employee_columns()).unwrap();
        }
        let catalog = CatalogManager::open(dir.path()).unwrap();
        assert_eq!(catalog.database_names(), vec!["ecm".to_string()]);
        let table = catalog.get_table("ecm", "store", "employees").unwrap();
        assert_eq!(table.tab_columns.len(), 2);
    }

    #[test]
    fn callbacks_cover_every_attached_index() {
        setup();
        let dir = TempDir::new().unwrap();
        let mut catalog = CatalogManager::open(dir.path()).unwrap();
        catalog.create_database("ecm").unwrap();
        catalog.create_schema("ecm", "store").unwrap();
        catalog.create_table("ecm", "store", "employees", employee_columns()).unwrap();
        catalog.create_index("ecm", "store", "employees", "pk", IndexKind::BTree, 0, true).unwrap();
        catalog
            .create_index("ecm", "store", "employees", "idx_name", IndexKind::Hash, 1, false)
            .unwrap();

        let callbacks = catalog.callbacks_for("ecm", "store", "employees").unwrap();
        assert_eq!(callbacks.len(), 2);
        assert_eq!(callbacks[0].kind, IndexKind::BTree);
        assert_eq!(callbacks[0].key_col, 0);
        assert_eq!(callbacks[1].kind, IndexKind::Hash);
        assert_eq!(callbacks[1].key_col, 1);
    }
}
