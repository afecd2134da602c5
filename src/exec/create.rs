use std::fs;
use std::str::FromStr;

use anyhow::Result;
use log::{debug, info};
use sqlparser::ast::{self, Statement};

use crate::catalog::def::Index;
use crate::catalog::mgr::CatalogManager;
use crate::disk::heap::HeapFile;
use crate::error::EngineError;
use crate::exec::QueryOutput;
use crate::index::{IndexFile, IndexKind, KeyCodec};
use crate::index::isam::{self, IsamFile};
use crate::index::rtree::SpatialFile;
use crate::sql::{self, QualifiedName};

pub fn run(catalog: &mut CatalogManager, statement: &Statement) -> Result<QueryOutput> {
    match statement {
        Statement::CreateDatabase { db_name, .. } => {
            catalog.create_database(&sql::single_name(db_name)?)?;
            Ok(QueryOutput::Status("database created".into()))
        }
        Statement::CreateSchema { schema_name, .. } => {
            let (db, schema) = sql::schema_parts(schema_name)?;
            catalog.create_schema(&db, &schema)?;
            Ok(QueryOutput::Status("schema created".into()))
        }
        Statement::CreateTable(create) => create_table(catalog, create),
        Statement::CreateIndex(create) => create_index(catalog, create),
        other => Err(EngineError::UnsupportedStatement(format!("{}", other)).into()),
    }
}

/// CREATE TABLE also creates the primary B+ tree `pk` over column 0.
fn create_table(catalog: &mut CatalogManager, create: &ast::CreateTable) -> Result<QueryOutput> {
    let name = sql::qualified_name(&create.name)?;
    let columns = sql::column_defs(&create.columns)?;
    if columns.is_empty() {
        return Err(EngineError::UnsupportedStatement("tables need at least one column".into()).into());
    }
    catalog.create_table(&name.db, &name.schema, &name.table, columns)?;
    catalog.create_index(&name.db, &name.schema, &name.table, "pk", IndexKind::BTree, 0, true)?;
    info!("created table {} with primary index pk", name);
    Ok(QueryOutput::Status("table created".into()))
}

fn create_index(catalog: &mut CatalogManager, create: &ast::CreateIndex) -> Result<QueryOutput> {
    let name = sql::qualified_name(&create.table_name)?;
    let index_name = create
        .name
        .as_ref()
        .and_then(|n| n.0.last())
        .map(|i| i.value.clone())
        .ok_or_else(|| EngineError::UnsupportedStatement("CREATE INDEX requires a name".into()))?;

    let kind = match &create.using {
        Some(method) => IndexKind::from_str(&method.value.to_uppercase())
            .map_err(|_| EngineError::UnsupportedStatement(format!("index method {}", method)))?,
        None => IndexKind::BTree,
    };
    let column_name = sql::index_column(&create.columns)?;
    let key_col = catalog
        .position_of_column(&name.db, &name.schema, &name.table, &column_name)?
        .ok_or_else(|| EngineError::ColumnNotFound(column_name.clone()))?;

    let index = catalog.create_index(&name.db, &name.schema, &name.table, &index_name, kind, key_col, false)?;
    backfill(catalog, &name, &index)?;
    Ok(QueryOutput::Status("index created".into()))
}

/// A new index over a non-empty heap is filled from a full scan, skipping
/// tombstones. ISAM gets a sorted bulk load; everything else inserts
/// record by record.
fn backfill(catalog: &CatalogManager, name: &QualifiedName, index: &Index) -> Result<()> {
    let data_path = catalog.paths().table_data(&name.db, &name.schema, &name.table);
    if fs::metadata(&data_path)?.len() == 0 {
        return Ok(());
    }

    let table = catalog.get_table(&name.db, &name.schema, &name.table)?;
    let key_col = index.idx_columns[0];
    let column = table
        .column(key_col)
        .ok_or_else(|| EngineError::ColumnNotFound(format!("position {} of {}", key_col, name.table)))?;
    let key = KeyCodec::new(column.col_type, column.col_len as usize);

    let mut heap = HeapFile::open(&table, &data_path)?;
    let mut live = Vec::new();
    for position in 0..heap.record_count() {
        if let Some((tuple, true)) = heap.read(position)? {
            live.push((tuple, position));
        }
    }

    let live_count = live.len() as u64;
    match index.idx_kind {
        IndexKind::Isam => {
            let mut sorted: Vec<_> = live
                .into_iter()
                .map(|(tuple, position)| (tuple[key_col].clone(), position))
                .collect();
            sorted.sort_by(|a, b| a.0.key_cmp(&b.0));
            let mut file = IsamFile::open(&index.idx_file, key, isam::DEFAULT_LEVELS, isam::DEFAULT_BLOCK_FACTOR)?;
            file.build(&sorted)?;
        }
        IndexKind::RTree => {
            let mut file = SpatialFile::open(&index.idx_file)?;
            for (tuple, position) in &live {
                let (x, y) = super::insert::spatial_point(tuple, key_col)?;
                file.insert_point(*position, x, y);
            }
            file.flush()?;
        }
        kind => {
            let mut file = IndexFile::open(kind, &index.idx_file, key)?;
            for (tuple, position) in &live {
                file.insert(&tuple[key_col], *position)?;
            }
            file.flush()?;
        }
    }

    // the fresh index now carries one entry per live record
    let mut table = table;
    if let Some(meta) = table.tab_indexes.iter_mut().find(|i| i.idx_id == index.idx_id) {
        meta.idx_tuples = live_count;
    }
    catalog.save_table(&name.db, &name.schema, &table)?;
    debug!("backfilled index {} on {}", index.idx_name, name);
    Ok(())
}
