use std::cmp::Ordering;

use anyhow::Result;
use log::debug;
use sqlparser::ast::{self, FromTable, TableFactor};

use crate::catalog::mgr::CatalogManager;
use crate::disk::codec::Value;
use crate::disk::heap::HeapFile;
use crate::error::EngineError;
use crate::exec::{self, QueryOutput};
use crate::index::{IndexCallback, IndexFile};
use crate::sql::{self, WherePlan};

pub fn run(catalog: &CatalogManager, delete: &ast::Delete) -> Result<QueryOutput> {
    let relations = match &delete.from {
        FromTable::WithFromKeyword(tables) | FromTable::WithoutKeyword(tables) => tables,
    };
    let object_name = relations
        .first()
        .and_then(|t| match &t.relation {
            TableFactor::Table { name, .. } => Some(name),
            _ => None,
        })
        .ok_or_else(|| EngineError::UnsupportedStatement("DELETE without a table".into()))?;
    let name = sql::qualified_name(object_name)?;
    let table = catalog.get_table(&name.db, &name.schema, &name.table)?;

    // the WHERE is mandatory and must be a single equality
    let (column, literal) = match sql::parse_where(delete.selection.as_ref())? {
        WherePlan::Equality { column, literal } => (column, literal),
        WherePlan::None => return Err(EngineError::DeleteRequiresWhere.into()),
        other => {
            return Err(EngineError::UnsupportedPredicate(format!("DELETE with {:?}", other)).into());
        }
    };
    let key_col = table
        .column_position(&column)
        .ok_or_else(|| EngineError::UnknownPredicateColumn(column.clone()))?;
    let target = exec::typed_value(&literal, table.tab_columns[key_col].col_type)?;

    let data_path = catalog.paths().table_data(&name.db, &name.schema, &name.table);
    let mut heap = HeapFile::open(&table, &data_path)?;
    let mut callbacks = catalog.callbacks_for(&name.db, &name.schema, &name.table)?;

    // walk the heap by ordinal, tombstone matches, and mirror the delete
    // into every attached index
    let mut deleted = 0usize;
    for position in 0..heap.record_count() {
        let row = match heap.read(position)? {
            Some((tuple, true)) => tuple,
            _ => continue,
        };
        if row[key_col].key_cmp(&target) != Ordering::Equal {
            continue;
        }
        heap.delete(position)?;
        for callback in callbacks.iter_mut() {
            mirror_delete(callback, &row, position)?;
        }
        deleted += 1;
    }

    heap.flush()?;
    for callback in callbacks.iter_mut() {
        callback.file.flush()?;
    }
    catalog.bump_tuples(&name.db, &name.schema, &name.table, -(deleted as i64))?;
    debug!("deleted {} rows from {}", deleted, name);
    Ok(QueryOutput::Status(format!("{} rows deleted", deleted)))
}

fn mirror_delete(callback: &mut IndexCallback, row: &[Value], position: u32) -> Result<()> {
    match &mut callback.file {
        IndexFile::Spatial(spatial) => {
            let (x, y) = super::insert::spatial_point(row, callback.key_col)?;
            spatial.remove_point(position, x, y);
            Ok(())
        }
        file => file.delete(&row[callback.key_col]).map(|_| ()),
    }
}
