use anyhow::Result;
use log::debug;
use sqlparser::ast;

use crate::catalog::def::Table;
use crate::catalog::mgr::CatalogManager;
use crate::disk::codec::Value;
use crate::disk::heap::HeapFile;
use crate::error::EngineError;
use crate::exec::{self, QueryOutput};
use crate::index::{IndexCallback, IndexFile};
use crate::sql::{self, QualifiedName};

pub fn run(catalog: &CatalogManager, insert: &ast::Insert) -> Result<QueryOutput> {
    let name = sql::qualified_name(&insert.table_name)?;
    let table = catalog.get_table(&name.db, &name.schema, &name.table)?;

    // map the statement's column list onto declaration positions
    let positions: Vec<usize> = if insert.columns.is_empty() {
        (0..table.tab_columns.len()).collect()
    } else {
        insert
            .columns
            .iter()
            .map(|ident| {
                table
                    .column_position(&ident.value)
                    .ok_or_else(|| EngineError::ColumnNotFound(ident.value.clone()).into())
            })
            .collect::<Result<_>>()?
    };

    let source = insert
        .source
        .as_ref()
        .ok_or_else(|| EngineError::UnsupportedStatement("INSERT without VALUES".into()))?;
    let literal_rows = sql::values_rows(source)?;

    let mut rows = Vec::with_capacity(literal_rows.len());
    for literals in &literal_rows {
        if literals.len() != positions.len() {
            return Err(EngineError::UnsupportedStatement(format!(
                "INSERT expects {} values per row, got {}",
                positions.len(),
                literals.len()
            ))
            .into());
        }
        let mut tuple = vec![Value::Null; table.tab_columns.len()];
        for (literal, &pos) in literals.iter().zip(&positions) {
            tuple[pos] = exec::typed_value(literal, table.tab_columns[pos].col_type)?;
        }
        rows.push(tuple);
    }

    let inserted = insert_rows(catalog, &name, &table, rows)?;
    Ok(QueryOutput::Status(format!("{} rows inserted", inserted)))
}

/// Shared row path for INSERT and COPY: append to the heap, then mirror
/// the new position into every attached index.
pub fn insert_rows(
    catalog: &CatalogManager,
    name: &QualifiedName,
    table: &Table,
    rows: Vec<Vec<Value>>,
) -> Result<usize> {
    for row in &rows {
        for (column, value) in table.tab_columns.iter().zip(row) {
            if column.col_not_null && value.is_null() {
                return Err(EngineError::NullViolation(column.col_name.clone()).into());
            }
        }
    }

    let data_path = catalog.paths().table_data(&name.db, &name.schema, &name.table);
    let mut heap = HeapFile::open(table, &data_path)?;
    let mut callbacks = catalog.callbacks_for(&name.db, &name.schema, &name.table)?;

    let mut inserted = 0usize;
    for row in rows {
        let position = heap.insert(&row)?;
        for callback in callbacks.iter_mut() {
            mirror_insert(callback, &row, position)?;
        }
        inserted += 1;
    }

    heap.flush()?;
    for callback in callbacks.iter_mut() {
        callback.file.flush()?;
    }
    catalog.bump_tuples(&name.db, &name.schema, &name.table, inserted as i64)?;
    debug!("inserted {} rows into {}", inserted, name);
    Ok(inserted)
}

/// A spatial index takes the point spanned by its key column and the one
/// after it; every other index takes the key column's value.
fn mirror_insert(callback: &mut IndexCallback, row: &[Value], position: u32) -> Result<()> {
    match &mut callback.file {
        IndexFile::Spatial(spatial) => {
            let (x, y) = spatial_point(row, callback.key_col)?;
            spatial.insert_point(position, x, y);
            Ok(())
        }
        file => file.insert(&row[callback.key_col], position),
    }
}

pub(crate) fn spatial_point(row: &[Value], key_col: usize) -> Result<(f64, f64)> {
    let x = exec::value_f64(&row[key_col])?;
    let y = row
        .get(key_col + 1)
        .ok_or_else(|| EngineError::ColumnNotFound(format!("spatial pair at position {}", key_col + 1)))
        .and_then(|v| exec::value_f64(v).map_err(|_| EngineError::ColumnNotFound(format!("numeric column at position {}", key_col + 1))))?;
    Ok((x, y))
}
