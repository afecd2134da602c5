use std::cmp::Ordering;

use anyhow::Result;
use log::debug;
use sqlparser::ast;

use crate::catalog::def::{Index, Table};
use crate::catalog::mgr::CatalogManager;
use crate::disk::codec::Value;
use crate::disk::heap::HeapFile;
use crate::error::EngineError;
use crate::exec::{self, QueryOutput};
use crate::index::{IndexFile, IndexKind, KeyCodec};
use crate::sql::{self, Literal, WherePlan};

pub fn run(catalog: &CatalogManager, query: &ast::Query) -> Result<QueryOutput> {
    let select = sql::select_body(query)?;
    let name = sql::qualified_name(sql::table_of_select(select)?)?;
    let table = catalog.get_table(&name.db, &name.schema, &name.table)?;
    let data_path = catalog.paths().table_data(&name.db, &name.schema, &name.table);
    let mut heap = HeapFile::open(&table, &data_path)?;

    let plan = sql::parse_where(select.selection.as_ref())?;
    debug!("select on {} with plan {:?}", name, plan);

    let rows = match &plan {
        WherePlan::None => full_scan(&table, &mut heap)?,
        WherePlan::Equality { column, literal } => equality(&table, &mut heap, column, literal)?,
        WherePlan::Between { column, low, high } => between(&table, &mut heap, column, low, high)?,
        WherePlan::SpatialRange {
            x_low,
            x_high,
            y_low,
            y_high,
            ..
        } => spatial(&table, &mut heap, x_low, x_high, y_low, y_high)?,
    };
    project(select, &table, rows)
}

fn open_index(table: &Table, index: &Index) -> Result<IndexFile> {
    let key_col = index.idx_columns[0];
    let column = table
        .column(key_col)
        .ok_or_else(|| EngineError::ColumnNotFound(format!("position {}", key_col)))?;
    IndexFile::open(
        index.idx_kind,
        &index.idx_file,
        KeyCodec::new(column.col_type, column.col_len as usize),
    )
}

/// No predicate: the primary B+ tree's ordered scan drives the heap.
fn full_scan(table: &Table, heap: &mut HeapFile) -> Result<Vec<Vec<Value>>> {
    match table.primary_index() {
        Some(primary) => {
            let mut file = open_index(table, primary)?;
            let tuples = file
                .as_btree_mut()
                .ok_or_else(|| EngineError::CorruptNode("primary index is not a B+ tree".into()))?
                .all_tuples()?;
            let positions: Vec<u32> = tuples.into_iter().map(|(_, pos)| pos).collect();
            heap.scan(&positions)
        }
        None => heap_filter(heap, |_| true),
    }
}

fn heap_filter<F>(heap: &mut HeapFile, keep: F) -> Result<Vec<Vec<Value>>>
where
    F: Fn(&[Value]) -> bool,
{
    let mut rows = Vec::new();
    for position in 0..heap.record_count() {
        if let Some((tuple, true)) = heap.read(position)? {
            if keep(&tuple) {
                rows.push(tuple);
            }
        }
    }
    Ok(rows)
}

fn predicate_position(table: &Table, column: &str) -> Result<usize> {
    table
        .column_position(column)
        .ok_or_else(|| EngineError::UnknownPredicateColumn(column.into()).into())
}

/// Index selection for `col = v`: an AVL on the column wins, then any
/// other key index on it; with no index on the column the statement falls
/// through to a full heap scan.
fn equality(
    table: &Table,
    heap: &mut HeapFile,
    column: &str,
    literal: &Literal,
) -> Result<Vec<Vec<Value>>> {
    let key_col = predicate_position(table, column)?;
    let target = exec::typed_value(literal, table.tab_columns[key_col].col_type)?;

    let candidates = table.indexes_on(key_col);
    let chosen = candidates
        .iter()
        .find(|i| i.idx_kind == IndexKind::Avl)
        .or_else(|| candidates.iter().find(|i| i.idx_kind != IndexKind::RTree))
        .copied();

    match chosen {
        Some(index) => {
            debug!("equality served by {} index {}", index.idx_kind, index.idx_name);
            let mut file = open_index(table, index)?;
            match file.search(&target)? {
                Some(position) => heap.scan(&[position]),
                None => Ok(Vec::new()),
            }
        }
        None => {
            debug!("no index on {}, falling back to heap scan", column);
            heap_filter(heap, |tuple| tuple[key_col].key_cmp(&target) == Ordering::Equal)
        }
    }
}

/// `BETWEEN lo AND hi`: the primary B+ tree when it keys the predicate
/// column, else an AVL on it, else a filtered heap scan.
fn between(
    table: &Table,
    heap: &mut HeapFile,
    column: &str,
    low: &Literal,
    high: &Literal,
) -> Result<Vec<Vec<Value>>> {
    let key_col = predicate_position(table, column)?;
    let tag = table.tab_columns[key_col].col_type;
    let lo = exec::typed_value(low, tag)?;
    let hi = exec::typed_value(high, tag)?;

    let primary_serves = table
        .primary_index()
        .map(|p| p.idx_columns[0] == key_col)
        .unwrap_or(false);
    let chosen = if primary_serves {
        table.primary_index()
    } else {
        table
            .indexes_on(key_col)
            .into_iter()
            .find(|i| i.idx_kind == IndexKind::Avl)
    };

    match chosen {
        Some(index) => {
            debug!("range served by {} index {}", index.idx_kind, index.idx_name);
            let mut file = open_index(table, index)?;
            let positions: Vec<u32> = file.range_search(&lo, &hi)?.into_iter().map(|(_, p)| p).collect();
            heap.scan(&positions)
        }
        None => heap_filter(heap, |tuple| {
            tuple[key_col].key_cmp(&lo) != Ordering::Less && tuple[key_col].key_cmp(&hi) != Ordering::Greater
        }),
    }
}

/// Four-range conjunction: served by the table's spatial index, chosen by
/// kind rather than column.
fn spatial(
    table: &Table,
    heap: &mut HeapFile,
    x_low: &Literal,
    x_high: &Literal,
    y_low: &Literal,
    y_high: &Literal,
) -> Result<Vec<Vec<Value>>> {
    let index = table
        .index_of_kind(IndexKind::RTree)
        .ok_or_else(|| EngineError::UnsupportedPredicate("spatial range without a spatial index".into()))?;

    let mut file = open_index(table, index)?;
    let spatial = file
        .as_spatial_mut()
        .ok_or_else(|| EngineError::CorruptNode("spatial index backing file is not spatial".into()))?;
    let rect = (
        exec::literal_f64(x_low)?,
        exec::literal_f64(y_low)?,
        exec::literal_f64(x_high)?,
        exec::literal_f64(y_high)?,
    );
    let positions = spatial.range_query(rect);
    debug!("spatial range {:?} hit {} positions", rect, positions.len());
    heap.scan(&positions)
}

fn project(select: &ast::Select, table: &Table, rows: Vec<Vec<Value>>) -> Result<QueryOutput> {
    let all_columns: Vec<String> = table.tab_columns.iter().map(|c| c.col_name.clone()).collect();
    match sql::projection(select)? {
        None => Ok(QueryOutput::Rows {
            columns: all_columns,
            rows,
        }),
        Some(wanted) => {
            let positions: Vec<usize> = wanted
                .iter()
                .map(|name| {
                    table
                        .column_position(name)
                        .ok_or_else(|| EngineError::ColumnNotFound(name.clone()).into())
                })
                .collect::<Result<_>>()?;
            let rows = rows
                .into_iter()
                .map(|tuple| positions.iter().map(|&p| tuple[p].clone()).collect())
                .collect();
            Ok(QueryOutput::Rows {
                columns: wanted,
                rows,
            })
        }
    }
}
