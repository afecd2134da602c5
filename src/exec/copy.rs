use anyhow::Result;
use log::info;
use sqlparser::ast::{CopySource, CopyTarget, Statement};

use crate::catalog::mgr::CatalogManager;
use crate::disk::codec;
use crate::error::EngineError;
use crate::exec::QueryOutput;
use crate::exec::insert::insert_rows;
use crate::sql;

/// `COPY <table> FROM '<path.csv>'`: one insert per CSV row, first line
/// consumed as the header.
pub fn run(catalog: &CatalogManager, statement: &Statement) -> Result<QueryOutput> {
    let (object_name, filename) = match statement {
        Statement::Copy {
            source: CopySource::Table { table_name, .. },
            to: false,
            target: CopyTarget::File { filename },
            ..
        } => (table_name, filename),
        other => {
            return Err(EngineError::UnsupportedStatement(format!("{}", other)).into());
        }
    };
    let name = sql::qualified_name(object_name)?;
    let table = catalog.get_table(&name.db, &name.schema, &name.table)?;

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(filename)
        .map_err(|_| EngineError::MissingBackingFile(filename.clone()))?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let mut tuple = Vec::with_capacity(table.tab_columns.len());
        for (i, column) in table.tab_columns.iter().enumerate() {
            let field = record.get(i).unwrap_or("").trim();
            tuple.push(codec::parse_text(field, column.col_type)?);
        }
        rows.push(tuple);
    }

    let copied = insert_rows(catalog, &name, &table, rows)?;
    info!("copied {} rows from {} into {}", copied, filename, name);
    Ok(QueryOutput::Status(format!("{} rows copied", copied)))
}
