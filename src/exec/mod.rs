pub mod copy;
pub mod create;
pub mod delete;
pub mod insert;
pub mod select;

use std::path::Path;

use anyhow::Result;
use log::debug;
use sqlparser::ast::Statement;

use crate::catalog::mgr::CatalogManager;
use crate::disk::codec::{self, DataTypeTag, Value};
use crate::error::EngineError;
use crate::sql::{self, Literal};

/// What a statement hands back: a status line or materialized rows.
#[derive(Debug, PartialEq)]
pub enum QueryOutput {
    Status(String),
    Rows {
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    },
}

/// Statement entry point: parses SQL and dispatches each statement to its
/// operator. Single-threaded; statements run to completion in order.
#[derive(Debug)]
pub struct Executor {
    catalog: CatalogManager,
}

impl Executor {
    pub fn open(data_dir: &Path) -> Result<Self> {
        Ok(Self {
            catalog: CatalogManager::open(data_dir)?,
        })
    }

    pub fn catalog(&self) -> &CatalogManager {
        &self.catalog
    }

    /// Execute one or more `;`-separated statements; the last statement's
    /// output wins.
    pub fn execute(&mut self, sql_text: &str) -> Result<QueryOutput> {
        let statements = sql::parse(sql_text)?;
        let mut output = QueryOutput::Status("ok".into());
        for statement in &statements {
            output = self.dispatch(statement)?;
        }
        Ok(output)
    }

    fn dispatch(&mut self, statement: &Statement) -> Result<QueryOutput> {
        debug!("dispatch {}", statement);
        match statement {
            Statement::CreateDatabase { .. }
            | Statement::CreateSchema { .. }
            | Statement::CreateTable(_)
            | Statement::CreateIndex(_) => create::run(&mut self.catalog, statement),
            Statement::Insert(stmt) => insert::run(&self.catalog, stmt),
            Statement::Query(query) => select::run(&self.catalog, query),
            Statement::Delete(stmt) => delete::run(&self.catalog, stmt),
            Statement::Copy { .. } => copy::run(&self.catalog, statement),
            other => {
                Err(EngineError::UnsupportedStatement(format!("{}", other)).into())
            }
        }
    }
}

/// Type an untyped SQL literal against the bound column's tag.
pub fn typed_value(literal: &Literal, tag: DataTypeTag) -> Result<Value> {
    match literal {
        Literal::Null => Ok(Value::Null),
        Literal::Bool(b) => {
            if tag == DataTypeTag::Boolean {
                Ok(Value::Boolean(*b))
            } else {
                Err(EngineError::ValueOutOfRange {
                    value: b.to_string(),
                    type_name: tag.to_string(),
                }
                .into())
            }
        }
        Literal::Number(text) | Literal::Text(text) => codec::parse_text(text, tag),
    }
}

pub fn literal_f64(literal: &Literal) -> Result<f64> {
    match literal {
        Literal::Number(text) | Literal::Text(text) => text.parse().map_err(|_| {
            EngineError::ValueOutOfRange {
                value: text.clone(),
                type_name: "DOUBLE".into(),
            }
            .into()
        }),
        other => Err(EngineError::UnsupportedPredicate(format!("{:?} in a spatial range", other)).into()),
    }
}

/// Numeric view of a stored value, for spatial coordinates.
pub fn value_f64(value: &Value) -> Result<f64> {
    match value {
        Value::SmallInt(v) => Ok(*v as f64),
        Value::Int(v) => Ok(*v as f64),
        Value::BigInt(v) => Ok(*v as f64),
        Value::Double(v) => Ok(*v),
        other => Err(EngineError::ValueOutOfRange {
            value: other.to_string(),
            type_name: "DOUBLE".into(),
        }
        .into()),
    }
}
