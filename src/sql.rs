use anyhow::Result;
use sqlparser::ast::{
    self, BinaryOperator, ColumnOption, DataType, Expr, ObjectName, SchemaName, Select, SelectItem,
    SetExpr, Statement, UnaryOperator,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use crate::catalog::def::Column;
use crate::disk::codec::{DataTypeTag, GEOMETRIC_SIZE, JSON_SIZE, DECIMAL_SIZE};
use crate::error::EngineError;

pub fn parse(sql: &str) -> Result<Vec<Statement>> {
    Ok(Parser::parse_sql(&GenericDialect {}, sql)?)
}

/// Fully qualified `db.schema.table`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualifiedName {
    pub db: String,
    pub schema: String,
    pub table: String,
}

impl std::fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.db, self.schema, self.table)
    }
}

pub fn qualified_name(name: &ObjectName) -> Result<QualifiedName> {
    let parts: Vec<String> = name.0.iter().map(|i| i.value.clone()).collect();
    match parts.as_slice() {
        [db, schema, table] => Ok(QualifiedName {
            db: db.clone(),
            schema: schema.clone(),
            table: table.clone(),
        }),
        _ => Err(EngineError::UnsupportedStatement(format!(
            "table names must be db.schema.table, got {}",
            name
        ))
        .into()),
    }
}

pub fn single_name(name: &ObjectName) -> Result<String> {
    match name.0.as_slice() {
        [ident] => Ok(ident.value.clone()),
        _ => Err(EngineError::UnsupportedStatement(format!("expected a bare name, got {}", name)).into()),
    }
}

/// `CREATE SCHEMA db.name`.
pub fn schema_parts(schema_name: &SchemaName) -> Result<(String, String)> {
    match schema_name {
        SchemaName::Simple(name) => match name.0.as_slice() {
            [db, schema] => Ok((db.value.clone(), schema.value.clone())),
            _ => Err(EngineError::UnsupportedStatement(format!(
                "schema names must be db.schema, got {}",
                name
            ))
            .into()),
        },
        _ => Err(EngineError::UnsupportedStatement("schema authorization clauses".into()).into()),
    }
}

fn declared_len(length: &Option<ast::CharacterLength>) -> u32 {
    match length {
        Some(ast::CharacterLength::IntegerLength { length, .. }) => *length as u32,
        _ => 1,
    }
}

pub fn map_data_type(data_type: &DataType) -> Result<(DataTypeTag, u32)> {
    let mapped = match data_type {
        DataType::SmallInt(_) => (DataTypeTag::SmallInt, 2),
        DataType::Int(_) | DataType::Integer(_) => (DataTypeTag::Int, 4),
        DataType::BigInt(_) => (DataTypeTag::BigInt, 8),
        DataType::Double | DataType::DoublePrecision => (DataTypeTag::Double, 8),
        DataType::Char(length) | DataType::Character(length) => (DataTypeTag::Char, declared_len(length)),
        DataType::Varchar(length) | DataType::CharacterVarying(length) => {
            (DataTypeTag::Varchar, declared_len(length))
        }
        DataType::Boolean => (DataTypeTag::Boolean, 1),
        DataType::Uuid => (DataTypeTag::Uuid, 16),
        DataType::Date => (DataTypeTag::Date, 4),
        DataType::Time(_, _) => (DataTypeTag::Time, 8),
        DataType::Timestamp(_, _) => (DataTypeTag::Timestamp, 8),
        DataType::JSON => (DataTypeTag::Json, JSON_SIZE as u32),
        DataType::Decimal(_) | DataType::Numeric(_) | DataType::Dec(_) => {
            (DataTypeTag::Decimal, DECIMAL_SIZE as u32)
        }
        DataType::Custom(name, _) if name.to_string().eq_ignore_ascii_case("geometric") => {
            (DataTypeTag::Geometric, GEOMETRIC_SIZE as u32)
        }
        other => {
            return Err(EngineError::UnsupportedStatement(format!("column type {}", other)).into());
        }
    };
    Ok(mapped)
}

pub fn column_defs(defs: &[ast::ColumnDef]) -> Result<Vec<Column>> {
    defs.iter()
        .map(|def| {
            let (tag, len) = map_data_type(&def.data_type)?;
            let not_null = def
                .options
                .iter()
                .any(|o| matches!(o.option, ColumnOption::NotNull));
            let has_default = def
                .options
                .iter()
                .any(|o| matches!(o.option, ColumnOption::Default(_)));
            Ok(Column::new(&def.name.value, tag, len, not_null, has_default))
        })
        .collect()
}

/// Untyped SQL literal; the operator layer types it against the bound
/// column's tag.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(String),
    Text(String),
    Bool(bool),
    Null,
}

pub fn literal(expr: &Expr) -> Result<Literal> {
    match expr {
        Expr::Value(ast::Value::Number(n, _)) => Ok(Literal::Number(n.clone())),
        Expr::Value(ast::Value::SingleQuotedString(s)) => Ok(Literal::Text(s.clone())),
        Expr::Value(ast::Value::Boolean(b)) => Ok(Literal::Bool(*b)),
        Expr::Value(ast::Value::Null) => Ok(Literal::Null),
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => match literal(expr)? {
            Literal::Number(n) => Ok(Literal::Number(format!("-{}", n))),
            other => Err(EngineError::UnsupportedStatement(format!("negated literal {:?}", other)).into()),
        },
        other => Err(EngineError::UnsupportedStatement(format!("literal {}", other)).into()),
    }
}

fn predicate_column(expr: &Expr) -> Result<String> {
    match expr {
        Expr::Identifier(ident) => Ok(ident.value.clone()),
        Expr::CompoundIdentifier(parts) => Ok(parts
            .last()
            .map(|i| i.value.clone())
            .unwrap_or_default()),
        other => Err(EngineError::UnsupportedPredicate(format!("{}", other)).into()),
    }
}

/// The predicate shapes the dispatcher executes.
#[derive(Debug, Clone)]
pub enum WherePlan {
    None,
    Equality {
        column: String,
        literal: Literal,
    },
    Between {
        column: String,
        low: Literal,
        high: Literal,
    },
    /// Conjunction of two BETWEENs over the spatial axes.
    SpatialRange {
        x_column: String,
        x_low: Literal,
        x_high: Literal,
        y_column: String,
        y_low: Literal,
        y_high: Literal,
    },
}

fn between_parts(expr: &Expr) -> Result<(String, Literal, Literal)> {
    match expr {
        Expr::Between {
            expr,
            negated: false,
            low,
            high,
        } => Ok((predicate_column(expr)?, literal(low)?, literal(high)?)),
        other => Err(EngineError::UnsupportedPredicate(format!("{}", other)).into()),
    }
}

pub fn parse_where(selection: Option<&Expr>) -> Result<WherePlan> {
    let expr = match selection {
        None => return Ok(WherePlan::None),
        Some(expr) => expr,
    };
    match expr {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::Eq,
            right,
        } => Ok(WherePlan::Equality {
            column: predicate_column(left)?,
            literal: literal(right)?,
        }),
        Expr::Between { negated: false, .. } => {
            let (column, low, high) = between_parts(expr)?;
            Ok(WherePlan::Between { column, low, high })
        }
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            let (x_column, x_low, x_high) = between_parts(left)?;
            let (y_column, y_low, y_high) = between_parts(right)?;
            Ok(WherePlan::SpatialRange {
                x_column,
                x_low,
                x_high,
                y_column,
                y_low,
                y_high,
            })
        }
        other => Err(EngineError::UnsupportedPredicate(format!("{}", other)).into()),
    }
}

pub fn select_body(query: &ast::Query) -> Result<&Select> {
    match query.body.as_ref() {
        SetExpr::Select(select) => Ok(select),
        other => Err(EngineError::UnsupportedStatement(format!("{}", other)).into()),
    }
}

pub fn table_of_select(select: &Select) -> Result<&ObjectName> {
    let relation = select
        .from
        .first()
        .map(|t| &t.relation)
        .ok_or_else(|| EngineError::UnsupportedStatement("SELECT without FROM".into()))?;
    match relation {
        ast::TableFactor::Table { name, .. } => Ok(name),
        other => Err(EngineError::UnsupportedStatement(format!("{}", other)).into()),
    }
}

/// `None` for `SELECT *`, else the projected column names.
pub fn projection(select: &Select) -> Result<Option<Vec<String>>> {
    let mut columns = Vec::with_capacity(select.projection.len());
    for item in &select.projection {
        match item {
            SelectItem::Wildcard(_) => return Ok(None),
            SelectItem::UnnamedExpr(expr) => columns.push(predicate_column(expr)?),
            other => {
                return Err(EngineError::UnsupportedStatement(format!("projection {}", other)).into());
            }
        }
    }
    Ok(Some(columns))
}

/// The literal rows of `INSERT ... VALUES (...), (...)`.
pub fn values_rows(query: &ast::Query) -> Result<Vec<Vec<Literal>>> {
    match query.body.as_ref() {
        SetExpr::Values(values) => values
            .rows
            .iter()
            .map(|row| row.iter().map(literal).collect())
            .collect(),
        other => Err(EngineError::UnsupportedStatement(format!("INSERT source {}", other)).into()),
    }
}

/// Key column of `CREATE INDEX ... (col)`; single-column in this release.
pub fn index_column(columns: &[ast::OrderByExpr]) -> Result<String> {
    match columns {
        [only] => predicate_column(&only.expr),
        _ => Err(EngineError::UnsupportedStatement("indexes take exactly one key column".into()).into()),
    }
}

#[cfg(test)]
mod sql_tests {

    use std::env::set_var;

    use super::*;
    use crate::util;

    fn setup() {
        set_var("RUST_LOG", "info");
        util::init();
    }

    fn parse_one(sql: &str) -> Statement {
        parse(sql).unwrap().into_iter().next().unwrap()
    }

    #[test]
    fn create_table_columns() {
        setup();
        let stmt = parse_one(
            "CREATE TABLE ecm.store.employees (id INT NOT NULL, name VARCHAR(50), wage DOUBLE DEFAULT 0)",
        );
        let Statement::CreateTable(ct) = stmt else {
            panic!("expected CREATE TABLE");
        };
        assert_eq!(
            qualified_name(&ct.name).unwrap(),
            QualifiedName {
                db: "ecm".into(),
                schema: "store".into(),
                table: "employees".into()
            }
        );
        let columns = column_defs(&ct.columns).unwrap();
        assert_eq!(columns.len(), 3);
        assert_eq!(columns[0].col_type, DataTypeTag::Int);
        assert!(columns[0].col_not_null);
        assert_eq!(columns[1].col_type, DataTypeTag::Varchar);
        assert_eq!(columns[1].col_len, 50);
        assert!(columns[2].col_has_default);
    }

    #[test]
    fn where_shapes() {
        setup();
        let stmt = parse_one("SELECT * FROM a.b.c WHERE id = 15");
        let Statement::Query(query) = stmt else { panic!() };
        let select = select_body(&query).unwrap();
        match parse_where(select.selection.as_ref()).unwrap() {
            WherePlan::Equality { column, literal } => {
                assert_eq!(column, "id");
                assert_eq!(literal, Literal::Number("15".into()));
            }
            other => panic!("unexpected plan {:?}", other),
        }

        let stmt = parse_one("SELECT * FROM a.b.c WHERE id BETWEEN 5 AND 20");
        let Statement::Query(query) = stmt else { panic!() };
        let select = select_body(&query).unwrap();
        assert!(matches!(
            parse_where(select.selection.as_ref()).unwrap(),
            WherePlan::Between { .. }
        ));

        let stmt = parse_one(
            "SELECT name FROM geo.public.cities WHERE lat BETWEEN -16 AND -12 AND lon BETWEEN -75 AND -70",
        );
        let Statement::Query(query) = stmt else { panic!() };
        let select = select_body(&query).unwrap();
        match parse_where(select.selection.as_ref()).unwrap() {
            WherePlan::SpatialRange { x_low, y_high, .. } => {
                assert_eq!(x_low, Literal::Number("-16".into()));
                assert_eq!(y_high, Literal::Number("-70".into()));
            }
            other => panic!("unexpected plan {:?}", other),
        }
    }

    #[test]
    fn insert_values_rows() {
        setup();
        let stmt = parse_one("INSERT INTO a.b.c (id, name) VALUES (1, 'Ana'), (2, 'Bob')");
        let Statement::Insert(insert) = stmt else { panic!() };
        let rows = values_rows(insert.source.as_ref().unwrap()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], Literal::Number("1".into()));
        assert_eq!(rows[1][1], Literal::Text("Bob".into()));
    }

    #[test]
    fn create_index_using_clause() {
        setup();
        let stmt = parse_one("CREATE INDEX idx_name ON ecm.store.products USING HASH(product_name)");
        let Statement::CreateIndex(ci) = stmt else { panic!() };
        assert_eq!(ci.using.as_ref().unwrap().value.to_uppercase(), "HASH");
        assert_eq!(index_column(&ci.columns).unwrap(), "product_name");
    }

    #[test]
    fn geometric_is_a_custom_type() {
        setup();
        let stmt = parse_one("CREATE TABLE a.b.c (shape GEOMETRIC(32))");
        let Statement::CreateTable(ct) = stmt else { panic!() };
        let columns = column_defs(&ct.columns).unwrap();
        assert_eq!(columns[0].col_type, DataTypeTag::Geometric);
        assert_eq!(columns[0].col_len, 32);
    }
}
