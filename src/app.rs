use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use log::{debug, info};

use crate::exec::{Executor, QueryOutput};

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Execute SQL statement(s).
    Exec {
        /// The statement text, `;`-separated for batches.
        #[arg(short, long)]
        query: String,
    },

    /// Print catalog information.
    Info,

    /// List all databases.
    Databases,

    /// List the schemas of a database.
    Schemas {
        /// Database name.
        #[arg(short, long)]
        db: String,
    },

    /// List the tables of a schema, with columns and indexes.
    Tables {
        /// Database name.
        #[arg(short, long)]
        db: String,

        /// Schema name.
        #[arg(short, long)]
        schema: String,
    },
}

#[derive(Debug)]
pub struct App {
    pub timer: Instant,
    pub data_dir: PathBuf,
}

impl App {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            timer: Instant::now(),
            data_dir,
        }
    }

    pub fn time_costs(&self) -> Duration {
        self.timer.elapsed()
    }

    pub fn run(&mut self, command: Commands) -> Result<()> {
        debug!("{:?}, {:?}", command, self);

        match command {
            Commands::Exec { query } => self.do_exec(&query)?,
            Commands::Info => self.do_info()?,
            Commands::Databases => self.do_databases()?,
            Commands::Schemas { db } => self.do_schemas(&db)?,
            Commands::Tables { db, schema } => self.do_tables(&db, &schema)?,
        }

        Ok(())
    }

    fn do_exec(&self, query: &str) -> Result<()> {
        let mut executor = Executor::open(&self.data_dir)?;
        match executor.execute(query)? {
            QueryOutput::Status(status) => {
                println!("{}", status.green());
            }
            QueryOutput::Rows { columns, rows } => {
                println!("{}", columns.join(" | ").yellow());
                for row in &rows {
                    let line = row.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(" | ");
                    println!("{}", line);
                }
                println!("{} {}", rows.len().to_string().blue(), "rows");
            }
        }
        Ok(())
    }

    fn do_info(&self) -> Result<()> {
        let executor = Executor::open(&self.data_dir)?;
        let catalog = executor.catalog();

        println!("Catalog Information:");
        println!("{:>12} => {}", "version".green(), catalog.version().blue());
        println!(
            "{:>12} => {}",
            "created_at".green(),
            catalog.created_at().format("%Y-%m-%d %H:%M:%S").to_string().blue()
        );
        println!(
            "{:>12} => {}",
            "databases".green(),
            catalog.database_names().len().to_string().blue()
        );
        Ok(())
    }

    fn do_databases(&self) -> Result<()> {
        let executor = Executor::open(&self.data_dir)?;
        let catalog = executor.catalog();
        for name in catalog.database_names() {
            let database = catalog.get_database(&name)?;
            println!(
                "db_id={}, db_name={}, schemas={}",
                database.db_id.to_string().magenta(),
                database.db_name.yellow(),
                database.db_schemas.len().to_string().blue(),
            );
        }
        Ok(())
    }

    fn do_schemas(&self, db: &str) -> Result<()> {
        let executor = Executor::open(&self.data_dir)?;
        for schema in executor.catalog().get_schemas(db)? {
            println!(
                "sch_id={}, sch_name={}, tables={}",
                schema.sch_id.to_string().magenta(),
                schema.sch_name.yellow(),
                schema.sch_tables.len().to_string().blue(),
            );
        }
        Ok(())
    }

    fn do_tables(&self, db: &str, schema: &str) -> Result<()> {
        let executor = Executor::open(&self.data_dir)?;
        for table in executor.catalog().get_tables(db, schema)? {
            println!(
                "TAB{}: tab_name={}, tuples={}, page_size={}",
                table.tab_id,
                table.tab_name.magenta(),
                table.tab_tuples.to_string().blue(),
                table.tab_page_size.to_string().cyan(),
            );
            for (pos, col) in table.tab_columns.iter().enumerate() {
                println!(
                    " COL{}: name={}, type={}, len={}, not_null={}",
                    pos,
                    col.col_name.magenta(),
                    col.col_type.to_string().blue(),
                    col.col_len.to_string().cyan(),
                    col.col_not_null.to_string().yellow(),
                );
            }
            for idx in &table.tab_indexes {
                println!(
                    " IDX{}: name={}, kind={}, column={}, tuples={}, primary={}",
                    idx.idx_id,
                    idx.idx_name.magenta(),
                    idx.idx_kind.to_string().blue(),
                    idx.idx_columns[0].to_string().cyan(),
                    idx.idx_tuples.to_string().blue(),
                    idx.idx_is_primary.to_string().yellow(),
                );
                info!("{:?}", idx);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod app_tests {
    use std::env::set_var;

    use tempfile::TempDir;

    use super::*;
    use crate::util;

    fn setup() {
        set_var("RUST_LOG", "info");
        util::init();
    }

    #[test]
    fn exec_then_inspect() {
        setup();
        let dir = TempDir::new().unwrap();
        let mut app = App::new(dir.path().to_path_buf());

        assert!(app
            .run(Commands::Exec {
                query: "CREATE DATABASE ecm; CREATE SCHEMA ecm.store".into()
            })
            .is_ok());
        assert!(app
            .run(Commands::Exec {
                query: "CREATE TABLE ecm.store.employees (id INT, name VARCHAR(50))".into()
            })
            .is_ok());
        assert!(app
            .run(Commands::Exec {
                query: "INSERT INTO ecm.store.employees (id, name) VALUES (1, 'Ana'), (2, 'Bob')".into()
            })
            .is_ok());
        assert!(app
            .run(Commands::Exec {
                query: "SELECT * FROM ecm.store.employees".into()
            })
            .is_ok());

        assert!(app.run(Commands::Info).is_ok());
        assert!(app.run(Commands::Databases).is_ok());
        assert!(app.run(Commands::Schemas { db: "ecm".into() }).is_ok());
        assert!(app
            .run(Commands::Tables {
                db: "ecm".into(),
                schema: "store".into()
            })
            .is_ok());
    }

    #[test]
    fn bad_statement_is_an_error() {
        setup();
        let dir = TempDir::new().unwrap();
        let mut app = App::new(dir.path().to_path_buf());
        assert!(app
            .run(Commands::Exec {
                query: "SELECT * FROM nowhere.at.all".into()
            })
            .is_err());
    }
}
