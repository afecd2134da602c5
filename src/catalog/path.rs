use std::path::{Path, PathBuf};

/// Translates logical catalog names into filesystem paths under the data
/// directory:
///
/// ```text
/// system/catalog.dat
/// db_<name>/meta.dat
/// db_<name>/schema_<name>/meta.dat
/// db_<name>/schema_<name>/table_<name>/{meta.dat,data.dat,idx_<idx>_<table>.dat}
/// ```
#[derive(Debug, Clone)]
pub struct PathBuilder {
    base_dir: PathBuf,
}

impl PathBuilder {
    pub fn new(base_dir: &Path) -> Self {
        Self {
            base_dir: base_dir.to_path_buf(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn system_dir(&self) -> PathBuf {
        self.base_dir.join("system")
    }

    pub fn catalog_file(&self) -> PathBuf {
        self.system_dir().join("catalog.dat")
    }

    pub fn database_dir(&self, db: &str) -> PathBuf {
        self.base_dir.join(format!("db_{}", db))
    }

    pub fn database_meta(&self, db: &str) -> PathBuf {
        self.database_dir(db).join("meta.dat")
    }

    pub fn schema_dir(&self, db: &str, schema: &str) -> PathBuf {
        self.database_dir(db).join(format!("schema_{}", schema))
    }

    pub fn schema_meta(&self, db: &str, schema: &str) -> PathBuf {
        self.schema_dir(db, schema).join("meta.dat")
    }

    pub fn table_dir(&self, db: &str, schema: &str, table: &str) -> PathBuf {
        self.schema_dir(db, schema).join(format!("table_{}", table))
    }

    pub fn table_meta(&self, db: &str, schema: &str, table: &str) -> PathBuf {
        self.table_dir(db, schema, table).join("meta.dat")
    }

    pub fn table_data(&self, db: &str, schema: &str, table: &str) -> PathBuf {
        self.table_dir(db, schema, table).join("data.dat")
    }

    pub fn table_index(&self, db: &str, schema: &str, table: &str, index: &str) -> PathBuf {
        self.table_dir(db, schema, table)
            .join(format!("idx_{}_{}.dat", index, table))
    }
}

#[cfg(test)]
mod path_tests {

    use std::env::set_var;

    use super::*;
    use crate::util;

    fn setup() {
        set_var("RUST_LOG", "info");
        util::init();
    }

    #[test]
    fn logical_names_map_to_layout() {
        setup();
        let paths = PathBuilder::new(Path::new("/data"));
        assert_eq!(paths.catalog_file(), PathBuf::from("/data/system/catalog.dat"));
        assert_eq!(paths.database_meta("ecm"), PathBuf::from("/data/db_ecm/meta.dat"));
        assert_eq!(
            paths.schema_meta("ecm", "store"),
            PathBuf::from("/data/db_ecm/schema_store/meta.dat")
        );
        assert_eq!(
            paths.table_data("ecm", "store", "employees"),
            PathBuf::from("/data/db_ecm/schema_store/table_employees/data.dat")
        );
        assert_eq!(
            paths.table_index("ecm", "store", "employees", "pk"),
            PathBuf::from("/data/db_ecm/schema_store/table_employees/idx_pk_employees.dat")
        );
    }
}
