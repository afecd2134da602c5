use std::fs;

use tempfile::TempDir;

use reldb::disk::codec::Value;
use reldb::exec::{Executor, QueryOutput};
use reldb::util;

fn exec(executor: &mut Executor, sql: &str) -> QueryOutput {
    executor.execute(sql).unwrap()
}

fn rows_of(output: QueryOutput) -> (Vec<String>, Vec<Vec<Value>>) {
    match output {
        QueryOutput::Rows { columns, rows } => (columns, rows),
        other => panic!("expected rows, got {:?}", other),
    }
}

fn store_fixture(dir: &TempDir) -> Executor {
    let mut executor = Executor::open(dir.path()).unwrap();
    exec(&mut executor, "CREATE DATABASE ecm");
    exec(&mut executor, "CREATE SCHEMA ecm.store");
    executor
}

#[test]
fn insert_read_and_tombstone() {
    util::init();
    let dir = TempDir::new().unwrap();
    let mut executor = store_fixture(&dir);

    exec(&mut executor, "CREATE TABLE ecm.store.t (id INT, name VARCHAR(20))");
    exec(
        &mut executor,
        "INSERT INTO ecm.store.t (id, name) VALUES (1, 'Ana'), (2, 'Bob')",
    );

    let (columns, rows) = rows_of(exec(&mut executor, "SELECT * FROM ecm.store.t"));
    assert_eq!(columns, vec!["id", "name"]);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0], vec![Value::Int(1), Value::Varchar("Ana".into())]);

    let out = exec(&mut executor, "DELETE FROM ecm.store.t WHERE id = 1");
    assert_eq!(out, QueryOutput::Status("1 rows deleted".into()));

    // the slot is tombstoned, not compacted: Bob keeps his position
    let (_, rows) = rows_of(exec(&mut executor, "SELECT * FROM ecm.store.t"));
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][1], Value::Varchar("Bob".into()));

    let (_, rows) = rows_of(exec(&mut executor, "SELECT name FROM ecm.store.t WHERE id = 2"));
    assert_eq!(rows, vec![vec![Value::Varchar("Bob".into())]]);
}

#[test]
fn hash_equality_after_backfill_and_splits() {
    util::init();
    let dir = TempDir::new().unwrap();
    let mut executor = store_fixture(&dir);
    // product_name is a non-primary column, so equality on it is the hash
    // index's to serve
    exec(
        &mut executor,
        "CREATE TABLE ecm.store.products (product_id INT, product_name VARCHAR(50), stock INT)",
    );

    // first batch lands before the index exists and is backfilled
    let mut values: Vec<String> = (0..60)
        .map(|i| format!("({}, 'item-{:03}', {})", i + 1, i, i))
        .collect();
    values.push("(900, 'Gouda Cheese', 7)".into());
    let first = format!(
        "INSERT INTO ecm.store.products (product_id, product_name, stock) VALUES {}",
        values.join(", ")
    );
    exec(&mut executor, &first);
    exec(
        &mut executor,
        "CREATE INDEX idx_product_name ON ecm.store.products USING HASH(product_name)",
    );

    // second batch goes through the live index, forcing directory splits
    let values: Vec<String> = (60..160)
        .map(|i| format!("({}, 'item-{:03}', {})", i + 1, i, i))
        .collect();
    let second = format!(
        "INSERT INTO ecm.store.products (product_id, product_name, stock) VALUES {}",
        values.join(", ")
    );
    exec(&mut executor, &second);

    let (_, rows) = rows_of(exec(
        &mut executor,
        "SELECT * FROM ecm.store.products WHERE product_name = 'Gouda Cheese'",
    ));
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][2], Value::Int(7));

    let (_, rows) = rows_of(exec(
        &mut executor,
        "SELECT stock FROM ecm.store.products WHERE product_name = 'item-142'",
    ));
    assert_eq!(rows, vec![vec![Value::Int(142)]]);

    let (_, rows) = rows_of(exec(
        &mut executor,
        "SELECT * FROM ecm.store.products WHERE product_name = 'Cheddar'",
    ));
    assert!(rows.is_empty());
}

#[test]
fn primary_btree_range_scan() {
    util::init();
    let dir = TempDir::new().unwrap();
    let mut executor = store_fixture(&dir);
    exec(
        &mut executor,
        "CREATE TABLE ecm.store.employees (id INT, name VARCHAR(100), salary DOUBLE)",
    );

    let values: Vec<String> = (1..=60)
        .map(|i| format!("({}, 'emp-{:02}', {}.5)", i, i, 300 + i))
        .collect();
    let insert = format!(
        "INSERT INTO ecm.store.employees (id, name, salary) VALUES {}",
        values.join(", ")
    );
    exec(&mut executor, &insert);

    let (_, rows) = rows_of(exec(
        &mut executor,
        "SELECT * FROM ecm.store.employees WHERE id BETWEEN 5 AND 20",
    ));
    assert_eq!(rows.len(), 16);
    for (offset, row) in rows.iter().enumerate() {
        assert_eq!(row[0], Value::Int(5 + offset as i32));
    }

    // the no-predicate scan is the primary index's ordered traversal
    let (_, rows) = rows_of(exec(&mut executor, "SELECT id FROM ecm.store.employees"));
    assert_eq!(rows.len(), 60);
    assert_eq!(rows[0][0], Value::Int(1));
    assert_eq!(rows[59][0], Value::Int(60));
}

#[test]
fn isam_index_serves_equality() {
    util::init();
    let dir = TempDir::new().unwrap();
    let mut executor = store_fixture(&dir);
    // the ISAM key is a non-primary column, so the pk cannot shadow it
    exec(
        &mut executor,
        "CREATE TABLE ecm.store.codes (id INT, code INT, label VARCHAR(20))",
    );

    let values: Vec<String> = (1..=25).map(|i| format!("({}, {}, 'c{}')", i, i * 2, i * 2)).collect();
    exec(
        &mut executor,
        &format!(
            "INSERT INTO ecm.store.codes (id, code, label) VALUES {}",
            values.join(", ")
        ),
    );
    exec(
        &mut executor,
        "CREATE INDEX idx_code ON ecm.store.codes USING ISAM(code)",
    );
    // post-build inserts land in overflow chains
    exec(
        &mut executor,
        "INSERT INTO ecm.store.codes (id, code, label) VALUES (26, 52, 'c52'), (27, 54, 'c54')",
    );

    for code in [2, 26, 50, 52, 54] {
        let (_, rows) = rows_of(exec(
            &mut executor,
            &format!("SELECT label FROM ecm.store.codes WHERE code = {}", code),
        ));
        assert_eq!(rows, vec![vec![Value::Varchar(format!("c{}", code))]], "code {}", code);
    }
}

#[test]
fn avl_range_and_delete_mirror() {
    util::init();
    let dir = TempDir::new().unwrap();
    let mut executor = store_fixture(&dir);
    exec(&mut executor, "CREATE TABLE ecm.store.tags (id INT, name VARCHAR(20))");
    exec(
        &mut executor,
        "CREATE INDEX idx_tag_name ON ecm.store.tags USING AVL(name)",
    );
    exec(
        &mut executor,
        "INSERT INTO ecm.store.tags (id, name) VALUES (1, '1'), (2, '2'), (3, '3'), (4, '4'), (5, '5')",
    );

    let (_, rows) = rows_of(exec(
        &mut executor,
        "SELECT name FROM ecm.store.tags WHERE name BETWEEN '2' AND '4'",
    ));
    let names: Vec<String> = rows.iter().map(|r| r[0].to_string()).collect();
    assert_eq!(names, vec!["2", "3", "4"]);

    exec(&mut executor, "DELETE FROM ecm.store.tags WHERE name = '2'");
    let (_, rows) = rows_of(exec(
        &mut executor,
        "SELECT name FROM ecm.store.tags WHERE name BETWEEN '1' AND '5'",
    ));
    let names: Vec<String> = rows.iter().map(|r| r[0].to_string()).collect();
    assert_eq!(names, vec!["1", "3", "4", "5"]);

    // the equality path over the AVL index agrees
    let (_, rows) = rows_of(exec(
        &mut executor,
        "SELECT id FROM ecm.store.tags WHERE name = '2'",
    ));
    assert!(rows.is_empty());
}

#[test]
fn spatial_range_over_city_coordinates() {
    util::init();
    let dir = TempDir::new().unwrap();
    let mut executor = Executor::open(dir.path()).unwrap();
    exec(&mut executor, "CREATE DATABASE geo");
    exec(&mut executor, "CREATE SCHEMA geo.public");
    exec(
        &mut executor,
        "CREATE TABLE geo.public.cities (id INT, name VARCHAR(50), latitude DOUBLE, longitude DOUBLE)",
    );
    exec(
        &mut executor,
        "INSERT INTO geo.public.cities (id, name, latitude, longitude) VALUES \
         (1, 'Lima', -12.05, -77.04), \
         (2, 'Cusco', -13.53, -71.97), \
         (3, 'Arequipa', -16.41, -71.54), \
         (4, 'Puno', -15.84, -70.02), \
         (5, 'Trujillo', -8.11, -79.03)",
    );
    exec(
        &mut executor,
        "CREATE INDEX idx_location ON geo.public.cities USING RTREE(latitude)",
    );

    let (_, rows) = rows_of(exec(
        &mut executor,
        "SELECT name FROM geo.public.cities \
         WHERE latitude BETWEEN -16 AND -12 AND longitude BETWEEN -75 AND -70",
    ));
    let mut names: Vec<String> = rows.iter().map(|r| r[0].to_string()).collect();
    names.sort();
    assert_eq!(names, vec!["Cusco", "Puno"]);
}

#[test]
fn copy_loads_csv_and_skips_header() {
    util::init();
    let dir = TempDir::new().unwrap();
    let mut executor = store_fixture(&dir);
    exec(
        &mut executor,
        "CREATE TABLE ecm.store.staff (id INT, name VARCHAR(50), wage DOUBLE)",
    );

    let csv_path = dir.path().join("staff.csv");
    fs::write(&csv_path, "id,name,wage\n1,Ana,500.5\n2,Bob,320.25\n3,Eva,410.0\n").unwrap();

    let out = exec(
        &mut executor,
        &format!("COPY ecm.store.staff FROM '{}'", csv_path.display()),
    );
    assert_eq!(out, QueryOutput::Status("3 rows copied".into()));

    let (_, rows) = rows_of(exec(&mut executor, "SELECT * FROM ecm.store.staff WHERE id = 2"));
    assert_eq!(
        rows,
        vec![vec![Value::Int(2), Value::Varchar("Bob".into()), Value::Double(320.25)]]
    );
}

#[test]
fn unindexed_equality_falls_back_to_heap_scan() {
    util::init();
    let dir = TempDir::new().unwrap();
    let mut executor = store_fixture(&dir);
    exec(
        &mut executor,
        "CREATE TABLE ecm.store.wages (id INT, salary DOUBLE)",
    );
    exec(
        &mut executor,
        "INSERT INTO ecm.store.wages (id, salary) VALUES (1, 100.5), (2, 200.5), (3, 100.5)",
    );

    // salary carries no index, so this must scan rather than misuse the pk
    let (_, rows) = rows_of(exec(
        &mut executor,
        "SELECT id FROM ecm.store.wages WHERE salary = 100.5",
    ));
    let ids: Vec<Value> = rows.into_iter().map(|mut r| r.remove(0)).collect();
    assert_eq!(ids, vec![Value::Int(1), Value::Int(3)]);
}

#[test]
fn delete_mirrors_into_every_index() {
    util::init();
    let dir = TempDir::new().unwrap();
    let mut executor = store_fixture(&dir);
    exec(&mut executor, "CREATE TABLE ecm.store.items (id INT, name VARCHAR(30))");
    exec(
        &mut executor,
        "CREATE INDEX idx_item_name ON ecm.store.items USING HASH(name)",
    );
    exec(
        &mut executor,
        "INSERT INTO ecm.store.items (id, name) VALUES (1, 'bolt'), (2, 'nut'), (3, 'washer')",
    );

    exec(&mut executor, "DELETE FROM ecm.store.items WHERE id = 2");

    // both the primary and the hash index lost the key
    let (_, rows) = rows_of(exec(&mut executor, "SELECT * FROM ecm.store.items WHERE id = 2"));
    assert!(rows.is_empty());
    let (_, rows) = rows_of(exec(
        &mut executor,
        "SELECT * FROM ecm.store.items WHERE name = 'nut'",
    ));
    assert!(rows.is_empty());
    let (_, rows) = rows_of(exec(&mut executor, "SELECT * FROM ecm.store.items"));
    assert_eq!(rows.len(), 2);
}

#[test]
fn delete_requires_an_equality_predicate() {
    util::init();
    let dir = TempDir::new().unwrap();
    let mut executor = store_fixture(&dir);
    exec(&mut executor, "CREATE TABLE ecm.store.t (id INT)");
    let err = executor.execute("DELETE FROM ecm.store.t").unwrap_err();
    assert!(err.to_string().starts_with("DeleteRequiresWhere"));
}

#[test]
fn catalog_errors_surface_raw_messages() {
    util::init();
    let dir = TempDir::new().unwrap();
    let mut executor = store_fixture(&dir);

    let err = executor.execute("CREATE DATABASE ecm").unwrap_err();
    assert!(err.to_string().starts_with("DuplicateName"));

    let err = executor
        .execute("SELECT * FROM ecm.store.missing")
        .unwrap_err();
    assert!(err.to_string().starts_with("TableNotFound"));

    exec(&mut executor, "CREATE TABLE ecm.store.t (id INT, name VARCHAR(10))");
    let err = executor
        .execute("SELECT * FROM ecm.store.t WHERE ghost = 1")
        .unwrap_err();
    assert!(err.to_string().starts_with("UnknownPredicateColumn"));
}

#[test]
fn engine_state_survives_reopen() {
    util::init();
    let dir = TempDir::new().unwrap();
    {
        let mut executor = store_fixture(&dir);
        exec(&mut executor, "CREATE TABLE ecm.store.t (id INT, name VARCHAR(20))");
        exec(
            &mut executor,
            "INSERT INTO ecm.store.t (id, name) VALUES (1, 'Ana'), (2, 'Bob'), (3, 'Eva')",
        );
    }
    let mut executor = Executor::open(dir.path()).unwrap();
    let (_, rows) = rows_of(exec(&mut executor, "SELECT name FROM ecm.store.t WHERE id = 3"));
    assert_eq!(rows, vec![vec![Value::Varchar("Eva".into())]]);
    let (_, rows) = rows_of(exec(&mut executor, "SELECT * FROM ecm.store.t"));
    assert_eq!(rows.len(), 3);
}
