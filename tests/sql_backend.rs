use docket::core::collection::Collection;
use docket::core::error::DocketError;
use serde_json::json;
use std::thread::sleep;
use std::time::Duration;
use tempfile::tempdir;

fn sql_collection(dir: &tempfile::TempDir, file: &str) -> (String, Collection) {
    let name = dir.path().join(file).to_string_lossy().to_string();
    let c = Collection::init(&name, "sqlite://collection.db").unwrap();
    (name, c)
}

#[test]
fn crud_matches_the_pairtree_contract() {
    let dir = tempdir().unwrap();
    let (_, mut c) = sql_collection(&dir, "crud.ds");

    let doc = c.create("One", &json!({"title": "x"})).unwrap();
    assert_eq!(doc.key, "one");
    assert_eq!(doc.version, 0);

    let doc = c.read("ONE").unwrap();
    assert_eq!(doc.src, json!({"title": "x"}));

    match c.create("one", &json!({})) {
        Err(DocketError::KeyConflict(k)) => assert_eq!(k, "one"),
        other => panic!("expected KeyConflict, got {:?}", other),
    }

    let doc = c.update("one", &json!({"title": "y"})).unwrap();
    assert_eq!(doc.version, 1);
    assert_eq!(c.read_version("one", 0).unwrap().src, json!({"title": "x"}));
    assert_eq!(c.versions("one").unwrap(), vec![0, 1]);

    c.delete("one").unwrap();
    assert!(matches!(c.read("one"), Err(DocketError::NotFound(_))));
    assert!(matches!(c.delete("one"), Err(DocketError::NotFound(_))));

    // Recreate resets the version and overwrites the retained snapshot.
    assert_eq!(c.create("one", &json!({"gen": 2})).unwrap().version, 0);
    assert_eq!(c.read_version("one", 0).unwrap().src, json!({"gen": 2}));
}

#[test]
fn keys_sorted_and_counted() {
    let dir = tempdir().unwrap();
    let (_, mut c) = sql_collection(&dir, "keys.ds");
    for key in ["c", "a", "b"] {
        c.create(key, &json!({"k": key})).unwrap();
    }
    assert_eq!(c.keys().unwrap(), vec!["a", "b", "c"]);
    assert_eq!(c.length().unwrap(), 3);
    assert!(c.has_key("B").unwrap());
    assert!(!c.has_key("d").unwrap());
}

#[test]
fn query_returns_rows_in_engine_order() {
    let dir = tempdir().unwrap();
    let (_, mut c) = sql_collection(&dir, "data.ds");

    for (key, n) in [("first", 1), ("second", 2), ("third", 3)] {
        c.create(key, &json!({"n": n})).unwrap();
        // created stamps must differ for the ordering to be observable
        sleep(Duration::from_millis(2));
    }

    let out = c
        .query("select src from data order by created desc", &[], false)
        .unwrap();
    let rows: Vec<serde_json::Value> = serde_json::from_str(&out).unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0]["n"], 3);
    assert_eq!(rows[1]["n"], 2);
    assert_eq!(rows[2]["n"], 1);

    let out = c
        .query("select src from data order by created desc", &[], true)
        .unwrap();
    assert_eq!(out.lines().count(), 3);
}

#[test]
fn query_with_positional_params() {
    let dir = tempdir().unwrap();
    let (_, mut c) = sql_collection(&dir, "params.ds");
    c.create("a", &json!({"n": 1})).unwrap();
    c.create("b", &json!({"n": 2})).unwrap();

    let out = c
        .query(
            "select src from params where _Key = ?1",
            &["b".to_string()],
            false,
        )
        .unwrap();
    assert_eq!(out, "[{\"n\":2}]");
}

#[test]
fn query_errors_are_query_errors() {
    let dir = tempdir().unwrap();
    let (_, mut c) = sql_collection(&dir, "bad.ds");
    c.create("a", &json!({"n": 1})).unwrap();

    assert!(matches!(
        c.query("select nope from nowhere", &[], false),
        Err(DocketError::QueryError(_))
    ));
    assert!(matches!(
        c.query("select _Key, src from bad", &[], false),
        Err(DocketError::QueryError(_))
    ));
}

#[test]
fn pairtree_collections_refuse_query() {
    let dir = tempdir().unwrap();
    let name = dir.path().join("pt.ds").to_string_lossy().to_string();
    let c = Collection::init(&name, "").unwrap();
    assert!(matches!(
        c.query("select 1", &[], false),
        Err(DocketError::Unsupported(_))
    ));
}

#[test]
fn postgres_and_mysql_dsns_are_not_wired_in() {
    let dir = tempdir().unwrap();
    let name = dir.path().join("pg.ds").to_string_lossy().to_string();
    assert!(matches!(
        Collection::init(&name, "postgres://localhost/pg"),
        Err(DocketError::Unsupported(_))
    ));
    // The refused init leaves nothing behind.
    assert!(!std::path::Path::new(&name).exists());

    let name = dir.path().join("my.ds").to_string_lossy().to_string();
    assert!(matches!(
        Collection::init(&name, "mysql://localhost/my"),
        Err(DocketError::Unsupported(_))
    ));
    assert!(!std::path::Path::new(&name).exists());
}

#[test]
fn store_reports_the_dialect_its_statements_use() {
    use docket::core::dialect::Dialect;
    use docket::core::sqlstore::SQLStore;

    let dir = tempdir().unwrap();
    let (name, mut c) = sql_collection(&dir, "dia.ds");
    c.close().unwrap();

    let store = SQLStore::open(std::path::Path::new(&name), "sqlite://collection.db", true).unwrap();
    assert_eq!(store.dialect(), Dialect::Sqlite);
    assert_eq!(store.table(), "dia");
}

#[test]
fn update_is_atomic_with_its_history_row() {
    let dir = tempdir().unwrap();
    let (_, mut c) = sql_collection(&dir, "atomic.ds");
    c.create("one", &json!({"rev": 0})).unwrap();
    for i in 1..=4 {
        c.update("one", &json!({"rev": i})).unwrap();
    }

    // Current row and history agree on every version.
    let out = c
        .query(
            "select json_object('v', version) from atomic_history where _Key = ?1 order by version",
            &["one".to_string()],
            false,
        )
        .unwrap();
    let rows: Vec<serde_json::Value> = serde_json::from_str(&out).unwrap();
    let versions: Vec<i64> = rows.iter().map(|r| r["v"].as_i64().unwrap()).collect();
    assert_eq!(versions, vec![0, 1, 2, 3, 4]);
    assert_eq!(c.read("one").unwrap().version, 4);
}
