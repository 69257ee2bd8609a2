use docket::core::check::{self, CheckStatus, ProblemKind};
use docket::core::collection::Collection;
use docket::core::pairtree;
use serde_json::json;
use std::fs;
use std::path::PathBuf;
use tempfile::tempdir;

fn doc_file(name: &str, key: &str) -> PathBuf {
    PathBuf::from(name)
        .join("pairtree")
        .join(pairtree::encode(key))
        .join(format!("{}.json", key))
}

#[test]
fn fresh_collection_is_consistent() {
    let dir = tempdir().unwrap();
    let name = dir.path().join("fresh.ds").to_string_lossy().to_string();
    Collection::init(&name, "").unwrap().close().unwrap();

    let report = check::check(&name).unwrap();
    assert_eq!(report.status, CheckStatus::Consistent);
    assert!(report.problems.is_empty());
}

#[test]
fn fresh_sql_collection_is_consistent() {
    let dir = tempdir().unwrap();
    let name = dir.path().join("fresh.ds").to_string_lossy().to_string();
    let mut c = Collection::init(&name, "sqlite://collection.db").unwrap();
    c.create("one", &json!({"n": 1})).unwrap();
    c.update("one", &json!({"n": 2})).unwrap();
    c.close().unwrap();

    let report = check::check(&name).unwrap();
    assert_eq!(report.status, CheckStatus::Consistent);
}

#[test]
fn populated_collection_is_consistent_after_activity() {
    let dir = tempdir().unwrap();
    let name = dir.path().join("busy.ds").to_string_lossy().to_string();
    let mut c = Collection::init(&name, "").unwrap();
    c.create("one", &json!({"n": 1})).unwrap();
    c.create("two", &json!({"n": 2})).unwrap();
    c.update("one", &json!({"n": 3})).unwrap();
    c.delete("two").unwrap();
    c.close().unwrap();

    let report = check::check(&name).unwrap();
    assert_eq!(report.status, CheckStatus::Consistent, "{:?}", report.problems);
}

#[test]
fn retained_history_after_recreate_is_not_a_problem() {
    let dir = tempdir().unwrap();
    let name = dir.path().join("keep.ds").to_string_lossy().to_string();
    let mut c = Collection::init(&name, "").unwrap();
    c.create("one", &json!({"gen": 1})).unwrap();
    c.update("one", &json!({"gen": 1, "rev": 1})).unwrap();
    c.delete("one").unwrap();
    c.create("one", &json!({"gen": 2})).unwrap();
    c.close().unwrap();

    // The old generation's snapshot one^1.json outlives the registry
    // version, but the registry is not stale.
    let report = check::check(&name).unwrap();
    assert_eq!(report.status, CheckStatus::Consistent, "{:?}", report.problems);

    let repair = check::repair(&name).unwrap();
    assert_eq!(repair.status, CheckStatus::Consistent);
    assert_eq!(Collection::open(&name).unwrap().read("one").unwrap().version, 0);
}

#[test]
fn removed_document_file_is_detected_and_repaired_away() {
    let dir = tempdir().unwrap();
    let name = dir.path().join("orphan.ds").to_string_lossy().to_string();
    let mut c = Collection::init(&name, "").unwrap();
    c.create("one", &json!({"title": "x"})).unwrap();
    c.create("two", &json!({"title": "y"})).unwrap();
    c.close().unwrap();

    fs::remove_file(doc_file(&name, "one")).unwrap();

    let report = check::check(&name).unwrap();
    assert_eq!(report.status, CheckStatus::Inconsistent);
    let p = report
        .problems
        .iter()
        .find(|p| p.key == "one")
        .expect("problem for key one");
    assert_eq!(p.kind, ProblemKind::MissingDocument);

    let repair = check::repair(&name).unwrap();
    assert_eq!(repair.status, CheckStatus::Consistent);
    assert!(repair.repaired.iter().any(|a| a.key == "one"));
    assert!(repair.unrepairable.is_empty());

    // The orphaned registry entry is gone, the untouched key survives.
    let c = Collection::open(&name).unwrap();
    assert!(!c.has_key("one").unwrap());
    assert_eq!(c.read("two").unwrap().src, json!({"title": "y"}));
    assert_eq!(check::check(&name).unwrap().status, CheckStatus::Consistent);
}

#[test]
fn untracked_document_is_rebuilt_into_the_registry() {
    let dir = tempdir().unwrap();
    let name = dir.path().join("lost.ds").to_string_lossy().to_string();
    let mut c = Collection::init(&name, "").unwrap();
    c.create("one", &json!({"n": 1})).unwrap();
    c.update("one", &json!({"n": 2})).unwrap();
    c.close().unwrap();

    // Losing the keymap leaves the documents untracked.
    fs::remove_file(PathBuf::from(&name).join("keymap.json")).unwrap();

    let report = check::check(&name).unwrap();
    assert_eq!(report.status, CheckStatus::Inconsistent);
    assert!(report
        .problems
        .iter()
        .any(|p| p.kind == ProblemKind::UntrackedDocument && p.key == "one"));

    let repair = check::repair(&name).unwrap();
    assert_eq!(repair.status, CheckStatus::Consistent);

    let c = Collection::open(&name).unwrap();
    let doc = c.read("one").unwrap();
    assert_eq!(doc.src, json!({"n": 2}));
    // Version recovered from the history snapshots on disk.
    assert_eq!(doc.version, 1);
}

#[test]
fn unreadable_document_is_unrepairable_but_does_not_abort() {
    let dir = tempdir().unwrap();
    let name = dir.path().join("corrupt.ds").to_string_lossy().to_string();
    let mut c = Collection::init(&name, "").unwrap();
    c.create("good", &json!({"ok": true})).unwrap();
    c.close().unwrap();

    // Drop a corrupt stray document into the tree, untracked.
    let stray = PathBuf::from(&name)
        .join("pairtree")
        .join(pairtree::encode("bad"));
    fs::create_dir_all(&stray).unwrap();
    fs::write(stray.join("bad.json"), b"{not json").unwrap();
    fs::remove_file(PathBuf::from(&name).join("keymap.json")).unwrap();

    let repair = check::repair(&name).unwrap();
    assert_eq!(repair.status, CheckStatus::Unrepairable);
    assert!(repair.unrepairable.iter().any(|a| a.key == "bad"));
    assert!(repair.repaired.iter().any(|a| a.key == "good"));

    // The corrupt file was left untouched, never deleted.
    assert!(stray.join("bad.json").exists());
    let c = Collection::open(&name).unwrap();
    assert_eq!(c.read("good").unwrap().src, json!({"ok": true}));
}

#[test]
fn corrupt_keymap_is_reported_and_rebuilt() {
    let dir = tempdir().unwrap();
    let name = dir.path().join("mangled.ds").to_string_lossy().to_string();
    let mut c = Collection::init(&name, "").unwrap();
    c.create("one", &json!({"n": 1})).unwrap();
    c.update("one", &json!({"n": 2})).unwrap();
    c.close().unwrap();

    // A present-but-undecodable registry must be a finding, not an Err.
    fs::write(PathBuf::from(&name).join("keymap.json"), "[1, 2]").unwrap();

    let report = check::check(&name).unwrap();
    assert_eq!(report.status, CheckStatus::Inconsistent);
    assert!(report
        .problems
        .iter()
        .any(|p| p.kind == ProblemKind::MissingMetadata && p.key == "keymap.json"));
    assert!(report
        .problems
        .iter()
        .any(|p| p.kind == ProblemKind::UntrackedDocument && p.key == "one"));

    let repair = check::repair(&name).unwrap();
    assert_eq!(repair.status, CheckStatus::Consistent);

    let c = Collection::open(&name).unwrap();
    let doc = c.read("one").unwrap();
    assert_eq!(doc.src, json!({"n": 2}));
    assert_eq!(doc.version, 1);
    assert_eq!(check::check(&name).unwrap().status, CheckStatus::Consistent);
}

#[test]
fn corrupt_collection_json_is_reported_and_regenerated() {
    let dir = tempdir().unwrap();
    let name = dir.path().join("garbled.ds").to_string_lossy().to_string();
    let mut c = Collection::init(&name, "").unwrap();
    c.create("one", &json!({"n": 1})).unwrap();
    c.close().unwrap();

    fs::write(PathBuf::from(&name).join("collection.json"), "{not json").unwrap();

    let report = check::check(&name).unwrap();
    assert_eq!(report.status, CheckStatus::Inconsistent);
    assert_eq!(report.problems[0].kind, ProblemKind::MissingMetadata);
    assert_eq!(report.problems[0].key, "collection.json");

    let repair = check::repair(&name).unwrap();
    assert_eq!(repair.status, CheckStatus::Consistent);
    assert!(repair.repaired.iter().any(|a| a.key == "collection.json"));

    let c = Collection::open(&name).unwrap();
    assert_eq!(c.read("one").unwrap().src, json!({"n": 1}));
}

#[test]
fn missing_sql_table_is_reported_as_missing_table() {
    let dir = tempdir().unwrap();
    let name = dir.path().join("dropped.ds").to_string_lossy().to_string();
    let mut c = Collection::init(&name, "sqlite://collection.db").unwrap();
    c.create("one", &json!({"n": 1})).unwrap();
    c.close().unwrap();

    fs::remove_file(PathBuf::from(&name).join("collection.db")).unwrap();

    let report = check::check(&name).unwrap();
    assert_eq!(report.status, CheckStatus::Inconsistent);
    assert_eq!(report.problems[0].kind, ProblemKind::MissingTable);
    assert_eq!(report.problems[0].key, "dropped");

    // Repair recreates the schema so the collection is usable again.
    let repair = check::repair(&name).unwrap();
    assert_eq!(repair.status, CheckStatus::Consistent);
    assert_eq!(check::check(&name).unwrap().status, CheckStatus::Consistent);
    let mut c = Collection::open(&name).unwrap();
    c.create("two", &json!({"n": 2})).unwrap();
}

#[test]
fn missing_metadata_is_regenerated() {
    let dir = tempdir().unwrap();
    let name = dir.path().join("meta.ds").to_string_lossy().to_string();
    let mut c = Collection::init(&name, "").unwrap();
    c.create("one", &json!({"n": 1})).unwrap();
    c.close().unwrap();

    fs::remove_file(PathBuf::from(&name).join("collection.json")).unwrap();

    let report = check::check(&name).unwrap();
    assert_eq!(report.status, CheckStatus::Inconsistent);
    assert_eq!(report.problems[0].kind, ProblemKind::MissingMetadata);

    let repair = check::repair(&name).unwrap();
    assert_eq!(repair.status, CheckStatus::Consistent);
    assert!(repair.repaired.iter().any(|a| a.key == "collection.json"));

    let c = Collection::open(&name).unwrap();
    assert_eq!(c.read("one").unwrap().src, json!({"n": 1}));
}

#[test]
fn stale_registry_version_is_advanced_from_history() {
    let dir = tempdir().unwrap();
    let name = dir.path().join("stale.ds").to_string_lossy().to_string();
    let mut c = Collection::init(&name, "").unwrap();
    c.create("one", &json!({"rev": 0})).unwrap();
    c.update("one", &json!({"rev": 1})).unwrap();
    c.close().unwrap();

    // Roll the registry back as a crashed writer would have left it.
    let keymap_path = PathBuf::from(&name).join("keymap.json");
    let rolled = fs::read_to_string(&keymap_path)
        .unwrap()
        .replace("\"version\": 1", "\"version\": 0");
    fs::write(&keymap_path, rolled).unwrap();

    let report = check::check(&name).unwrap();
    assert_eq!(report.status, CheckStatus::Inconsistent);
    assert!(report
        .problems
        .iter()
        .any(|p| p.kind == ProblemKind::VersionMismatch));

    let repair = check::repair(&name).unwrap();
    assert_eq!(repair.status, CheckStatus::Consistent);
    assert_eq!(Collection::open(&name).unwrap().read("one").unwrap().version, 1);
}
