//! Integrity checking and repair for collections.
//!
//! A check walks the physical storage (pairtree files or SQL rows) and
//! compares what it finds against the collection metadata and key registry.
//! Repair reconstructs the registry from observed physical state where it
//! can; it never deletes a document to force consistency, and a key it
//! cannot restore is reported unrepairable and left untouched while the
//! rest proceeds.

use crate::core::collection::{CollectionMeta, StorageEngine, StorageType, COLLECTION_JSON};
use crate::core::error::DocketError;
use crate::core::keymap::{Keymap, KeymapEntry, KEYMAP_NAME};
use crate::core::ptstore::{PAIRTREE_DIR, V_DELIMITER};
use crate::core::sqlstore::SQLStore;
use crate::core::time;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Unchecked,
    Scanning,
    Consistent,
    Inconsistent,
    Unrepairable,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CheckStatus::Unchecked => "unchecked",
            CheckStatus::Scanning => "scanning",
            CheckStatus::Consistent => "consistent",
            CheckStatus::Inconsistent => "inconsistent",
            CheckStatus::Unrepairable => "unrepairable",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProblemKind {
    MissingMetadata,
    MissingTable,
    MissingDocument,
    UntrackedDocument,
    VersionMismatch,
}

impl fmt::Display for ProblemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProblemKind::MissingMetadata => "missing metadata",
            ProblemKind::MissingTable => "missing table",
            ProblemKind::MissingDocument => "missing document",
            ProblemKind::UntrackedDocument => "untracked document",
            ProblemKind::VersionMismatch => "version mismatch",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone)]
pub struct Problem {
    pub key: String,
    pub kind: ProblemKind,
    pub detail: String,
}

#[derive(Debug)]
pub struct CheckReport {
    pub status: CheckStatus,
    pub problems: Vec<Problem>,
}

#[derive(Debug, Clone)]
pub struct RepairAction {
    pub key: String,
    pub action: String,
}

#[derive(Debug)]
pub struct RepairReport {
    pub status: CheckStatus,
    pub repaired: Vec<RepairAction>,
    pub unrepairable: Vec<RepairAction>,
}

/// Documents observed on physical storage: current versions per key plus
/// the set of history versions per key.
#[derive(Debug, Default)]
struct Observed {
    current: BTreeMap<String, String>,
    history: BTreeMap<String, BTreeSet<i64>>,
}

fn scan_pairtree(work_path: &Path) -> Result<Observed, DocketError> {
    let root = work_path.join(PAIRTREE_DIR);
    let mut observed = Observed::default();
    if !root.is_dir() {
        return Ok(observed);
    }
    let mut stack = vec![root.clone()];
    while let Some(dir) = stack.pop() {
        for item in fs::read_dir(&dir)? {
            let item = item?;
            let path = item.path();
            if item.file_type()?.is_dir() {
                stack.push(path);
                continue;
            }
            let name = item.file_name().to_string_lossy().to_string();
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };
            match stem.rsplit_once(V_DELIMITER) {
                Some((key, version)) => {
                    if let Ok(v) = version.parse::<i64>() {
                        observed
                            .history
                            .entry(key.to_string())
                            .or_default()
                            .insert(v);
                    }
                }
                None => {
                    let pt_path = rel_pt_path(&dir, &root);
                    observed.current.insert(stem.to_string(), pt_path);
                }
            }
        }
    }
    Ok(observed)
}

fn rel_pt_path(dir: &Path, root: &Path) -> String {
    let rel = dir.strip_prefix(root).unwrap_or(dir);
    let mut out = String::new();
    for part in rel.components() {
        out.push_str(&part.as_os_str().to_string_lossy());
        out.push('/');
    }
    out
}

fn missing_history(versions: &BTreeSet<i64>, current: i64) -> Vec<i64> {
    (0..=current).filter(|v| !versions.contains(v)).collect()
}

/// A history version above the registry version means one of two things:
/// a writer crashed after writing the snapshot but before updating the
/// registry, or the key was deleted and re-created and the old
/// generation's snapshots were retained. Only the first is a problem, and
/// only in the first does the current file match the highest snapshot.
fn registry_is_stale(
    work_path: &Path,
    pt_path: &str,
    key: &str,
    max_seen: i64,
) -> Result<bool, DocketError> {
    let dir = work_path.join(PAIRTREE_DIR).join(pt_path);
    let current = fs::read(dir.join(format!("{}.json", key)))?;
    match fs::read(dir.join(format!("{}{}{}.json", key, V_DELIMITER, max_seen))) {
        Ok(snapshot) => Ok(snapshot == current),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(DocketError::IoError(e)),
    }
}

fn check_pairtree(work_path: &Path, meta: &CollectionMeta) -> Result<Vec<Problem>, DocketError> {
    let mut problems = Vec::new();
    // An undecodable registry is a finding, not a failure: every document
    // then shows up untracked, which is what repair rebuilds from.
    let keymap = match Keymap::load(work_path) {
        Ok(keymap) => keymap,
        Err(DocketError::ValidationError(detail)) => {
            problems.push(Problem {
                key: KEYMAP_NAME.to_string(),
                kind: ProblemKind::MissingMetadata,
                detail,
            });
            Keymap::empty(work_path)
        }
        Err(e) => return Err(e),
    };
    let observed = scan_pairtree(work_path)?;

    for key in keymap.keys() {
        if !observed.current.contains_key(&key) {
            problems.push(Problem {
                key: key.clone(),
                kind: ProblemKind::MissingDocument,
                detail: "registry entry has no document file".to_string(),
            });
        }
    }
    for key in observed.current.keys() {
        if !keymap.exists(key) {
            problems.push(Problem {
                key: key.clone(),
                kind: ProblemKind::UntrackedDocument,
                detail: "document file has no registry entry".to_string(),
            });
        }
    }
    if meta.versioning {
        let empty = BTreeSet::new();
        for key in keymap.keys() {
            let Some(pt_path) = observed.current.get(&key) else {
                continue;
            };
            let entry_version = keymap.get(&key).map(|e| e.version).unwrap_or(0);
            let have = observed.history.get(&key).unwrap_or(&empty);
            let missing = missing_history(have, entry_version);
            let max_seen = have.iter().max().copied().unwrap_or(-1);
            let stale =
                max_seen > entry_version && registry_is_stale(work_path, pt_path, &key, max_seen)?;
            if !missing.is_empty() || stale {
                problems.push(Problem {
                    key: key.clone(),
                    kind: ProblemKind::VersionMismatch,
                    detail: format!(
                        "registry version {} vs history versions {:?}",
                        entry_version, have
                    ),
                });
            }
        }
    }
    Ok(problems)
}

fn scan_sql(store: &SQLStore) -> Result<Observed, DocketError> {
    let conn = store
        .connection()
        .ok_or_else(|| DocketError::Unsupported("no SQL connection".to_string()))?;
    let dialect = store.dialect();
    let mut observed = Observed::default();
    let mut stmt = conn.prepare(&dialect.scan_versions(store.table()))?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;
    for row in rows {
        let (key, version) = row?;
        observed.current.insert(key, version.to_string());
    }
    let mut stmt = conn.prepare(&dialect.scan_history_versions(store.table()))?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;
    for row in rows {
        let (key, version) = row?;
        observed.history.entry(key).or_default().insert(version);
    }
    Ok(observed)
}

fn check_sql(work_path: &Path, meta: &CollectionMeta) -> Result<Vec<Problem>, DocketError> {
    let store = SQLStore::open(work_path, &meta.dsn_uri, meta.versioning)?;
    let observed = match scan_sql(&store) {
        Ok(observed) => observed,
        Err(DocketError::RusqliteError(e)) => {
            return Ok(vec![Problem {
                key: store.table().to_string(),
                kind: ProblemKind::MissingTable,
                detail: format!("table scan failed: {}", e),
            }])
        }
        Err(e) => return Err(e),
    };
    let mut problems = Vec::new();
    if meta.versioning {
        let empty = BTreeSet::new();
        for (key, version) in &observed.current {
            let current: i64 = version.parse().unwrap_or(0);
            let have = observed.history.get(key).unwrap_or(&empty);
            let missing = missing_history(have, current);
            if !missing.is_empty() {
                problems.push(Problem {
                    key: key.clone(),
                    kind: ProblemKind::VersionMismatch,
                    detail: format!("row version {} vs history versions {:?}", current, have),
                });
            }
        }
    }
    Ok(problems)
}

/// Check a collection for consistency between its metadata, key registry
/// and physical storage.
pub fn check(name: &str) -> Result<CheckReport, DocketError> {
    let work_path = PathBuf::from(name);
    if !work_path.join(COLLECTION_JSON).exists() {
        return Ok(CheckReport {
            status: CheckStatus::Inconsistent,
            problems: vec![Problem {
                key: COLLECTION_JSON.to_string(),
                kind: ProblemKind::MissingMetadata,
                detail: format!("{} has no {}", name, COLLECTION_JSON),
            }],
        });
    }
    let meta = match CollectionMeta::load(&work_path) {
        Ok(meta) => meta,
        Err(DocketError::ValidationError(detail)) => {
            return Ok(CheckReport {
                status: CheckStatus::Inconsistent,
                problems: vec![Problem {
                    key: COLLECTION_JSON.to_string(),
                    kind: ProblemKind::MissingMetadata,
                    detail,
                }],
            })
        }
        Err(e) => return Err(e),
    };
    let problems = match meta.storage_type {
        StorageType::Pairtree => check_pairtree(&work_path, &meta)?,
        _ => check_sql(&work_path, &meta)?,
    };
    let status = if problems.is_empty() {
        CheckStatus::Consistent
    } else {
        CheckStatus::Inconsistent
    };
    Ok(CheckReport { status, problems })
}

fn regenerate_metadata(work_path: &Path, name: &str) -> Result<CollectionMeta, DocketError> {
    let (storage_type, dsn_uri) = if work_path.join(PAIRTREE_DIR).is_dir() {
        (StorageType::Pairtree, String::new())
    } else if work_path.join("collection.db").exists() {
        (StorageType::Sqlite, "sqlite://collection.db".to_string())
    } else {
        return Err(DocketError::Unrepairable(format!(
            "cannot infer storage type for {}",
            name
        )));
    };
    let short_name = work_path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| name.to_string());
    let meta = CollectionMeta {
        name: short_name,
        storage_type,
        dsn_uri,
        versioning: true,
        created: time::now_rfc1123(),
        version: "0.1.0".to_string(),
        description: String::new(),
        doi: String::new(),
        author: Vec::new(),
        contributor: Vec::new(),
        funder: Vec::new(),
        annotations: serde_json::Map::new(),
    };
    meta.save(work_path)?;
    Ok(meta)
}

fn repair_pairtree(
    work_path: &Path,
    meta: &CollectionMeta,
    report: &mut RepairReport,
) -> Result<(), DocketError> {
    let mut keymap = match Keymap::load(work_path) {
        Ok(keymap) => keymap,
        Err(DocketError::ValidationError(_)) => {
            report.repaired.push(RepairAction {
                key: KEYMAP_NAME.to_string(),
                action: "unreadable registry reset, entries rebuilt from document files"
                    .to_string(),
            });
            Keymap::empty(work_path)
        }
        Err(e) => return Err(e),
    };
    let observed = scan_pairtree(work_path)?;

    for key in keymap.keys() {
        if !observed.current.contains_key(&key) {
            keymap.release(&key)?;
            report.repaired.push(RepairAction {
                key,
                action: "removed orphaned registry entry".to_string(),
            });
        }
    }

    for (key, pt_path) in &observed.current {
        if keymap.exists(key) {
            continue;
        }
        let doc_file = work_path
            .join(PAIRTREE_DIR)
            .join(pt_path)
            .join(format!("{}.json", key));
        let readable = fs::read(&doc_file)
            .ok()
            .and_then(|src| serde_json::from_slice::<serde_json::Value>(&src).ok())
            .is_some();
        if !readable {
            report.unrepairable.push(RepairAction {
                key: key.clone(),
                action: "document file unreadable, left untouched".to_string(),
            });
            continue;
        }
        let stamp = fs::metadata(&doc_file)
            .and_then(|m| m.modified())
            .map(time::stamp_from_system_time)
            .unwrap_or_else(|_| time::now_stamp());
        let version = observed
            .history
            .get(key)
            .and_then(|h| h.iter().max().copied())
            .unwrap_or(0);
        keymap.force_insert(
            key,
            KeymapEntry {
                pt_path: pt_path.clone(),
                version,
                created: stamp.clone(),
                updated: stamp,
            },
        );
        report.repaired.push(RepairAction {
            key: key.clone(),
            action: "registry entry rebuilt from document file".to_string(),
        });
    }

    if meta.versioning {
        let empty = BTreeSet::new();
        for (key, pt_path) in &observed.current {
            let Some(entry_version) = keymap.get(key).map(|e| e.version) else {
                continue;
            };
            let have = observed.history.get(key).unwrap_or(&empty);
            let max_seen = have.iter().max().copied().unwrap_or(-1);
            let mut current = entry_version;
            if max_seen > current && registry_is_stale(work_path, pt_path, key, max_seen)? {
                if let Some(entry) = keymap.get_mut(key) {
                    entry.version = max_seen;
                }
                current = max_seen;
                report.repaired.push(RepairAction {
                    key: key.clone(),
                    action: format!("registry version advanced to {}", max_seen),
                });
            }
            let missing = missing_history(have, current);
            if missing == vec![current] {
                // Only the snapshot of the current state is absent; the
                // current file is that state, so copy it into history.
                let dir = work_path.join(PAIRTREE_DIR).join(pt_path);
                fs::copy(
                    dir.join(format!("{}.json", key)),
                    dir.join(format!("{}{}{}.json", key, V_DELIMITER, current)),
                )?;
                report.repaired.push(RepairAction {
                    key: key.clone(),
                    action: format!("history snapshot {} restored from current state", current),
                });
            } else if !missing.is_empty() {
                report.unrepairable.push(RepairAction {
                    key: key.clone(),
                    action: format!("history versions {:?} cannot be reconstructed", missing),
                });
            }
        }
    }

    keymap.save()?;
    Ok(())
}

fn repair_sql(
    work_path: &Path,
    meta: &CollectionMeta,
    report: &mut RepairReport,
) -> Result<(), DocketError> {
    SQLStore::init(work_path, &meta.dsn_uri)?;
    let store = SQLStore::open(work_path, &meta.dsn_uri, meta.versioning)?;
    let observed = scan_sql(&store)?;
    if !meta.versioning {
        return Ok(());
    }
    let conn = store
        .connection()
        .ok_or_else(|| DocketError::Unsupported("no SQL connection".to_string()))?;
    let dialect = store.dialect();
    let empty = BTreeSet::new();
    for (key, version) in &observed.current {
        let current: i64 = version.parse().unwrap_or(0);
        let have = observed.history.get(key).unwrap_or(&empty);
        let missing = missing_history(have, current);
        if missing.is_empty() {
            continue;
        }
        if missing == vec![current] {
            let row: (String, String, String) = conn.query_row(
                &dialect.select_row(store.table()),
                rusqlite::params![key],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;
            conn.execute(
                &dialect.insert_history_row(store.table()),
                rusqlite::params![key, row.0, row.1, row.2, current],
            )?;
            report.repaired.push(RepairAction {
                key: key.clone(),
                action: format!("history row {} restored from current row", current),
            });
        } else {
            report.unrepairable.push(RepairAction {
                key: key.clone(),
                action: format!("history versions {:?} cannot be reconstructed", missing),
            });
        }
    }
    Ok(())
}

/// Repair a collection found inconsistent. Per-key outcomes are reported
/// individually; one bad key does not abort the rest.
pub fn repair(name: &str) -> Result<RepairReport, DocketError> {
    let work_path = PathBuf::from(name);
    let mut report = RepairReport {
        status: CheckStatus::Scanning,
        repaired: Vec::new(),
        unrepairable: Vec::new(),
    };

    // A missing or undecodable metadata file gets regenerated from the
    // physical layout; anything else aborts the repair.
    let meta = match CollectionMeta::load(&work_path) {
        Ok(meta) => meta,
        Err(DocketError::NotFound(_)) | Err(DocketError::ValidationError(_)) => {
            match regenerate_metadata(&work_path, name) {
                Ok(meta) => {
                    report.repaired.push(RepairAction {
                        key: COLLECTION_JSON.to_string(),
                        action: "metadata file regenerated".to_string(),
                    });
                    meta
                }
                Err(e) => {
                    report.status = CheckStatus::Unrepairable;
                    report.unrepairable.push(RepairAction {
                        key: COLLECTION_JSON.to_string(),
                        action: e.to_string(),
                    });
                    return Ok(report);
                }
            }
        }
        Err(e) => return Err(e),
    };

    match meta.storage_type {
        StorageType::Pairtree => repair_pairtree(&work_path, &meta, &mut report)?,
        _ => repair_sql(&work_path, &meta, &mut report)?,
    }

    report.status = if report.unrepairable.is_empty() {
        CheckStatus::Consistent
    } else {
        CheckStatus::Unrepairable
    };
    Ok(report)
}
