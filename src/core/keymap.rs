//! Key registry for pairtree collections.
//!
//! The registry is the single source of truth consulted before any backend
//! write: two creates against the same key report a deterministic conflict
//! instead of silently overwriting each other. It is persisted as
//! `keymap.json` in the collection root.

use crate::core::error::DocketError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const KEYMAP_NAME: &str = "keymap.json";

/// Normalize a key to lower case. Keys live on case-insensitive file
/// systems, so the normalized form is the only form ever stored.
pub fn normalize_key(key: &str) -> String {
    key.to_lowercase()
}

/// Reject keys that are empty, could escape the collection root once
/// turned into a path, or collide with the `^` version delimiter used in
/// history file names.
pub fn validate_key(key: &str) -> Result<(), DocketError> {
    if key.is_empty() {
        return Err(DocketError::InvalidKey("empty key".to_string()));
    }
    if key == "." || key == ".." {
        return Err(DocketError::InvalidKey(format!("{:?}", key)));
    }
    if key.contains('/') || key.contains('\\') || key.contains('\0') || key.contains('^') {
        return Err(DocketError::InvalidKey(format!("{:?}", key)));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeymapEntry {
    /// Pairtree path fragment for the document, relative to `pairtree/`.
    pub pt_path: String,
    /// Current document version, zero-indexed.
    pub version: i64,
    pub created: String,
    pub updated: String,
}

#[derive(Debug)]
pub struct Keymap {
    path: PathBuf,
    entries: BTreeMap<String, KeymapEntry>,
}

impl Keymap {
    /// Load the keymap from a collection root. A missing keymap.json is an
    /// empty registry, not an error.
    pub fn load(collection_root: &Path) -> Result<Keymap, DocketError> {
        let path = collection_root.join(KEYMAP_NAME);
        let entries = match fs::read(&path) {
            Ok(src) => serde_json::from_slice(&src).map_err(|e| {
                DocketError::ValidationError(format!(
                    "failed to decode {}: {}",
                    path.display(),
                    e
                ))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(DocketError::IoError(e)),
        };
        Ok(Keymap { path, entries })
    }

    /// An empty registry bound to a collection root. Used by repair when
    /// the on-disk keymap cannot be decoded and must be rebuilt from the
    /// document files.
    pub fn empty(collection_root: &Path) -> Keymap {
        Keymap {
            path: collection_root.join(KEYMAP_NAME),
            entries: BTreeMap::new(),
        }
    }

    /// Persist the keymap. Written to a temp file and renamed so a killed
    /// process never leaves a truncated registry.
    pub fn save(&self) -> Result<(), DocketError> {
        let src = serde_json::to_vec_pretty(&self.entries)
            .map_err(|e| DocketError::ValidationError(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, src)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Allocate a key. Returns the normalized key, or `KeyConflict` if it
    /// is already taken.
    pub fn allocate(&mut self, key: &str, entry: KeymapEntry) -> Result<String, DocketError> {
        let key = normalize_key(key);
        validate_key(&key)?;
        if self.entries.contains_key(&key) {
            return Err(DocketError::KeyConflict(key));
        }
        self.entries.insert(key.clone(), entry);
        Ok(key)
    }

    /// Release a key, returning its entry. `NotFound` if absent.
    pub fn release(&mut self, key: &str) -> Result<KeymapEntry, DocketError> {
        let key = normalize_key(key);
        self.entries
            .remove(&key)
            .ok_or(DocketError::NotFound(key))
    }

    pub fn exists(&self, key: &str) -> bool {
        self.entries.contains_key(&normalize_key(key))
    }

    pub fn get(&self, key: &str) -> Option<&KeymapEntry> {
        self.entries.get(&normalize_key(key))
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut KeymapEntry> {
        self.entries.get_mut(&normalize_key(key))
    }

    /// Sorted list of allocated keys.
    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replace an entry without the conflict check. Used by repair when
    /// rebuilding the registry from observed physical state.
    pub fn force_insert(&mut self, key: &str, entry: KeymapEntry) {
        self.entries.insert(normalize_key(key), entry);
    }
}
