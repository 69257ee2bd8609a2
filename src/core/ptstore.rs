//! Pairtree storage backend.
//!
//! Documents live as individual JSON files under `pairtree/<shards...>/`,
//! history snapshots alongside them as `<key>^<version>.json`, and
//! attachments under `attachments/<shards...>/<semver>/<filename>` with a
//! sha256 digest recorded next to each file.
//!
//! Concurrent writers to the same key race at the filesystem level; the
//! winner is whichever write the filesystem serializes last. The integrity
//! checker detects the fallout, it does not prevent it.

use crate::core::collection::{AttachmentStore, Document, StorageEngine};
use crate::core::error::DocketError;
use crate::core::keymap::{normalize_key, validate_key, Keymap, KeymapEntry};
use crate::core::pairtree;
use crate::core::semver::Semver;
use crate::core::time;
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

pub const PAIRTREE_DIR: &str = "pairtree";
pub const ATTACHMENTS_DIR: &str = "attachments";

/// Version delimiter in history file names, e.g. `one^3.json`.
pub const V_DELIMITER: char = '^';

pub struct PTStore {
    work_path: PathBuf,
    keymap: Keymap,
    versioning: bool,
}

impl PTStore {
    /// Open the pairtree store rooted at a collection directory, reading
    /// the key registry from keymap.json.
    pub fn open(work_path: &Path, versioning: bool) -> Result<PTStore, DocketError> {
        let keymap = Keymap::load(work_path)?;
        Ok(PTStore {
            work_path: work_path.to_path_buf(),
            keymap,
            versioning,
        })
    }

    /// Create the physical layout for a fresh collection.
    pub fn init(work_path: &Path) -> Result<(), DocketError> {
        fs::create_dir_all(work_path.join(PAIRTREE_DIR))?;
        let keymap = Keymap::load(work_path)?;
        keymap.save()?;
        Ok(())
    }

    pub fn keymap(&self) -> &Keymap {
        &self.keymap
    }

    fn doc_dir(&self, pt_path: &str) -> PathBuf {
        self.work_path.join(PAIRTREE_DIR).join(pt_path)
    }

    fn doc_file(&self, pt_path: &str, key: &str) -> PathBuf {
        self.doc_dir(pt_path).join(format!("{}.json", key))
    }

    fn history_file(&self, pt_path: &str, key: &str, version: i64) -> PathBuf {
        self.doc_dir(pt_path)
            .join(format!("{}{}{}.json", key, V_DELIMITER, version))
    }

    fn attachment_dir(&self, pt_path: &str, semver: &Semver) -> PathBuf {
        self.work_path
            .join(ATTACHMENTS_DIR)
            .join(pt_path)
            .join(semver.to_string())
    }

    fn read_doc_file(&self, path: &Path, key: &str) -> Result<JsonValue, DocketError> {
        let src = match fs::read(path) {
            Ok(src) => src,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DocketError::NotFound(key.to_string()))
            }
            Err(e) => return Err(DocketError::IoError(e)),
        };
        serde_json::from_slice(&src).map_err(|e| {
            DocketError::ValidationError(format!("{} is not valid JSON: {}", path.display(), e))
        })
    }
}

impl StorageEngine for PTStore {
    fn create(&mut self, key: &str, src: &JsonValue) -> Result<Document, DocketError> {
        let key = normalize_key(key);
        validate_key(&key)?;
        if self.keymap.exists(&key) {
            return Err(DocketError::KeyConflict(key));
        }
        let pt_path = pairtree::encode(&key);
        let dir = self.doc_dir(&pt_path);
        fs::create_dir_all(&dir)?;

        let bytes = serde_json::to_vec_pretty(src)
            .map_err(|e| DocketError::ValidationError(e.to_string()))?;
        fs::write(self.doc_file(&pt_path, &key), &bytes)?;
        if self.versioning {
            fs::write(self.history_file(&pt_path, &key, 0), &bytes)?;
        }

        let now = time::now_stamp();
        let entry = KeymapEntry {
            pt_path,
            version: 0,
            created: now.clone(),
            updated: now.clone(),
        };
        let key = self.keymap.allocate(&key, entry)?;
        self.keymap.save()?;
        Ok(Document {
            key,
            src: src.clone(),
            created: now.clone(),
            updated: now,
            version: 0,
        })
    }

    fn read(&self, key: &str) -> Result<Document, DocketError> {
        let key = normalize_key(key);
        let entry = self
            .keymap
            .get(&key)
            .ok_or_else(|| DocketError::NotFound(key.clone()))?;
        let src = self.read_doc_file(&self.doc_file(&entry.pt_path, &key), &key)?;
        Ok(Document {
            key,
            src,
            created: entry.created.clone(),
            updated: entry.updated.clone(),
            version: entry.version,
        })
    }

    fn read_version(&self, key: &str, version: i64) -> Result<Document, DocketError> {
        let key = normalize_key(key);
        let entry = self
            .keymap
            .get(&key)
            .ok_or_else(|| DocketError::NotFound(key.clone()))?;
        if !self.versioning {
            if version == entry.version {
                return self.read(&key);
            }
            return Err(DocketError::NotFound(format!("{} version {}", key, version)));
        }
        let path = self.history_file(&entry.pt_path, &key, version);
        let src = self
            .read_doc_file(&path, &key)
            .map_err(|e| match e {
                DocketError::NotFound(_) => {
                    DocketError::NotFound(format!("{} version {}", key, version))
                }
                other => other,
            })?;
        Ok(Document {
            key,
            src,
            created: entry.created.clone(),
            updated: entry.updated.clone(),
            version,
        })
    }

    fn update(&mut self, key: &str, src: &JsonValue) -> Result<Document, DocketError> {
        let key = normalize_key(key);
        let versioning = self.versioning;
        let entry = self
            .keymap
            .get(&key)
            .ok_or_else(|| DocketError::NotFound(key.clone()))?;
        let pt_path = entry.pt_path.clone();
        let created = entry.created.clone();
        let new_version = entry.version + 1;

        let bytes = serde_json::to_vec_pretty(src)
            .map_err(|e| DocketError::ValidationError(e.to_string()))?;
        fs::write(self.doc_file(&pt_path, &key), &bytes)?;
        if versioning {
            fs::write(self.history_file(&pt_path, &key, new_version), &bytes)?;
        }

        let now = time::now_stamp();
        if let Some(entry) = self.keymap.get_mut(&key) {
            entry.version = new_version;
            entry.updated = now.clone();
        }
        self.keymap.save()?;
        Ok(Document {
            key,
            src: src.clone(),
            created,
            updated: now,
            version: new_version,
        })
    }

    fn delete(&mut self, key: &str) -> Result<(), DocketError> {
        let key = normalize_key(key);
        let entry = self.keymap.release(&key)?;
        let path = self.doc_file(&entry.pt_path, &key);
        match fs::remove_file(&path) {
            Ok(()) => {}
            // Entry without a file: the registry half is gone either way.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(DocketError::IoError(e)),
        }
        self.keymap.save()?;
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, DocketError> {
        Ok(self.keymap.keys())
    }

    fn has_key(&self, key: &str) -> Result<bool, DocketError> {
        Ok(self.keymap.exists(key))
    }

    fn count(&self) -> Result<u64, DocketError> {
        Ok(self.keymap.len() as u64)
    }

    fn versions(&self, key: &str) -> Result<Vec<i64>, DocketError> {
        let key = normalize_key(key);
        let entry = self
            .keymap
            .get(&key)
            .ok_or_else(|| DocketError::NotFound(key.clone()))?;
        if !self.versioning {
            return Ok(vec![entry.version]);
        }
        let mut found = Vec::new();
        let prefix = format!("{}{}", key, V_DELIMITER);
        for item in fs::read_dir(self.doc_dir(&entry.pt_path))? {
            let name = item?.file_name().to_string_lossy().to_string();
            if let Some(rest) = name.strip_prefix(&prefix) {
                if let Some(num) = rest.strip_suffix(".json") {
                    if let Ok(v) = num.parse::<i64>() {
                        found.push(v);
                    }
                }
            }
        }
        found.sort_unstable();
        Ok(found)
    }

    fn close(&mut self) -> Result<(), DocketError> {
        self.keymap.save()
    }

    fn attachments_mut(&mut self) -> Option<&mut dyn AttachmentStore> {
        Some(self)
    }
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

impl AttachmentStore for PTStore {
    fn attach(
        &mut self,
        key: &str,
        semver: &str,
        filename: &str,
        data: &[u8],
    ) -> Result<(), DocketError> {
        let key = normalize_key(key);
        let entry = self
            .keymap
            .get(&key)
            .ok_or_else(|| DocketError::NotFound(key.clone()))?;
        let version = Semver::parse(semver)?;
        validate_key(filename)
            .map_err(|_| DocketError::InvalidKey(format!("attachment name {:?}", filename)))?;
        let dir = self.attachment_dir(&entry.pt_path, &version);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(filename), data)?;
        fs::write(dir.join(format!("{}.sha256", filename)), sha256_hex(data))?;
        Ok(())
    }

    fn retrieve(&self, key: &str, semver: &str, filename: &str) -> Result<Vec<u8>, DocketError> {
        let key = normalize_key(key);
        let entry = self
            .keymap
            .get(&key)
            .ok_or_else(|| DocketError::NotFound(key.clone()))?;
        let version = Semver::parse(semver)?;
        validate_key(filename)
            .map_err(|_| DocketError::InvalidKey(format!("attachment name {:?}", filename)))?;
        let dir = self.attachment_dir(&entry.pt_path, &version);
        let data = match fs::read(dir.join(filename)) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DocketError::NotFound(format!(
                    "{} {} {}",
                    key, version, filename
                )))
            }
            Err(e) => return Err(DocketError::IoError(e)),
        };
        if let Ok(expected) = fs::read_to_string(dir.join(format!("{}.sha256", filename))) {
            if expected.trim() != sha256_hex(&data) {
                return Err(DocketError::ValidationError(format!(
                    "checksum mismatch for {} {} {}",
                    key, version, filename
                )));
            }
        }
        Ok(data)
    }

    fn prune(&mut self, key: &str, semver: &str, filename: &str) -> Result<(), DocketError> {
        let key = normalize_key(key);
        let entry = self
            .keymap
            .get(&key)
            .ok_or_else(|| DocketError::NotFound(key.clone()))?;
        let version = Semver::parse(semver)?;
        validate_key(filename)
            .map_err(|_| DocketError::InvalidKey(format!("attachment name {:?}", filename)))?;
        let dir = self.attachment_dir(&entry.pt_path, &version);
        match fs::remove_file(dir.join(filename)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DocketError::NotFound(format!(
                    "{} {} {}",
                    key, version, filename
                )))
            }
            Err(e) => return Err(DocketError::IoError(e)),
        }
        let _ = fs::remove_file(dir.join(format!("{}.sha256", filename)));
        Ok(())
    }

    fn attachments(&self, key: &str) -> Result<Vec<String>, DocketError> {
        let key = normalize_key(key);
        let entry = self
            .keymap
            .get(&key)
            .ok_or_else(|| DocketError::NotFound(key.clone()))?;
        let base = self.work_path.join(ATTACHMENTS_DIR).join(&entry.pt_path);
        let mut names = Vec::new();
        let semver_dirs = match fs::read_dir(&base) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(DocketError::IoError(e)),
        };
        for semver_dir in semver_dirs {
            let semver_dir = semver_dir?;
            if !semver_dir.file_type()?.is_dir() {
                continue;
            }
            let semver = semver_dir.file_name().to_string_lossy().to_string();
            for file in fs::read_dir(semver_dir.path())? {
                let name = file?.file_name().to_string_lossy().to_string();
                if name.ends_with(".sha256") {
                    continue;
                }
                names.push(format!("{}/{}", semver, name));
            }
        }
        names.sort();
        Ok(names)
    }
}
