//! Collection facade: the backend-agnostic API every front end calls.
//!
//! A collection is a directory holding `collection.json` plus the physical
//! storage of one backend. The facade reads the metadata once at open time,
//! picks the backend, and delegates; it never re-reads metadata per call.

use crate::core::error::DocketError;
use crate::core::ptstore::PTStore;
use crate::core::query;
use crate::core::sqlstore::SQLStore;
use crate::core::time;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fs;
use std::path::{Path, PathBuf};

pub const COLLECTION_JSON: &str = "collection.json";

/// A JSON document with its storage metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub key: String,
    pub src: JsonValue,
    pub created: String,
    pub updated: String,
    pub version: i64,
}

/// Capability interface implemented by both storage backends.
///
/// Keys handed to an engine may be mixed case; engines normalize to lower
/// case before touching storage.
pub trait StorageEngine {
    fn create(&mut self, key: &str, src: &JsonValue) -> Result<Document, DocketError>;
    fn read(&self, key: &str) -> Result<Document, DocketError>;
    fn read_version(&self, key: &str, version: i64) -> Result<Document, DocketError>;
    fn update(&mut self, key: &str, src: &JsonValue) -> Result<Document, DocketError>;
    fn delete(&mut self, key: &str) -> Result<(), DocketError>;
    fn keys(&self) -> Result<Vec<String>, DocketError>;
    fn has_key(&self, key: &str) -> Result<bool, DocketError>;
    fn count(&self) -> Result<u64, DocketError>;
    fn versions(&self, key: &str) -> Result<Vec<i64>, DocketError>;
    fn close(&mut self) -> Result<(), DocketError>;

    /// Attachment capability; only the pairtree backend has one.
    fn attachments_mut(&mut self) -> Option<&mut dyn AttachmentStore> {
        None
    }

    /// Raw SQL capability; only the SQL backend has one.
    fn connection(&self) -> Option<&Connection> {
        None
    }
}

/// Optional capability for binary attachments, namespaced by semver.
pub trait AttachmentStore {
    fn attach(
        &mut self,
        key: &str,
        semver: &str,
        filename: &str,
        data: &[u8],
    ) -> Result<(), DocketError>;
    fn retrieve(&self, key: &str, semver: &str, filename: &str) -> Result<Vec<u8>, DocketError>;
    fn prune(&mut self, key: &str, semver: &str, filename: &str) -> Result<(), DocketError>;
    fn attachments(&self, key: &str) -> Result<Vec<String>, DocketError>;
}

/// Person or organization in codemeta style, discriminated by `@type`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "@type")]
pub enum PersonOrOrg {
    Person {
        #[serde(rename = "@id", default, skip_serializing_if = "String::is_empty")]
        id: String,
        #[serde(rename = "givenName", default, skip_serializing_if = "String::is_empty")]
        given_name: String,
        #[serde(rename = "familyName", default, skip_serializing_if = "String::is_empty")]
        family_name: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        affiliation: Vec<PersonOrOrg>,
    },
    Organization {
        #[serde(rename = "@id", default, skip_serializing_if = "String::is_empty")]
        id: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        name: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Pairtree,
    Sqlite,
    Postgres,
    Mysql,
}

fn default_versioning() -> bool {
    true
}

/// The durable record of a collection's configuration (`collection.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionMeta {
    pub name: String,
    #[serde(rename = "storageType", default = "CollectionMeta::default_storage_type")]
    pub storage_type: StorageType,
    #[serde(rename = "dsnUri", default, skip_serializing_if = "String::is_empty")]
    pub dsn_uri: String,
    #[serde(default = "default_versioning")]
    pub versioning: bool,
    /// RFC1123 creation timestamp.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub created: String,
    /// Semver of the collection itself.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub doi: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub author: Vec<PersonOrOrg>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contributor: Vec<PersonOrOrg>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub funder: Vec<PersonOrOrg>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub annotations: serde_json::Map<String, JsonValue>,
}

impl CollectionMeta {
    fn default_storage_type() -> StorageType {
        StorageType::Pairtree
    }

    pub fn load(work_path: &Path) -> Result<CollectionMeta, DocketError> {
        let path = work_path.join(COLLECTION_JSON);
        let src = match fs::read(&path) {
            Ok(src) => src,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DocketError::NotFound(path.display().to_string()))
            }
            Err(e) => return Err(DocketError::IoError(e)),
        };
        serde_json::from_slice(&src).map_err(|e| {
            DocketError::ValidationError(format!("failed to decode {}: {}", path.display(), e))
        })
    }

    pub fn save(&self, work_path: &Path) -> Result<(), DocketError> {
        let src = serde_json::to_vec_pretty(self)
            .map_err(|e| DocketError::ValidationError(e.to_string()))?;
        fs::write(work_path.join(COLLECTION_JSON), src)?;
        Ok(())
    }
}

pub struct Collection {
    pub meta: CollectionMeta,
    pub work_path: PathBuf,
    engine: Box<dyn StorageEngine>,
}

impl Collection {
    /// Initialize a new collection at `name` (a directory path). An empty
    /// DSN URI selects the pairtree backend, otherwise the scheme picks the
    /// SQL engine.
    pub fn init(name: &str, dsn_uri: &str) -> Result<Collection, DocketError> {
        let work_path = PathBuf::from(name);
        if work_path.join(COLLECTION_JSON).exists() {
            return Err(DocketError::KeyConflict(format!(
                "collection {} already exists",
                name
            )));
        }
        let storage_type = if dsn_uri.is_empty() {
            StorageType::Pairtree
        } else if dsn_uri.starts_with("sqlite://") {
            StorageType::Sqlite
        } else if dsn_uri.starts_with("postgres://") {
            StorageType::Postgres
        } else if dsn_uri.starts_with("mysql://") {
            StorageType::Mysql
        } else {
            return Err(DocketError::ValidationError(format!(
                "unknown DSN URI: {:?}",
                dsn_uri
            )));
        };
        // Reject unwired engines before touching the filesystem.
        if matches!(storage_type, StorageType::Postgres | StorageType::Mysql) {
            return Err(DocketError::Unsupported(format!(
                "{:?} engine is not wired into this build",
                storage_type
            )));
        }
        fs::create_dir_all(&work_path)?;
        match storage_type {
            StorageType::Pairtree => PTStore::init(&work_path)?,
            _ => SQLStore::init(&work_path, dsn_uri)?,
        }
        let short_name = work_path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| name.to_string());
        let meta = CollectionMeta {
            name: short_name,
            storage_type,
            dsn_uri: dsn_uri.to_string(),
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
        meta.save(&work_path)?;
        Collection::open(name)
    }

    /// Open an existing collection. The metadata is read once here and the
    /// backend choice cached for the collection's in-process lifetime.
    pub fn open(name: &str) -> Result<Collection, DocketError> {
        let work_path = PathBuf::from(name);
        let meta = CollectionMeta::load(&work_path)?;
        let engine: Box<dyn StorageEngine> = match meta.storage_type {
            StorageType::Pairtree => Box::new(PTStore::open(&work_path, meta.versioning)?),
            StorageType::Sqlite | StorageType::Postgres | StorageType::Mysql => {
                Box::new(SQLStore::open(&work_path, &meta.dsn_uri, meta.versioning)?)
            }
        };
        Ok(Collection {
            meta,
            work_path,
            engine,
        })
    }

    /// Remove a collection and everything in it.
    pub fn delete_collection(name: &str) -> Result<(), DocketError> {
        let work_path = PathBuf::from(name);
        if !work_path.join(COLLECTION_JSON).exists() {
            return Err(DocketError::NotFound(name.to_string()));
        }
        fs::remove_dir_all(&work_path)?;
        Ok(())
    }

    pub fn close(&mut self) -> Result<(), DocketError> {
        self.engine.close()
    }

    pub fn create(&mut self, key: &str, src: &JsonValue) -> Result<Document, DocketError> {
        self.engine.create(key, src)
    }

    pub fn read(&self, key: &str) -> Result<Document, DocketError> {
        self.engine.read(key)
    }

    pub fn read_version(&self, key: &str, version: i64) -> Result<Document, DocketError> {
        self.engine.read_version(key, version)
    }

    pub fn update(&mut self, key: &str, src: &JsonValue) -> Result<Document, DocketError> {
        self.engine.update(key, src)
    }

    pub fn delete(&mut self, key: &str) -> Result<(), DocketError> {
        self.engine.delete(key)
    }

    pub fn keys(&self) -> Result<Vec<String>, DocketError> {
        self.engine.keys()
    }

    pub fn has_key(&self, key: &str) -> Result<bool, DocketError> {
        self.engine.has_key(key)
    }

    pub fn length(&self) -> Result<u64, DocketError> {
        self.engine.count()
    }

    pub fn versions(&self, key: &str) -> Result<Vec<i64>, DocketError> {
        self.engine.versions(key)
    }

    fn attachment_store(&mut self) -> Result<&mut dyn AttachmentStore, DocketError> {
        self.engine.attachments_mut().ok_or_else(|| {
            DocketError::Unsupported("attachments require a pairtree collection".to_string())
        })
    }

    pub fn attach(
        &mut self,
        key: &str,
        semver: &str,
        filename: &str,
        data: &[u8],
    ) -> Result<(), DocketError> {
        self.attachment_store()?.attach(key, semver, filename, data)
    }

    pub fn retrieve(
        &mut self,
        key: &str,
        semver: &str,
        filename: &str,
    ) -> Result<Vec<u8>, DocketError> {
        self.attachment_store()?.retrieve(key, semver, filename)
    }

    pub fn prune(&mut self, key: &str, semver: &str, filename: &str) -> Result<(), DocketError> {
        self.attachment_store()?.prune(key, semver, filename)
    }

    pub fn attachments(&mut self, key: &str) -> Result<Vec<String>, DocketError> {
        self.attachment_store()?.attachments(key)
    }

    /// Forward a raw SQL statement to the backend engine. Pairtree
    /// collections have no engine to forward to.
    pub fn query(
        &self,
        stmt: &str,
        params: &[String],
        jsonl: bool,
    ) -> Result<String, DocketError> {
        let conn = self.engine.connection().ok_or_else(|| {
            DocketError::Unsupported("query requires a SQL storage collection".to_string())
        })?;
        query::run_query(conn, stmt, params, jsonl)
    }
}
