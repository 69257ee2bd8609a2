//! Process-wide state for front ends that keep collections open across
//! requests (the local daemon). There is no singleton: the dispatch context
//! owns a `CollectionsService` and passes it to each handler, closing
//! everything at shutdown.

use crate::core::collection::{Collection, COLLECTION_JSON};
use crate::core::error::DocketError;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Default)]
pub struct CollectionsService {
    open: BTreeMap<String, Collection>,
}

impl CollectionsService {
    pub fn new() -> CollectionsService {
        CollectionsService::default()
    }

    /// Open a collection and keep it open under its name. Reopening an
    /// already-open collection is a no-op.
    pub fn open(&mut self, name: &str) -> Result<(), DocketError> {
        if self.open.contains_key(name) {
            return Ok(());
        }
        let collection = Collection::open(name)?;
        self.open.insert(name.to_string(), collection);
        Ok(())
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut Collection, DocketError> {
        self.open
            .get_mut(name)
            .ok_or_else(|| DocketError::NotFound(format!("collection {} is not open", name)))
    }

    pub fn close(&mut self, name: &str) -> Result<(), DocketError> {
        let mut collection = self
            .open
            .remove(name)
            .ok_or_else(|| DocketError::NotFound(format!("collection {} is not open", name)))?;
        collection.close()
    }

    pub fn close_all(&mut self) -> Result<(), DocketError> {
        let names: Vec<String> = self.open.keys().cloned().collect();
        for name in names {
            self.close(&name)?;
        }
        Ok(())
    }

    /// Names of the collections currently held open.
    pub fn list(&self) -> Vec<String> {
        self.open.keys().cloned().collect()
    }
}

/// Scan a directory for collections (subdirectories holding a
/// collection.json), sorted by name.
pub fn discover(dir: &Path) -> Result<Vec<String>, DocketError> {
    let mut names = Vec::new();
    for item in fs::read_dir(dir)? {
        let item = item?;
        if item.file_type()?.is_dir() && item.path().join(COLLECTION_JSON).exists() {
            names.push(item.file_name().to_string_lossy().to_string());
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_close_lifecycle() {
        let dir = tempdir().unwrap();
        let name = dir.path().join("svc.ds").to_string_lossy().to_string();
        let mut c = Collection::init(&name, "").unwrap();
        c.close().unwrap();

        let mut svc = CollectionsService::new();
        svc.open(&name).unwrap();
        svc.open(&name).unwrap();
        assert_eq!(svc.list(), vec![name.clone()]);
        assert!(svc.get_mut(&name).is_ok());
        svc.close_all().unwrap();
        assert!(svc.list().is_empty());
        assert!(matches!(svc.close(&name), Err(DocketError::NotFound(_))));
    }

    #[test]
    fn test_discover_finds_collections() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.ds").to_string_lossy().to_string();
        let b = dir.path().join("b.ds").to_string_lossy().to_string();
        Collection::init(&a, "").unwrap().close().unwrap();
        Collection::init(&b, "").unwrap().close().unwrap();
        fs::create_dir(dir.path().join("not_a_collection")).unwrap();

        let found = discover(dir.path()).unwrap();
        assert_eq!(found, vec!["a.ds".to_string(), "b.ds".to_string()]);
    }
}
