//! Collection manager: creates, loads, lists, and deletes collections
//! under `<data_root>/indexes/`.
//!
//! Each collection lives in its own sub-directory holding `meta.json`
//! (name, dimensions, metric) beside its index files. Directories whose
//! metadata cannot be read are skipped at startup with a warning.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::block::CollectionConfig;
use crate::error::{Result, StoreError};
use crate::storage::collection::Collection;

const META_FILE: &str = "meta.json";

/// Registry of all collections under one `indexes/` root.
pub struct CollectionManager {
    collections: RwLock<HashMap<String, Arc<Collection>>>,
    base_path: PathBuf,
}

impl CollectionManager {
    /// Open the manager, loading every collection found on disk.
    pub fn open(data_root: &Path) -> Result<Self> {
        let base_path = data_root.join("indexes");
        fs::create_dir_all(&base_path)?;

        let manager = Self {
            collections: RwLock::new(HashMap::new()),
            base_path,
        };
        manager.load_existing()?;
        Ok(manager)
    }

    fn load_existing(&self) -> Result<()> {
        let mut collections = self.collections.write();
        for entry in fs::read_dir(&self.base_path)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let dir = entry.path();
            let config = match read_meta(&dir) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(path = %dir.display(), error = %e, "skipping collection with unreadable metadata");
                    continue;
                }
            };
            match Collection::load(config.clone(), &dir) {
                Ok(collection) => {
                    tracing::info!(
                        collection = %config.name,
                        blocks = collection.count(),
                        "loaded collection"
                    );
                    collections.insert(config.name.clone(), Arc::new(collection));
                }
                Err(e) => {
                    tracing::warn!(collection = %config.name, error = %e, "skipping collection that failed to load");
                }
            }
        }
        Ok(())
    }

    /// Create a new collection; fails if the name is already taken.
    pub fn create(&self, config: CollectionConfig) -> Result<()> {
        config.validate()?;
        let mut collections = self.collections.write();
        if collections.contains_key(&config.name) {
            return Err(StoreError::AlreadyExists(format!(
                "collection {:?} already exists",
                config.name
            )));
        }

        let dir = self.base_path.join(&config.name);
        fs::create_dir_all(&dir)?;
        if let Err(e) = write_meta(&dir, &config) {
            let _ = fs::remove_dir_all(&dir);
            return Err(e);
        }

        let collection = Collection::create(config.clone(), &dir);
        collections.insert(config.name, Arc::new(collection));
        Ok(())
    }

    /// Delete a collection and its on-disk artifacts.
    pub fn delete(&self, name: &str) -> Result<()> {
        let mut collections = self.collections.write();
        collections
            .remove(name)
            .ok_or_else(|| StoreError::NotFound(format!("collection {name:?} not found")))?;
        fs::remove_dir_all(self.base_path.join(name))?;
        Ok(())
    }

    /// Handle to a collection by name.
    pub fn get(&self, name: &str) -> Result<Arc<Collection>> {
        self.collections
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("collection {name:?} not found")))
    }

    /// Configurations of all live collections.
    pub fn list(&self) -> Vec<CollectionConfig> {
        self.collections
            .read()
            .values()
            .map(|c| c.config.clone())
            .collect()
    }

    /// Persist every collection's indexes.
    pub fn save_all(&self) -> Result<()> {
        for collection in self.collections.read().values() {
            collection.save()?;
        }
        Ok(())
    }
}

fn write_meta(dir: &Path, config: &CollectionConfig) -> Result<()> {
    let json = serde_json::to_string_pretty(config)
        .map_err(|e| StoreError::Format(format!("meta serialize failed: {e}")))?;
    fs::write(dir.join(META_FILE), json)?;
    Ok(())
}

fn read_meta(dir: &Path) -> Result<CollectionConfig> {
    let bytes = fs::read(dir.join(META_FILE))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| StoreError::Format(format!("meta parse failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hnsw::DistanceMetric;
    use tempfile::TempDir;

    fn config(name: &str) -> CollectionConfig {
        CollectionConfig {
            name: name.into(),
            dimensions: 4,
            metric: DistanceMetric::Cosine,
        }
    }

    #[test]
    fn test_create_get_list_delete() {
        let dir = TempDir::new().unwrap();
        let mgr = CollectionManager::open(dir.path()).unwrap();
        mgr.create(config("docs")).unwrap();

        assert_eq!(mgr.get("docs").unwrap().config.dimensions, 4);
        assert_eq!(mgr.list().len(), 1);

        mgr.delete("docs").unwrap();
        assert!(mgr.get("docs").is_err());
        assert!(!dir.path().join("indexes/docs").exists());
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let dir = TempDir::new().unwrap();
        let mgr = CollectionManager::open(dir.path()).unwrap();
        mgr.create(config("docs")).unwrap();
        assert!(matches!(
            mgr.create(config("docs")),
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = TempDir::new().unwrap();
        let mgr = CollectionManager::open(dir.path()).unwrap();
        assert!(matches!(
            mgr.create(config("")),
            Err(StoreError::InputRange(_))
        ));
        let mut zero = config("z");
        zero.dimensions = 0;
        assert!(matches!(
            mgr.create(zero),
            Err(StoreError::InputRange(_))
        ));
    }

    #[test]
    fn test_delete_missing() {
        let dir = TempDir::new().unwrap();
        let mgr = CollectionManager::open(dir.path()).unwrap();
        assert!(matches!(
            mgr.delete("ghost"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_reload_from_disk() {
        let dir = TempDir::new().unwrap();
        {
            let mgr = CollectionManager::open(dir.path()).unwrap();
            mgr.create(config("persist")).unwrap();
            mgr.save_all().unwrap();
        }
        let mgr = CollectionManager::open(dir.path()).unwrap();
        let coll = mgr.get("persist").unwrap();
        assert_eq!(coll.config.metric, DistanceMetric::Cosine);
    }

    #[test]
    fn test_bad_meta_skipped() {
        let dir = TempDir::new().unwrap();
        {
            let mgr = CollectionManager::open(dir.path()).unwrap();
            mgr.create(config("good")).unwrap();
            mgr.save_all().unwrap();
        }
        let broken = dir.path().join("indexes/broken");
        fs::create_dir_all(&broken).unwrap();
        fs::write(broken.join("meta.json"), b"not json").unwrap();

        let mgr = CollectionManager::open(dir.path()).unwrap();
        assert_eq!(mgr.list().len(), 1);
        assert!(mgr.get("good").is_ok());
    }
}
