use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::engine::{Engine, EngineError};
use crate::limits::*;
use crate::store::RecordStore;

/// Manages per-owner engines over one shared record store.
/// Owner = database name from the pgwire connection.
pub struct OwnerManager {
    engines: DashMap<String, Arc<Engine>>,
    store: Arc<dyn RecordStore>,
}

impl OwnerManager {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            engines: DashMap::new(),
            store,
        }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Get or lazily load the engine for the given owner.
    pub fn get_or_create(&self, owner: &str) -> Result<Arc<Engine>, EngineError> {
        let name = sanitize_owner(owner)?;
        if let Some(engine) = self.engines.get(&name) {
            return Ok(engine.value().clone());
        }
        if self.engines.len() >= MAX_OWNERS {
            return Err(EngineError::LimitExceeded("too many owners"));
        }

        let engine = match self.engines.entry(name) {
            Entry::Occupied(e) => return Ok(e.get().clone()),
            Entry::Vacant(v) => {
                let engine = Arc::new(Engine::new(v.key(), self.store.clone())?);
                v.insert(engine.clone());
                engine
            }
        };
        metrics::gauge!(crate::observability::OWNERS_ACTIVE).set(self.engines.len() as f64);
        tracing::info!(owner = engine.owner(), "owner engine loaded");
        Ok(engine)
    }

    pub fn loaded(&self) -> usize {
        self.engines.len()
    }
}

/// Owner names become directory names: keep only `[A-Za-z0-9_-]`.
pub fn sanitize_owner(owner: &str) -> Result<String, EngineError> {
    if owner.len() > MAX_OWNER_NAME_LEN {
        return Err(EngineError::InvalidOwner("name too long".into()));
    }
    let safe: String = owner
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    if safe.is_empty() {
        return Err(EngineError::InvalidOwner(owner.to_string()));
    }
    Ok(safe)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewCar;
    use crate::store::{FileStore, MemoryStore};
    use std::fs;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("rentdesk_test_owner").join(name);
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn car() -> NewCar {
        NewCar {
            id: Ulid::new(),
            name: "Premio".into(),
            plate_number: "UBA 123X".into(),
            model: "Toyota".into(),
            status: None,
        }
    }

    #[tokio::test]
    async fn owner_isolation() {
        let om = OwnerManager::new(Arc::new(MemoryStore::new()));
        let a = om.get_or_create("owner_a").unwrap();
        let b = om.get_or_create("owner_b").unwrap();

        a.add_car(car()).await.unwrap();
        assert_eq!(a.cars().await.len(), 1);
        assert!(b.cars().await.is_empty());
    }

    #[tokio::test]
    async fn same_engine_returned() {
        let om = OwnerManager::new(Arc::new(MemoryStore::new()));
        let e1 = om.get_or_create("foo").unwrap();
        let e2 = om.get_or_create("foo").unwrap();
        assert!(Arc::ptr_eq(&e1, &e2));
        assert_eq!(om.loaded(), 1);
    }

    #[tokio::test]
    async fn name_sanitized() {
        let dir = test_data_dir("sanitize");
        let om = OwnerManager::new(Arc::new(FileStore::open(&dir).unwrap()));

        let engine = om.get_or_create("../evil").unwrap();
        assert_eq!(engine.owner(), "evil");
        engine.add_car(car()).await.unwrap();
        assert!(dir.join("evil").join("cars.tbl").exists());

        // Same owner after sanitizing.
        let again = om.get_or_create("evil").unwrap();
        assert!(Arc::ptr_eq(&engine, &again));

        assert!(matches!(
            om.get_or_create("../.."),
            Err(EngineError::InvalidOwner(_))
        ));
    }

    #[tokio::test]
    async fn name_too_long() {
        let om = OwnerManager::new(Arc::new(MemoryStore::new()));
        let long_name = "x".repeat(MAX_OWNER_NAME_LEN + 1);
        let err = om.get_or_create(&long_name).err().unwrap();
        assert!(err.to_string().contains("name too long"));
        assert!(om.get_or_create(&"x".repeat(MAX_OWNER_NAME_LEN)).is_ok());
    }

    #[tokio::test]
    async fn engine_reloads_from_store() {
        let dir = test_data_dir("reload");
        let first = OwnerManager::new(Arc::new(FileStore::open(&dir).unwrap()));
        first.get_or_create("acme").unwrap().add_car(car()).await.unwrap();

        let second = OwnerManager::new(Arc::new(FileStore::open(&dir).unwrap()));
        let cars = second.get_or_create("acme").unwrap().cars().await;
        assert_eq!(cars.len(), 1);
    }
}
