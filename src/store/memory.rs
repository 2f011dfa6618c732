use std::collections::BTreeSet;

use dashmap::DashMap;

use super::{RecordStore, Row, StoreError, Table};

/// In-memory record store for fixtures and tests.
pub struct MemoryStore {
    tables: DashMap<(String, Table), Vec<Row>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: DashMap::new(),
        }
    }
}

impl RecordStore for MemoryStore {
    fn read_all(&self, owner: &str, table: Table) -> Result<Vec<Row>, StoreError> {
        Ok(self
            .tables
            .get(&(owner.to_string(), table))
            .map(|e| e.value().clone())
            .unwrap_or_default())
    }

    fn write_all(&self, owner: &str, table: Table, rows: Vec<Row>) -> Result<(), StoreError> {
        self.tables.insert((owner.to_string(), table), rows);
        Ok(())
    }

    fn owners(&self) -> Result<Vec<String>, StoreError> {
        let owners: BTreeSet<String> = self.tables.iter().map(|e| e.key().0.clone()).collect();
        Ok(owners.into_iter().collect())
    }
}
