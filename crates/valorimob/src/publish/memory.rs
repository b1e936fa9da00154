use super::{LoadMode, ObjectStore, SinkError, Warehouse};
use crate::table::Table;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default, Clone)]
pub struct InMemoryObjectStore {
    objects: Arc<Mutex<BTreeMap<(String, String), Vec<u8>>>>,
}

impl InMemoryObjectStore {
    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .ok()
            .and_then(|guard| guard.get(&(bucket.to_string(), key.to_string())).cloned())
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .map(|guard| {
                guard
                    .keys()
                    .map(|(bucket, key)| format!("{bucket}/{key}"))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put_object(&self, bucket: &str, key: &str, payload: Vec<u8>) -> Result<(), SinkError> {
        let mut guard = self
            .objects
            .lock()
            .map_err(|_| SinkError::Rejected("object store mutex poisoned".to_string()))?;
        guard.insert((bucket.to_string(), key.to_string()), payload);
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryWarehouse {
    tables: Arc<Mutex<BTreeMap<String, Table>>>,
    loads: Arc<Mutex<usize>>,
}

impl InMemoryWarehouse {
    pub fn table(&self, table_id: &str) -> Option<Table> {
        self.tables
            .lock()
            .ok()
            .and_then(|guard| guard.get(table_id).cloned())
    }

    pub fn load_count(&self) -> usize {
        self.loads.lock().map(|guard| *guard).unwrap_or(0)
    }
}

#[async_trait]
impl Warehouse for InMemoryWarehouse {
    async fn load(&self, table_id: &str, table: &Table, mode: LoadMode) -> Result<(), SinkError> {
        let LoadMode::Overwrite = mode;
        let mut tables = self
            .tables
            .lock()
            .map_err(|_| SinkError::Rejected("warehouse mutex poisoned".to_string()))?;
        tables.insert(table_id.to_string(), table.clone());
        drop(tables);

        let mut loads = self
            .loads
            .lock()
            .map_err(|_| SinkError::Rejected("warehouse mutex poisoned".to_string()))?;
        *loads += 1;
        Ok(())
    }
}
