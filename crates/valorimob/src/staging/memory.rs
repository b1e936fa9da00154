use super::{validate_name, StagingError, StagingStore};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// Process-local staging store, used by tests and dry runs.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStagingStore {
    artifacts: Arc<RwLock<BTreeMap<String, Arc<Vec<u8>>>>>,
}

impl InMemoryStagingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of every artifact published so far, sorted.
    pub fn names(&self) -> Vec<String> {
        self.artifacts
            .read()
            .map(|guard| guard.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.artifacts
            .read()
            .map(|guard| guard.contains_key(name))
            .unwrap_or(false)
    }
}

impl StagingStore for InMemoryStagingStore {
    fn put_bytes(&self, name: &str, payload: &[u8]) -> Result<(), StagingError> {
        validate_name(name)?;
        let snapshot = Arc::new(payload.to_vec());
        let mut guard = self
            .artifacts
            .write()
            .map_err(|_| StagingError::Unavailable("staging lock poisoned".to_string()))?;
        guard.insert(name.to_string(), snapshot);
        Ok(())
    }

    fn get_bytes(&self, name: &str) -> Result<Vec<u8>, StagingError> {
        validate_name(name)?;
        let guard = self
            .artifacts
            .read()
            .map_err(|_| StagingError::Unavailable("staging lock poisoned".to_string()))?;
        guard
            .get(name)
            .map(|payload| payload.as_ref().clone())
            .ok_or_else(|| StagingError::ArtifactNotFound(name.to_string()))
    }
}
