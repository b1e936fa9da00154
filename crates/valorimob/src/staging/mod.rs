//! Named artifact store shared by every pipeline stage.
//!
//! A stage only ever sees another stage's output through this store. Every
//! write replaces the previous snapshot under that name in one step, so a
//! reader observes either the old artifact or the new one, never a mix.

pub mod artifacts;
mod local;
mod memory;

pub use artifacts::Artifact;
pub use local::LocalStagingStore;
pub use memory::InMemoryStagingStore;

pub(crate) use local::atomic_write;

use crate::table::{Table, TableError};

#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    #[error("artifact '{0}' has not been published")]
    ArtifactNotFound(String),
    #[error("artifact name '{0}' is not a plain file name")]
    InvalidName(String),
    #[error("artifact '{name}' could not be encoded or decoded: {source}")]
    Codec { name: String, source: TableError },
    #[error("staging I/O failed for '{name}': {source}")]
    Io {
        name: String,
        source: std::io::Error,
    },
    #[error("staging store unavailable: {0}")]
    Unavailable(String),
}

/// Storage abstraction so stages can run against disk, memory, or a remote medium.
pub trait StagingStore: Send + Sync {
    /// Replaces the payload stored under `name`.
    fn put_bytes(&self, name: &str, payload: &[u8]) -> Result<(), StagingError>;

    /// Most recent payload stored under `name`.
    fn get_bytes(&self, name: &str) -> Result<Vec<u8>, StagingError>;

    fn put(&self, name: &str, table: &Table) -> Result<(), StagingError> {
        let payload = table.to_csv_bytes().map_err(|source| StagingError::Codec {
            name: name.to_string(),
            source,
        })?;
        self.put_bytes(name, &payload)
    }

    fn get(&self, name: &str) -> Result<Table, StagingError> {
        let payload = self.get_bytes(name)?;
        Table::from_csv_bytes(&payload).map_err(|source| StagingError::Codec {
            name: name.to_string(),
            source,
        })
    }
}

pub(crate) fn validate_name(name: &str) -> Result<(), StagingError> {
    let plain = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.starts_with('.');
    if plain {
        Ok(())
    } else {
        Err(StagingError::InvalidName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_name_rejects_paths() {
        assert!(validate_name("ranking_bairros.csv").is_ok());
        assert!(validate_name("../ranking.csv").is_err());
        assert!(validate_name("dir/ranking.csv").is_err());
        assert!(validate_name(".hidden").is_err());
        assert!(validate_name("").is_err());
    }
}
