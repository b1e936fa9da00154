use super::{validate_name, StagingError, StagingStore};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

static TEMP_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Writes `payload` next to `path` under a unique temporary name, then renames
/// it over `path`. Creates parent directories as needed.
pub(crate) fn atomic_write(path: &Path, payload: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("artifact");
    let sequence = TEMP_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let temp = path.with_file_name(format!(
        ".{file_name}.{}.{sequence}.tmp",
        std::process::id()
    ));

    if let Err(err) = std::fs::write(&temp, payload) {
        let _ = std::fs::remove_file(&temp);
        return Err(err);
    }
    if let Err(err) = std::fs::rename(&temp, path) {
        let _ = std::fs::remove_file(&temp);
        return Err(err);
    }
    Ok(())
}

/// Staging store backed by one file per artifact in a local directory.
#[derive(Debug, Clone)]
pub struct LocalStagingStore {
    root: PathBuf,
}

impl LocalStagingStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, StagingError> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }
}

impl StagingStore for LocalStagingStore {
    fn put_bytes(&self, name: &str, payload: &[u8]) -> Result<(), StagingError> {
        let path = self.path_for(name)?;
        atomic_write(&path, payload).map_err(|source| StagingError::Io {
            name: name.to_string(),
            source,
        })?;
        debug!(artifact = name, bytes = payload.len(), path = %path.display(), "staged artifact replaced");
        Ok(())
    }

    fn get_bytes(&self, name: &str) -> Result<Vec<u8>, StagingError> {
        let path = self.path_for(name)?;
        std::fs::read(&path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => StagingError::ArtifactNotFound(name.to_string()),
            _ => StagingError::Io {
                name: name.to_string(),
                source,
            },
        })
    }
}
