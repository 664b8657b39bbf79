//! File-backed storage driver
//!
//! Keeps the whole key space as one JSON object on disk. All writes use
//! atomic temp-file + rename to prevent corruption on crash. A tokio Mutex
//! serializes concurrent writes; reads are served from the in-memory copy.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use common::BoxFuture;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::driver::StorageDriver;
use crate::error::{Error, Result};

/// Durable driver for hosts without a platform secure store (CLIs, daemons).
///
/// The file holds refresh tokens, so it is written with 0600 permissions.
pub struct FileStorageDriver {
    path: PathBuf,
    state: Mutex<BTreeMap<String, String>>,
}

impl FileStorageDriver {
    /// Load the key space from the given file path.
    ///
    /// If the file doesn't exist, creates it as `{}` so later loads take the
    /// normal path.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading storage file: {e}")))?;
            let entries: BTreeMap<String, String> = serde_json::from_str(&contents)
                .map_err(|e| Error::Decode(format!("parsing storage file: {e}")))?;
            info!(path = %path.display(), keys = entries.len(), "loaded storage file");
            entries
        } else {
            info!(path = %path.display(), "storage file not found, starting empty");
            let entries = BTreeMap::new();
            write_atomic(&path, &entries).await?;
            entries
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageDriver for FileStorageDriver {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state.get(key).cloned())
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let previous = state.insert(key.to_owned(), value.to_owned());
            if let Err(e) = write_atomic(&self.path, &state).await {
                // Keep memory in line with what is on disk
                match previous {
                    Some(previous) => state.insert(key.to_owned(), previous),
                    None => state.remove(key),
                };
                return Err(e);
            }
            debug!(key, "stored value");
            Ok(())
        })
    }

    fn del<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let Some(previous) = state.remove(key) else {
                return Ok(());
            };
            if let Err(e) = write_atomic(&self.path, &state).await {
                state.insert(key.to_owned(), previous);
                return Err(e);
            }
            debug!(key, "deleted value");
            Ok(())
        })
    }
}

/// Write the key space to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Sets file permissions to 0600 (owner read/write only) since
/// the file contains refresh tokens.
async fn write_atomic(path: &Path, data: &BTreeMap<String, String>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::Encode(format!("serializing storage file: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("storage path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".authkit-storage.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp storage file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting storage file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp storage file: {e}")))?;

    Ok(())
}
