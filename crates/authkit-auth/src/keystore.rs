//! Secure keystore for anonymous private keys
//!
//! Private key material never enters the token store. It lives here, keyed
//! by key id; the token store only remembers which key id belongs to which
//! namespace. Hosts back this with their platform keychain.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use common::{BoxFuture, Secret};
use tracing::debug;

use crate::error::{Error, Result};

/// Private key storage keyed by key id.
pub trait Keystore: Send + Sync {
    fn get<'a>(&'a self, key_id: &'a str) -> BoxFuture<'a, Result<Option<Secret<Vec<u8>>>>>;

    fn put<'a>(&'a self, key_id: &'a str, key: &'a Secret<Vec<u8>>) -> BoxFuture<'a, Result<()>>;

    /// Remove a key. Removing an absent key is not an error.
    fn delete<'a>(&'a self, key_id: &'a str) -> BoxFuture<'a, Result<()>>;
}

/// Keystore that forgets everything when the process exits.
#[derive(Default)]
pub struct MemoryKeystore {
    keys: Mutex<HashMap<String, Secret<Vec<u8>>>>,
}

impl MemoryKeystore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys held.
    pub fn len(&self) -> usize {
        self.keys.lock().map(|keys| keys.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_keys<T>(&self, f: impl FnOnce(&mut HashMap<String, Secret<Vec<u8>>>) -> T) -> Result<T> {
        let mut keys = self
            .keys
            .lock()
            .map_err(|_| storage_err("memory keystore lock poisoned".into()))?;
        Ok(f(&mut keys))
    }
}

impl Keystore for MemoryKeystore {
    fn get<'a>(&'a self, key_id: &'a str) -> BoxFuture<'a, Result<Option<Secret<Vec<u8>>>>> {
        Box::pin(async move { self.with_keys(|keys| keys.get(key_id).cloned()) })
    }

    fn put<'a>(&'a self, key_id: &'a str, key: &'a Secret<Vec<u8>>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.with_keys(|keys| {
                keys.insert(key_id.to_owned(), key.clone());
            })
        })
    }

    fn delete<'a>(&'a self, key_id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.with_keys(|keys| {
                keys.remove(key_id);
            })
        })
    }
}

/// One 0600 file per key inside a directory.
pub struct FileKeystore {
    dir: PathBuf,
}

impl FileKeystore {
    /// Open (and create if needed) the keystore directory.
    pub async fn open(dir: PathBuf) -> Result<Self> {
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| storage_err(format!("creating keystore directory: {e}")))?;
        Ok(Self { dir })
    }

    fn key_path(&self, key_id: &str) -> Result<PathBuf> {
        let valid = !key_id.is_empty()
            && key_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(Error::KeyNotFound(format!("invalid key id: {key_id:?}")));
        }
        Ok(self.dir.join(format!("{key_id}.key")))
    }
}

impl Keystore for FileKeystore {
    fn get<'a>(&'a self, key_id: &'a str) -> BoxFuture<'a, Result<Option<Secret<Vec<u8>>>>> {
        Box::pin(async move {
            let path = self.key_path(key_id)?;
            let encoded = match tokio::fs::read_to_string(&path).await {
                Ok(encoded) => Secret::new(encoded),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(storage_err(format!("reading key file: {e}"))),
            };
            let bytes = URL_SAFE_NO_PAD
                .decode(encoded.expose().trim())
                .map_err(|e| Error::Crypto(format!("corrupt key file {key_id}: {e}")))?;
            Ok(Some(Secret::new(bytes)))
        })
    }

    fn put<'a>(&'a self, key_id: &'a str, key: &'a Secret<Vec<u8>>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let path = self.key_path(key_id)?;
            let encoded = Secret::new(URL_SAFE_NO_PAD.encode(key.expose()));
            write_key_atomic(&path, encoded.expose()).await?;
            debug!(key_id, "stored anonymous key");
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key_id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let path = self.key_path(key_id)?;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    debug!(key_id, "deleted anonymous key");
                    Ok(())
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(storage_err(format!("deleting key file: {e}"))),
            }
        })
    }
}

/// Temp file + rename, 0600 before the key becomes visible under its name.
async fn write_key_atomic(path: &Path, contents: &str) -> Result<()> {
    let tmp_path = path.with_extension(format!("tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, contents.as_bytes())
        .await
        .map_err(|e| storage_err(format!("writing temp key file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| storage_err(format!("setting key file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| storage_err(format!("renaming temp key file: {e}")))
}

fn storage_err(msg: String) -> Error {
    Error::Storage(authkit_storage::Error::Io(msg))
}
