//! Scoped, namespaced token store
//!
//! Key layout (must stay stable across versions, or stored sessions are
//! silently orphaned):
//!
//! - refresh token:      `authkit_<namespace>_refreshToken`
//! - anonymous key id:   `authkit_<namespace>_anonymousKeyID`
//! - cached user record: `authkit_<namespace>_user`
//! - generic values:     `authkit_<logicalName>`
//!
//! Writes to one namespace are serialized by a per-namespace async mutex.
//! Different namespaces never contend, and reads never take the lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

use crate::driver::StorageDriver;
use crate::error::{Error, Result};

/// Prefix applied to every key this crate writes.
pub const SCOPE_PREFIX: &str = "authkit";

const REFRESH_TOKEN: &str = "refreshToken";
const ANONYMOUS_KEY_ID: &str = "anonymousKeyID";
const USER: &str = "user";

type LockMap = HashMap<String, Arc<tokio::sync::Mutex<()>>>;

/// Token store over an injected backing store.
///
/// Cheap to clone; clones share the driver and the namespace locks. Hand the
/// same `ContainerStorage` to every container that shares a physical store so
/// their writes exclude each other.
#[derive(Clone)]
pub struct ContainerStorage {
    driver: Arc<dyn StorageDriver>,
    locks: Arc<Mutex<LockMap>>,
}

impl ContainerStorage {
    pub fn new(driver: Arc<dyn StorageDriver>) -> Self {
        Self {
            driver,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Acquire the write lock for `namespace`.
    ///
    /// The returned guard is the only way to write several namespaced slots
    /// as one step (e.g. a session plus its anonymous key cleanup).
    pub async fn lock(&self, namespace: &str) -> Result<NamespaceGuard<'_>> {
        validate_namespace(namespace)?;
        let mutex = {
            let mut locks = self
                .locks
                .lock()
                .map_err(|_| Error::Driver("namespace lock table poisoned".into()))?;
            locks
                .entry(namespace.to_owned())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let guard = mutex.lock_owned().await;
        debug!(namespace, "acquired namespace lock");
        Ok(NamespaceGuard {
            storage: self,
            namespace: namespace.to_owned(),
            _guard: guard,
        })
    }

    // --- generic scoped helpers ---

    pub async fn safe_get(&self, key: &str) -> Result<Option<String>> {
        self.driver.get(&scope_key(key)).await
    }

    pub async fn safe_set(&self, key: &str, value: &str) -> Result<()> {
        self.driver.set(&scope_key(key), value).await
    }

    pub async fn safe_del(&self, key: &str) -> Result<()> {
        self.driver.del(&scope_key(key)).await
    }

    /// Read and decode a JSON value. `Ok(None)` when absent; a value that is
    /// present but undecodable is an error, never a default.
    pub async fn safe_get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.safe_get(key).await? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| Error::Decode(format!("{}: {e}", scope_key(key))))
    }

    pub async fn safe_set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)
            .map_err(|e| Error::Encode(format!("{}: {e}", scope_key(key))))?;
        self.safe_set(key, &raw).await
    }

    // --- namespaced reads ---

    pub async fn get_refresh_token(&self, namespace: &str) -> Result<Option<String>> {
        self.safe_get(&namespaced(namespace, REFRESH_TOKEN)?).await
    }

    pub async fn get_anonymous_key_id(&self, namespace: &str) -> Result<Option<String>> {
        self.safe_get(&namespaced(namespace, ANONYMOUS_KEY_ID)?)
            .await
    }

    pub async fn get_user<T: DeserializeOwned>(&self, namespace: &str) -> Result<Option<T>> {
        self.safe_get_json(&namespaced(namespace, USER)?).await
    }

    // --- namespaced single writes (take the lock for the duration) ---

    pub async fn set_refresh_token(&self, namespace: &str, token: &str) -> Result<()> {
        self.lock(namespace).await?.set_refresh_token(token).await
    }

    pub async fn del_refresh_token(&self, namespace: &str) -> Result<()> {
        self.lock(namespace).await?.del_refresh_token().await
    }

    pub async fn set_anonymous_key_id(&self, namespace: &str, key_id: &str) -> Result<()> {
        self.lock(namespace)
            .await?
            .set_anonymous_key_id(key_id)
            .await
    }

    pub async fn del_anonymous_key_id(&self, namespace: &str) -> Result<()> {
        self.lock(namespace).await?.del_anonymous_key_id().await
    }
}

/// Exclusive write access to one namespace. Released on drop.
pub struct NamespaceGuard<'a> {
    storage: &'a ContainerStorage,
    namespace: String,
    _guard: OwnedMutexGuard<()>,
}

impl NamespaceGuard<'_> {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn key(&self, name: &str) -> String {
        format!("{}_{name}", self.namespace)
    }

    pub async fn get_anonymous_key_id(&self) -> Result<Option<String>> {
        self.storage.safe_get(&self.key(ANONYMOUS_KEY_ID)).await
    }

    pub async fn set_refresh_token(&self, token: &str) -> Result<()> {
        self.storage.safe_set(&self.key(REFRESH_TOKEN), token).await
    }

    pub async fn del_refresh_token(&self) -> Result<()> {
        self.storage.safe_del(&self.key(REFRESH_TOKEN)).await
    }

    pub async fn set_anonymous_key_id(&self, key_id: &str) -> Result<()> {
        self.storage
            .safe_set(&self.key(ANONYMOUS_KEY_ID), key_id)
            .await
    }

    pub async fn del_anonymous_key_id(&self) -> Result<()> {
        self.storage.safe_del(&self.key(ANONYMOUS_KEY_ID)).await
    }

    pub async fn set_user<T: Serialize + ?Sized>(&self, user: &T) -> Result<()> {
        self.storage.safe_set_json(&self.key(USER), user).await
    }

    pub async fn del_user(&self) -> Result<()> {
        self.storage.safe_del(&self.key(USER)).await
    }

    /// Write the refresh token and the user record as one unit.
    ///
    /// If either write fails, both slots are put back to their prior values
    /// before the error is returned, so the token never sits next to another
    /// session's user.
    pub async fn replace_session<T: Serialize + ?Sized>(
        &self,
        token: &str,
        user: &T,
    ) -> Result<()> {
        let token_key = self.key(REFRESH_TOKEN);
        let user_key = self.key(USER);
        let user_json = serde_json::to_string(user)
            .map_err(|e| Error::Encode(format!("{}: {e}", scope_key(&user_key))))?;

        let prior_token = self.storage.safe_get(&token_key).await?;
        let prior_user = self.storage.safe_get(&user_key).await?;

        let written: Result<()> = async {
            self.storage.safe_set(&token_key, token).await?;
            self.storage.safe_set(&user_key, &user_json).await
        }
        .await;

        if let Err(e) = written {
            self.restore(&token_key, prior_token.as_deref()).await;
            self.restore(&user_key, prior_user.as_deref()).await;
            return Err(e);
        }
        Ok(())
    }

    async fn restore(&self, key: &str, prior: Option<&str>) {
        let restored = match prior {
            Some(value) => self.storage.safe_set(key, value).await,
            None => self.storage.safe_del(key).await,
        };
        if let Err(e) = restored {
            warn!(
                namespace = %self.namespace,
                key,
                error = %e,
                "failed to restore prior value"
            );
        }
    }
}

fn scope_key(key: &str) -> String {
    format!("{SCOPE_PREFIX}_{key}")
}

fn namespaced(namespace: &str, name: &str) -> Result<String> {
    validate_namespace(namespace)?;
    Ok(format!("{namespace}_{name}"))
}

fn validate_namespace(namespace: &str) -> Result<()> {
    if namespace.is_empty() {
        return Err(Error::InvalidNamespace("namespace must not be empty".into()));
    }
    Ok(())
}
