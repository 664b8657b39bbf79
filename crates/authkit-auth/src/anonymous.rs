//! Anonymous key lifecycle and assertion signing
//!
//! Each namespace owns at most one locally generated P-256 key. The private
//! half lives in the `Keystore`; the token store records only its key id.
//! Assertions signed with the key stand in for user credentials when
//! bootstrapping or promoting an anonymous account.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use authkit_storage::{ContainerStorage, NamespaceGuard};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use common::Secret;
use p256::SecretKey;
use p256::ecdsa::SigningKey;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::RngExt;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};
use zeroize::Zeroize;

use crate::constants::{ANONYMOUS_JWT_TTL_SECS, ANONYMOUS_JWT_TYPE};
use crate::error::{Error, Result};
use crate::jwt::create_signed_jwt;

/// Attempts at drawing a valid P-256 scalar before giving up. A random
/// 32-byte string is out of range with probability ~2^-32.
const KEYGEN_ATTEMPTS: usize = 8;

/// Public view of a namespace's anonymous key.
#[derive(Debug, Clone, PartialEq)]
pub struct AnonymousKeyRecord {
    pub namespace: String,
    pub key_id: String,
    /// `{ kid, alg, kty, crv, x, y }`
    pub public_jwk: Map<String, Value>,
}

/// What a signed assertion asks the server to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssertionAction {
    Auth,
    Promote,
}

impl AssertionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssertionAction::Auth => "auth",
            AssertionAction::Promote => "promote",
        }
    }
}

/// Build the header and payload of an anonymous assertion. Pure.
///
/// header:  `{ typ, ...public_jwk }`
/// payload: `{ iat: now, exp: now + 60, challenge, action }`
pub fn build_assertion(
    record: &AnonymousKeyRecord,
    challenge: &str,
    action: AssertionAction,
    now: u64,
) -> (Map<String, Value>, Map<String, Value>) {
    let mut header = Map::new();
    header.insert("typ".into(), Value::from(ANONYMOUS_JWT_TYPE));
    header.extend(record.public_jwk.clone());

    let mut payload = Map::new();
    payload.insert("iat".into(), Value::from(now));
    payload.insert("exp".into(), Value::from(now + ANONYMOUS_JWT_TTL_SECS));
    payload.insert("challenge".into(), Value::from(challenge));
    payload.insert("action".into(), Value::from(action.as_str()));

    (header, payload)
}

/// Per-namespace anonymous key manager.
#[derive(Clone)]
pub struct KeyManager {
    storage: ContainerStorage,
    keystore: Arc<dyn crate::keystore::Keystore>,
}

impl KeyManager {
    pub fn new(storage: ContainerStorage, keystore: Arc<dyn crate::keystore::Keystore>) -> Self {
        Self { storage, keystore }
    }

    /// Return the namespace's key, creating it if needed.
    ///
    /// Runs under the namespace write lock, so concurrent callers observe
    /// the first caller's key instead of generating their own. A recorded key
    /// id whose keystore entry vanished is replaced with a fresh key.
    pub async fn ensure_key(&self, namespace: &str) -> Result<AnonymousKeyRecord> {
        let guard = self.storage.lock(namespace).await?;

        if let Some(key_id) = guard.get_anonymous_key_id().await? {
            match self.keystore.get(&key_id).await? {
                Some(secret) => {
                    debug!(namespace, key_id = %key_id, "reusing anonymous key");
                    return record_for(namespace, key_id, &secret);
                }
                None => {
                    warn!(
                        namespace,
                        key_id = %key_id,
                        "anonymous key missing from keystore, generating a new key"
                    );
                }
            }
        }

        let secret_key = generate_secret_key()?;
        let secret = Secret::new(secret_key.to_bytes().to_vec());
        let key_id = uuid::Uuid::new_v4().to_string();

        self.keystore.put(&key_id, &secret).await?;
        if let Err(e) = guard.set_anonymous_key_id(&key_id).await {
            // Don't leave an unreferenced private key behind
            if let Err(cleanup) = self.keystore.delete(&key_id).await {
                warn!(namespace, key_id = %key_id, error = %cleanup, "failed to remove orphaned anonymous key");
            }
            return Err(e.into());
        }

        info!(namespace, key_id = %key_id, "generated anonymous key");
        record_for(namespace, key_id, &secret)
    }

    /// Look up the namespace's key without creating one.
    ///
    /// `Ok(None)` when no key id is recorded; `KeyNotFound` when the key id is
    /// recorded but the keystore lost the key.
    pub async fn lookup_key(&self, namespace: &str) -> Result<Option<AnonymousKeyRecord>> {
        let Some(key_id) = self.storage.get_anonymous_key_id(namespace).await? else {
            return Ok(None);
        };
        let secret = self
            .keystore
            .get(&key_id)
            .await?
            .ok_or_else(|| Error::KeyNotFound(key_id.clone()))?;
        record_for(namespace, key_id, &secret).map(Some)
    }

    /// Sign a compact JWT with the private key behind `key_id`.
    pub async fn sign_assertion(
        &self,
        key_id: &str,
        header: &Map<String, Value>,
        payload: &Map<String, Value>,
    ) -> Result<String> {
        let secret = self
            .keystore
            .get(key_id)
            .await?
            .ok_or_else(|| Error::KeyNotFound(key_id.to_owned()))?;
        let signing_key = SigningKey::from_slice(secret.expose())
            .map_err(|e| Error::Crypto(format!("invalid anonymous key {key_id}: {e}")))?;
        create_signed_jwt(&signing_key, header, payload)
    }

    /// Build and sign an assertion for `record` at the current time.
    pub async fn sign(
        &self,
        record: &AnonymousKeyRecord,
        challenge: &str,
        action: AssertionAction,
    ) -> Result<String> {
        let (header, payload) = build_assertion(record, challenge, action, unix_now());
        self.sign_assertion(&record.key_id, &header, &payload).await
    }

    /// Remove the namespace's key and its recorded key id. Idempotent.
    pub async fn delete_key(&self, namespace: &str) -> Result<()> {
        let guard = self.storage.lock(namespace).await?;
        self.delete_key_locked(&guard).await
    }

    /// `delete_key` for callers already holding the namespace lock.
    ///
    /// The key id goes first: once it is gone `ensure_key` can no longer
    /// resume the key, even if the keystore delete then fails.
    pub async fn delete_key_locked(&self, guard: &NamespaceGuard<'_>) -> Result<()> {
        if let Some(key_id) = guard.get_anonymous_key_id().await? {
            guard.del_anonymous_key_id().await?;
            self.keystore.delete(&key_id).await?;
            info!(namespace = guard.namespace(), key_id = %key_id, "deleted anonymous key");
        }
        Ok(())
    }
}

fn generate_secret_key() -> Result<SecretKey> {
    let mut bytes = [0u8; 32];
    for _ in 0..KEYGEN_ATTEMPTS {
        rand::rng().fill(&mut bytes);
        if let Ok(key) = SecretKey::from_slice(&bytes) {
            bytes.zeroize();
            return Ok(key);
        }
    }
    Err(Error::Crypto("failed to generate a P-256 key".into()))
}

fn record_for(
    namespace: &str,
    key_id: String,
    secret: &Secret<Vec<u8>>,
) -> Result<AnonymousKeyRecord> {
    let secret_key = SecretKey::from_slice(secret.expose())
        .map_err(|e| Error::Crypto(format!("invalid anonymous key {key_id}: {e}")))?;
    let point = secret_key.public_key().to_encoded_point(false);
    let (Some(x), Some(y)) = (point.x(), point.y()) else {
        return Err(Error::Crypto("anonymous public key is the identity point".into()));
    };

    let public_jwk = match json!({
        "kid": key_id,
        "alg": "ES256",
        "kty": "EC",
        "crv": "P-256",
        "x": URL_SAFE_NO_PAD.encode(x),
        "y": URL_SAFE_NO_PAD.encode(y),
    }) {
        Value::Object(map) => map,
        _ => unreachable!("json! object literal"),
    };

    Ok(AnonymousKeyRecord {
        namespace: namespace.to_owned(),
        key_id,
        public_jwk,
    })
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
