//! Compact JWS signing (ES256)

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use p256::ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Sign `header` and `claims` into `base64url(header).base64url(claims).base64url(sig)`.
///
/// The signature is the raw 64-byte `r || s` form JOSE expects, not DER.
pub fn create_signed_jwt(
    key: &SigningKey,
    header: &Map<String, Value>,
    claims: &Map<String, Value>,
) -> Result<String> {
    let header = URL_SAFE_NO_PAD.encode(
        serde_json::to_string(header).map_err(|e| Error::Crypto(format!("jwt header: {e}")))?,
    );
    let payload = URL_SAFE_NO_PAD.encode(
        serde_json::to_string(claims).map_err(|e| Error::Crypto(format!("jwt claims: {e}")))?,
    );
    let signature: Signature = key.sign(format!("{header}.{payload}").as_bytes());
    Ok(format!(
        "{header}.{payload}.{}",
        URL_SAFE_NO_PAD.encode(signature.to_bytes())
    ))
}
