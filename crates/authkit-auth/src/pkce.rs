//! PKCE (Proof Key for Code Exchange) per RFC 7636
//!
//! A fresh pair is generated for every authorization attempt. The challenge
//! goes into the authorize request; the verifier stays in memory and is sent
//! with the code exchange, then dropped. Pairs are never persisted.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use common::Secret;
use rand::RngExt;
use sha2::{Digest, Sha256};

/// Number of random bytes behind a verifier (43 base64url characters).
const VERIFIER_BYTES: usize = 32;

/// Number of random bytes behind a generated `state` value.
const STATE_BYTES: usize = 16;

/// Verifier and S256 challenge for one authorization attempt.
#[derive(Debug, Clone)]
pub struct PkcePair {
    pub verifier: Secret<String>,
    pub challenge: String,
}

impl PkcePair {
    pub fn generate() -> Self {
        let verifier = generate_verifier();
        let challenge = compute_challenge(&verifier);
        Self {
            verifier: Secret::new(verifier),
            challenge,
        }
    }
}

/// Generate a cryptographically random PKCE code verifier.
///
/// 32 random bytes, URL-safe base64 without padding.
pub fn generate_verifier() -> String {
    let mut bytes = [0u8; VERIFIER_BYTES];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Compute the S256 code challenge from a verifier.
///
/// `challenge = BASE64URL(SHA256(UTF-8(verifier)))`
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Generate an opaque `state` value for CSRF protection.
pub fn generate_state() -> String {
    let mut bytes = [0u8; STATE_BYTES];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_base64url(s: &str) -> bool {
        s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }

    #[test]
    fn verifier_is_url_safe_base64_of_32_bytes() {
        let verifier = generate_verifier();
        assert_eq!(verifier.len(), 43);
        assert!(
            is_base64url(&verifier),
            "verifier must be URL-safe base64 (no padding): {verifier}"
        );
        let decoded = URL_SAFE_NO_PAD.decode(&verifier).expect("valid base64url");
        assert_eq!(decoded.len(), VERIFIER_BYTES);
    }

    #[test]
    fn verifiers_are_unique() {
        let a = generate_verifier();
        let b = generate_verifier();
        assert_ne!(a, b, "two verifiers must not collide");
    }

    #[test]
    fn challenge_is_deterministic() {
        let verifier = "test-verifier-value";
        assert_eq!(compute_challenge(verifier), compute_challenge(verifier));
    }

    #[test]
    fn challenge_matches_known_value() {
        // SHA256("hello") = 2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824
        let challenge = compute_challenge("hello");
        assert_eq!(challenge, "LPJNul-wow4m6DsqxbninhsWHlwfp0JecwQzYpOLmCQ");
    }

    #[test]
    fn rfc7636_appendix_b_vector() {
        let challenge = compute_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk");
        assert_eq!(challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
    }

    #[test]
    fn pair_challenge_matches_verifier() {
        let pair = PkcePair::generate();
        assert_eq!(pair.challenge, compute_challenge(pair.verifier.expose()));
        assert_eq!(pair.challenge.len(), 43);
        assert!(is_base64url(&pair.challenge));
    }

    #[test]
    fn pair_debug_hides_verifier() {
        let pair = PkcePair::generate();
        let debug = format!("{pair:?}");
        assert!(!debug.contains(pair.verifier.expose().as_str()));
    }

    #[test]
    fn state_is_url_safe() {
        let state = generate_state();
        assert_eq!(state.len(), 22);
        assert!(is_base64url(&state));
    }
}
