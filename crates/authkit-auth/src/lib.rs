//! Authorization primitives for authkit
//!
//! PKCE generation, redirect parsing, anonymous key management and the
//! network client that the flow orchestrator composes. Nothing in here
//! holds session state; the orchestrator in `authkit-flow` owns that.
//!
//! Interactive flow:
//! 1. `PkcePair::generate()` creates the flow-scoped verifier/challenge
//! 2. `AuthorizeRequest::authorize_url()` builds the URL the UI surface opens
//! 3. `RedirectOutcome::capture()` turns the UI surface's result into an outcome
//! 4. `AuthApi::token_request()` exchanges the code with the PKCE verifier
//!
//! Anonymous flow:
//! 1. `KeyManager::ensure_key()` creates or reuses the namespace's P-256 key
//! 2. `AuthApi::oauth_challenge()` fetches a fresh challenge
//! 3. `KeyManager::sign()` produces the assertion the token endpoint accepts

pub mod anonymous;
pub mod api;
pub mod constants;
pub mod error;
pub mod jwt;
pub mod keystore;
pub mod pkce;
pub mod redirect;
pub mod types;

pub use anonymous::{AnonymousKeyRecord, AssertionAction, KeyManager, build_assertion};
pub use api::{AuthApi, HttpAuthApi};
pub use error::{Error, Result};
pub use keystore::{FileKeystore, Keystore, MemoryKeystore};
pub use pkce::{PkcePair, compute_challenge, generate_state, generate_verifier};
pub use redirect::RedirectOutcome;
pub use types::{
    Action, AuthResponse, AuthorizeRequest, NativeProviderResult, OnUserDuplicate, Session,
    TokenRequest, TokenResponse, UserRecord, UxMode,
};
