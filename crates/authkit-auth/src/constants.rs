//! Protocol constants
//!
//! Grant types, endpoint paths and assertion parameters shared by the
//! orchestrator and the network client. Endpoint paths are relative to the
//! configured auth endpoint.

/// Grant type for exchanging a signed anonymous assertion for tokens.
pub const ANONYMOUS_GRANT_TYPE: &str = "urn:authkit:params:oauth:grant-type:anonymous-request";

/// Challenge purpose requested before signing an anonymous assertion.
pub const ANONYMOUS_CHALLENGE_PURPOSE: &str = "anonymous_request";

/// JWT `typ` header of anonymous assertions.
pub const ANONYMOUS_JWT_TYPE: &str = "vnd.authkit.auth.anonymous-request";

/// Lifetime of an anonymous assertion in seconds. Bounds the replay window;
/// not configurable.
pub const ANONYMOUS_JWT_TTL_SECS: u64 = 60;

/// Base of the login hint that carries a promotion assertion.
pub const ANONYMOUS_LOGIN_HINT_BASE: &str = "https://authkit.dev/login_hint";

/// Scopes requested by the first-party authorize flow. `offline_access` is
/// what makes the server issue a refresh token.
pub const SCOPES: &str = "openid offline_access";

pub const AUTHORIZE_PATH: &str = "/oauth2/authorize";
pub const TOKEN_PATH: &str = "/oauth2/token";
pub const USERINFO_PATH: &str = "/oauth2/userinfo";
pub const REVOKE_PATH: &str = "/oauth2/revoke";
pub const CHALLENGE_PATH: &str = "/oauth2/challenge";
pub const SSO_RESULT_PATH: &str = "/_auth/sso/auth_result";

/// SSO auth-url endpoint for a third-party provider.
pub fn sso_auth_url_path(provider_id: &str) -> String {
    format!("/_auth/sso/{provider_id}/auth_url")
}

/// SSO handler endpoint that trades a native provider result for a code.
pub fn sso_auth_handler_path(provider_id: &str) -> String {
    format!("/_auth/sso/{provider_id}/auth_handler")
}
