//! Request, response and session types

use common::Secret;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::constants::{AUTHORIZE_PATH, SCOPES};
use crate::error::{Error, Result};

/// What an interactive flow does with the resulting identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Login,
    Link,
    Promote,
}

/// How the authorization page reaches the user.
///
/// `MobileApp` hands the authorize URL to the UI surface. `Manual` is the
/// two-step provider variant: the server returns an intermediate redirect
/// target that is handed to a native provider SDK instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UxMode {
    MobileApp,
    Manual,
}

/// Server behaviour when the provider identity already belongs to a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnUserDuplicate {
    Abort,
    Merge,
    Create,
}

/// Everything that determines an authorize URL.
///
/// `provider_id` selects a third-party provider through the server's SSO
/// endpoints; `None` means the first-party OIDC authorize endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizeRequest {
    pub client_id: String,
    pub redirect_uri: String,
    pub code_challenge: String,
    pub action: Action,
    pub ux_mode: UxMode,
    pub prompt: Option<String>,
    pub login_hint: Option<String>,
    pub state: Option<String>,
    pub on_user_duplicate: Option<OnUserDuplicate>,
    pub provider_id: Option<String>,
}

impl AuthorizeRequest {
    /// First-party OIDC authorize URL under `endpoint`.
    pub fn authorize_url(&self, endpoint: &Url) -> Result<Url> {
        let mut url = endpoint_url(endpoint, AUTHORIZE_PATH)?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.client_id)
                .append_pair("redirect_uri", &self.redirect_uri)
                .append_pair("scope", SCOPES)
                .append_pair("code_challenge", &self.code_challenge)
                .append_pair("code_challenge_method", "S256");
            if let Some(state) = &self.state {
                query.append_pair("state", state);
            }
            if let Some(prompt) = &self.prompt {
                query.append_pair("prompt", prompt);
            }
            if let Some(login_hint) = &self.login_hint {
                query.append_pair("login_hint", login_hint);
            }
        }
        Ok(url)
    }
}

/// Resolve an absolute endpoint path against the configured auth endpoint.
pub fn endpoint_url(endpoint: &Url, path: &str) -> Result<Url> {
    endpoint
        .join(path)
        .map_err(|e| Error::InvalidConfig(format!("cannot build {path} from {endpoint}: {e}")))
}

/// Body posted to the token endpoint.
#[derive(Debug, Clone)]
pub enum TokenRequest {
    AuthorizationCode {
        code: String,
        redirect_uri: String,
        code_verifier: Secret<String>,
    },
    RefreshToken {
        refresh_token: Secret<String>,
    },
    /// Signed anonymous assertion (bootstrap of an anonymous user).
    Anonymous { jwt: String },
}

impl TokenRequest {
    pub fn grant_type(&self) -> &'static str {
        match self {
            TokenRequest::AuthorizationCode { .. } => "authorization_code",
            TokenRequest::RefreshToken { .. } => "refresh_token",
            TokenRequest::Anonymous { .. } => crate::constants::ANONYMOUS_GRANT_TYPE,
        }
    }

    /// Form fields, including `grant_type` and `client_id`.
    pub fn form_fields(&self, client_id: &str) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("grant_type", self.grant_type().to_owned()),
            ("client_id", client_id.to_owned()),
        ];
        match self {
            TokenRequest::AuthorizationCode {
                code,
                redirect_uri,
                code_verifier,
            } => {
                fields.push(("code", code.clone()));
                fields.push(("redirect_uri", redirect_uri.clone()));
                fields.push(("code_verifier", code_verifier.expose().clone()));
            }
            TokenRequest::RefreshToken { refresh_token } => {
                fields.push(("refresh_token", refresh_token.expose().clone()));
            }
            TokenRequest::Anonymous { jwt } => {
                fields.push(("jwt", jwt.clone()));
            }
        }
        fields
    }
}

/// Response from the token endpoint.
///
/// `expires_in` is a delta in seconds from the response time.
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Absent on some refresh-token grants
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_in: u64,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "Bearer".into()
}

/// Authenticated user's profile as returned by userinfo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(alias = "sub")]
    pub id: String,
    #[serde(default, alias = "https://authkit.dev/claims/user/is_anonymous")]
    pub is_anonymous: bool,
    #[serde(default, alias = "https://authkit.dev/claims/user/is_verified")]
    pub is_verified: bool,
    /// Remaining profile claims, kept verbatim
    #[serde(flatten)]
    pub claims: Map<String, Value>,
}

/// Result of the provider SSO code exchange: user plus tokens in one body.
#[derive(Debug, Deserialize)]
pub struct AuthResponse {
    pub user: UserRecord,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_in: u64,
}

/// What a native provider SDK hands back in the two-step variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeProviderResult {
    pub code: String,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

/// An authenticated session. Superseded wholesale by each successful flow.
#[derive(Debug, Clone)]
pub struct Session {
    pub user: UserRecord,
    pub access_token: Secret<String>,
    pub refresh_token: Secret<String>,
    pub expires_in: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> AuthorizeRequest {
        AuthorizeRequest {
            client_id: "client-1".into(),
            redirect_uri: "com.example.app://host/after-auth".into(),
            code_challenge: "challenge-1".into(),
            action: Action::Login,
            ux_mode: UxMode::MobileApp,
            prompt: None,
            login_hint: None,
            state: Some("state-1".into()),
            on_user_duplicate: None,
            provider_id: None,
        }
    }

    #[test]
    fn authorize_url_contains_required_params() {
        let endpoint = Url::parse("https://accounts.example.com").unwrap();
        let url = request().authorize_url(&endpoint).unwrap();
        let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert!(url.as_str().starts_with("https://accounts.example.com/oauth2/authorize?"));
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["client_id"], "client-1");
        assert_eq!(params["redirect_uri"], "com.example.app://host/after-auth");
        assert_eq!(params["code_challenge"], "challenge-1");
        assert_eq!(params["code_challenge_method"], "S256");
        assert_eq!(params["scope"], SCOPES);
        assert_eq!(params["state"], "state-1");
        assert!(!params.contains_key("prompt"));
        assert!(!params.contains_key("login_hint"));
    }

    #[test]
    fn authorize_url_encodes_login_hint() {
        let endpoint = Url::parse("https://accounts.example.com").unwrap();
        let req = AuthorizeRequest {
            prompt: Some("login".into()),
            login_hint: Some("https://authkit.dev/login_hint?type=anonymous&jwt=a.b.c".into()),
            action: Action::Promote,
            ..request()
        };
        let url = req.authorize_url(&endpoint).unwrap();
        let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(params["prompt"], "login");
        assert_eq!(
            params["login_hint"],
            "https://authkit.dev/login_hint?type=anonymous&jwt=a.b.c"
        );
    }

    #[test]
    fn token_request_forms() {
        let code = TokenRequest::AuthorizationCode {
            code: "abc".into(),
            redirect_uri: "https://cb/".into(),
            code_verifier: Secret::new("verifier".into()),
        };
        let fields = code.form_fields("client-1");
        assert!(fields.contains(&("grant_type", "authorization_code".into())));
        assert!(fields.contains(&("client_id", "client-1".into())));
        assert!(fields.contains(&("code_verifier", "verifier".into())));

        let anonymous = TokenRequest::Anonymous { jwt: "a.b.c".into() };
        let fields = anonymous.form_fields("client-1");
        assert!(fields.contains(&(
            "grant_type",
            "urn:authkit:params:oauth:grant-type:anonymous-request".into()
        )));
        assert!(fields.contains(&("jwt", "a.b.c".into())));
    }

    #[test]
    fn token_request_debug_hides_secrets() {
        let refresh = TokenRequest::RefreshToken {
            refresh_token: Secret::new("rt_secret".into()),
        };
        assert!(!format!("{refresh:?}").contains("rt_secret"));
    }

    #[test]
    fn token_response_deserializes_with_defaults() {
        let json = r#"{"access_token":"at_abc","refresh_token":"rt_def","expires_in":3600}"#;
        let token: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(token.access_token, "at_abc");
        assert_eq!(token.refresh_token.as_deref(), Some("rt_def"));
        assert_eq!(token.expires_in, 3600);
        assert_eq!(token.token_type, "Bearer");

        let no_refresh: TokenResponse =
            serde_json::from_str(r#"{"access_token":"at","expires_in":1}"#).unwrap();
        assert!(no_refresh.refresh_token.is_none());
    }

    #[test]
    fn user_record_from_userinfo_claims() {
        let user: UserRecord = serde_json::from_value(json!({
            "sub": "user-1",
            "https://authkit.dev/claims/user/is_anonymous": true,
            "email": "a@example.com",
        }))
        .unwrap();
        assert_eq!(user.id, "user-1");
        assert!(user.is_anonymous);
        assert!(!user.is_verified);
        assert_eq!(user.claims["email"], "a@example.com");

        // Stored form round-trips through the "id" field
        let stored = serde_json::to_value(&user).unwrap();
        let restored: UserRecord = serde_json::from_value(stored).unwrap();
        assert_eq!(restored, user);
    }
}
