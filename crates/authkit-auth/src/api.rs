//! Authorization server client
//!
//! `AuthApi` is the seam between the orchestrator and the network. The
//! orchestrator never builds HTTP requests itself; tests swap in a fake.
//!
//! The OIDC endpoints (`/oauth2/*`) speak form-encoded OAuth. The provider
//! SSO endpoints (`/_auth/sso/*`) speak JSON wrapped in `{"result": ...}`.

use common::{BoxFuture, Secret};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::constants::{
    CHALLENGE_PATH, REVOKE_PATH, SSO_RESULT_PATH, TOKEN_PATH, USERINFO_PATH,
    sso_auth_handler_path, sso_auth_url_path,
};
use crate::error::{Error, Result};
use crate::types::{
    Action, AuthResponse, AuthorizeRequest, NativeProviderResult, OnUserDuplicate, TokenRequest,
    TokenResponse, UserRecord, UxMode, endpoint_url,
};

/// Calls against the authorization server.
pub trait AuthApi: Send + Sync {
    /// Request a one-time challenge for `purpose`, returning its token.
    fn oauth_challenge<'a>(&'a self, purpose: &'a str) -> BoxFuture<'a, Result<String>>;

    /// POST to the token endpoint.
    fn token_request<'a>(
        &'a self,
        request: &'a TokenRequest,
    ) -> BoxFuture<'a, Result<TokenResponse>>;

    fn userinfo<'a>(&'a self, access_token: &'a str) -> BoxFuture<'a, Result<UserRecord>>;

    /// Revoke a refresh token server-side.
    fn revoke<'a>(&'a self, refresh_token: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Ask the server for a third-party provider's authorization URL.
    /// `request.provider_id` must be set. Linking sends the current user's
    /// `access_token`.
    fn oauth_authorization_url<'a>(
        &'a self,
        request: &'a AuthorizeRequest,
        access_token: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Url>>;

    /// Resolve the authorization URL of the two-step variant into the
    /// provider URL a native SDK should open.
    fn fetch_intermediate_redirect<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<Url>>;

    /// Trade a native provider result for an authorization code.
    fn oauth_handler<'a>(
        &'a self,
        provider_id: &'a str,
        result: &'a NativeProviderResult,
    ) -> BoxFuture<'a, Result<String>>;

    /// Exchange a provider SSO authorization code for user and tokens.
    fn oauth_result<'a>(
        &'a self,
        code: &'a str,
        code_verifier: &'a Secret<String>,
    ) -> BoxFuture<'a, Result<AuthResponse>>;
}

/// `AuthApi` over `reqwest`.
#[derive(Clone)]
pub struct HttpAuthApi {
    client: reqwest::Client,
    endpoint: Url,
    client_id: String,
}

impl HttpAuthApi {
    pub fn new(client: reqwest::Client, endpoint: Url, client_id: impl Into<String>) -> Self {
        Self {
            client,
            endpoint,
            client_id: client_id.into(),
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn url(&self, path: &str) -> Result<Url> {
        endpoint_url(&self.endpoint, path)
    }

    async fn post_json<B, T>(&self, path: &str, body: &B, access_token: Option<&str>) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut request = self.client.post(self.url(path)?).json(body);
        if let Some(token) = access_token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| Error::Transport(format!("{path} request failed: {e}")))?;
        let response = check_status(response, path).await?;
        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| Error::Transport(format!("invalid {path} response: {e}")))?;
        Ok(envelope.result)
    }
}

/// `{"result": T}` wrapper of the SSO and challenge endpoints.
#[derive(Deserialize)]
struct Envelope<T> {
    result: T,
}

#[derive(Deserialize)]
struct Challenge {
    token: String,
}

/// OAuth error body (`invalid_grant` and friends).
#[derive(Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Serialize)]
struct AuthUrlBody<'a> {
    callback_url: &'a str,
    code_challenge: &'a str,
    ux_mode: UxMode,
    action: Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    on_user_duplicate: Option<OnUserDuplicate>,
}

#[derive(Serialize)]
struct AuthResultBody<'a> {
    authorization_code: &'a str,
    code_verifier: &'a str,
}

/// Non-2xx becomes `Provider` when the body is an OAuth error, else `Transport`.
async fn check_status(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("<no body>"));
    if let Ok(oauth) = serde_json::from_str::<OAuthErrorBody>(&body) {
        return Err(Error::Provider {
            code: oauth.error,
            description: oauth.error_description,
        });
    }
    Err(Error::Transport(format!("{what} returned {status}: {body}")))
}

impl AuthApi for HttpAuthApi {
    fn oauth_challenge<'a>(&'a self, purpose: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let challenge: Challenge = self
                .post_json(CHALLENGE_PATH, &serde_json::json!({ "purpose": purpose }), None)
                .await?;
            Ok(challenge.token)
        })
    }

    fn token_request<'a>(
        &'a self,
        request: &'a TokenRequest,
    ) -> BoxFuture<'a, Result<TokenResponse>> {
        Box::pin(async move {
            debug!(grant_type = request.grant_type(), "token request");
            let response = self
                .client
                .post(self.url(TOKEN_PATH)?)
                .form(&request.form_fields(&self.client_id))
                .send()
                .await
                .map_err(|e| Error::Transport(format!("token request failed: {e}")))?;
            let response = check_status(response, "token endpoint").await?;
            response
                .json::<TokenResponse>()
                .await
                .map_err(|e| Error::Transport(format!("invalid token response: {e}")))
        })
    }

    fn userinfo<'a>(&'a self, access_token: &'a str) -> BoxFuture<'a, Result<UserRecord>> {
        Box::pin(async move {
            let response = self
                .client
                .get(self.url(USERINFO_PATH)?)
                .bearer_auth(access_token)
                .send()
                .await
                .map_err(|e| Error::Transport(format!("userinfo request failed: {e}")))?;
            let response = check_status(response, "userinfo endpoint").await?;
            response
                .json::<UserRecord>()
                .await
                .map_err(|e| Error::Transport(format!("invalid userinfo response: {e}")))
        })
    }

    fn revoke<'a>(&'a self, refresh_token: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let response = self
                .client
                .post(self.url(REVOKE_PATH)?)
                .form(&[("token", refresh_token), ("client_id", self.client_id.as_str())])
                .send()
                .await
                .map_err(|e| Error::Transport(format!("revoke request failed: {e}")))?;
            check_status(response, "revoke endpoint").await?;
            Ok(())
        })
    }

    fn oauth_authorization_url<'a>(
        &'a self,
        request: &'a AuthorizeRequest,
        access_token: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Url>> {
        Box::pin(async move {
            let provider_id = request.provider_id.as_deref().ok_or_else(|| {
                Error::InvalidConfig("provider authorization requires a provider id".into())
            })?;
            let body = AuthUrlBody {
                callback_url: &request.redirect_uri,
                code_challenge: &request.code_challenge,
                ux_mode: request.ux_mode,
                action: request.action,
                on_user_duplicate: request.on_user_duplicate,
            };
            let url: String = self
                .post_json(&sso_auth_url_path(provider_id), &body, access_token)
                .await?;
            Url::parse(&url)
                .map_err(|e| Error::Transport(format!("invalid provider authorization URL: {e}")))
        })
    }

    fn fetch_intermediate_redirect<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<Url>> {
        Box::pin(async move {
            let response = self
                .client
                .get(url.clone())
                .send()
                .await
                .map_err(|e| Error::Transport(format!("intermediate redirect failed: {e}")))?;
            let response = check_status(response, "intermediate redirect").await?;
            let envelope: Envelope<String> = response.json().await.map_err(|e| {
                Error::Transport(format!("invalid intermediate redirect response: {e}"))
            })?;
            Url::parse(&envelope.result)
                .map_err(|e| Error::Transport(format!("invalid intermediate redirect URL: {e}")))
        })
    }

    fn oauth_handler<'a>(
        &'a self,
        provider_id: &'a str,
        result: &'a NativeProviderResult,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            self.post_json(&sso_auth_handler_path(provider_id), result, None)
                .await
        })
    }

    fn oauth_result<'a>(
        &'a self,
        code: &'a str,
        code_verifier: &'a Secret<String>,
    ) -> BoxFuture<'a, Result<AuthResponse>> {
        Box::pin(async move {
            let body = AuthResultBody {
                authorization_code: code,
                code_verifier: code_verifier.expose(),
            };
            self.post_json(SSO_RESULT_PATH, &body, None).await
        })
    }
}
