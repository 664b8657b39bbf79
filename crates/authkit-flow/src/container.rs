//! Container: one configured app instance
//!
//! Owns the flows for a namespace. Every flow runs the same shape:
//! build request, (maybe) wait on the UI surface, exchange, persist. The
//! persisting step is always last and runs under the namespace lock, so a
//! flow that fails or is cancelled anywhere before it leaves the stored
//! session exactly as it was.

use std::sync::Arc;
use std::time::Duration;

use authkit_auth::constants::{ANONYMOUS_CHALLENGE_PURPOSE, ANONYMOUS_LOGIN_HINT_BASE};
use authkit_auth::{
    Action, AssertionAction, AuthApi, AuthResponse, AuthorizeRequest, Error, KeyManager, Keystore,
    OnUserDuplicate, PkcePair, RedirectOutcome, Result, Session, TokenRequest, TokenResponse,
    UserRecord, UxMode, generate_state,
};
use authkit_storage::ContainerStorage;
use common::Secret;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};
use url::Url;

use crate::state::{FlowEvent, FlowRun, FlowVariant};
use crate::ui::{OpenAuthorizationUrlOptions, UiSurface};

/// Namespace used when the host doesn't pick one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Access tokens this close to expiry are refreshed before use.
const ACCESS_TOKEN_REFRESH_THRESHOLD: Duration = Duration::from_secs(30);

/// Per-app settings supplied by `configure`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerConfig {
    pub client_id: String,
    /// Origin of the authorization server
    pub endpoint: Url,
    /// Storage namespace; containers sharing a store must differ here
    pub namespace: String,
    pub share_cookies_with_device_browser: bool,
}

impl ContainerConfig {
    pub fn new(client_id: impl Into<String>, endpoint: Url) -> Self {
        Self {
            client_id: client_id.into(),
            endpoint,
            namespace: DEFAULT_NAMESPACE.to_owned(),
            share_cookies_with_device_browser: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(Error::InvalidConfig("client_id must not be empty".into()));
        }
        if self.namespace.is_empty() || self.namespace.chars().any(char::is_whitespace) {
            return Err(Error::InvalidConfig(format!(
                "invalid namespace {:?}",
                self.namespace
            )));
        }
        if !matches!(self.endpoint.scheme(), "http" | "https") {
            return Err(Error::InvalidConfig(format!(
                "endpoint must be http(s), got {}",
                self.endpoint
            )));
        }
        Ok(())
    }
}

/// Collaborators a container is built from.
pub struct ContainerParts {
    pub storage: ContainerStorage,
    pub keystore: Arc<dyn Keystore>,
    pub api: Arc<dyn AuthApi>,
    pub ui: Arc<dyn UiSurface>,
}

/// Options of the first-party authorize flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizeOptions {
    pub redirect_uri: String,
    /// Generated when absent
    pub state: Option<String>,
    pub prompt: Option<String>,
    pub login_hint: Option<String>,
}

impl AuthorizeOptions {
    pub fn new(redirect_uri: impl Into<String>) -> Self {
        Self {
            redirect_uri: redirect_uri.into(),
            state: None,
            prompt: None,
            login_hint: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthorizeResult {
    pub user: UserRecord,
    /// `state` echoed by the authorization server
    pub state: Option<String>,
}

/// Options of the provider SSO flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SsoOptions {
    pub ux_mode: UxMode,
    pub on_user_duplicate: Option<OnUserDuplicate>,
}

impl Default for SsoOptions {
    fn default() -> Self {
        Self {
            ux_mode: UxMode::MobileApp,
            on_user_duplicate: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromoteOptions {
    pub redirect_uri: String,
    pub state: Option<String>,
}

impl PromoteOptions {
    pub fn new(redirect_uri: impl Into<String>) -> Self {
        Self {
            redirect_uri: redirect_uri.into(),
            state: None,
        }
    }
}

/// Which provider a provider SSO flow talks to, and for what.
struct ProviderTarget<'a> {
    provider_id: &'a str,
    callback_url: &'a str,
    action: Action,
}

/// In-memory view of the session. The refresh token is read from storage
/// when needed; storage is authoritative.
#[derive(Default)]
struct SessionState {
    user: Option<UserRecord>,
    access_token: Option<Secret<String>>,
    expires_at: Option<Instant>,
}

/// Handle for one configured app instance.
pub struct Container {
    storage: ContainerStorage,
    keys: KeyManager,
    api: Arc<dyn AuthApi>,
    ui: Arc<dyn UiSurface>,
    config: Mutex<Option<ContainerConfig>>,
    session: Mutex<SessionState>,
}

impl Container {
    pub fn new(parts: ContainerParts) -> Self {
        let keys = KeyManager::new(parts.storage.clone(), parts.keystore);
        Self {
            storage: parts.storage,
            keys,
            api: parts.api,
            ui: parts.ui,
            config: Mutex::new(None),
            session: Mutex::new(SessionState::default()),
        }
    }

    /// Validate `config` and restore the stored session of its namespace.
    ///
    /// A cached user record that no longer decodes is dropped with a
    /// warning; the refresh token still restores the session.
    pub async fn configure(&self, config: ContainerConfig) -> Result<()> {
        config.validate()?;
        let namespace = config.namespace.as_str();

        let user = if self.storage.get_refresh_token(namespace).await?.is_some() {
            match self.storage.get_user::<UserRecord>(namespace).await {
                Ok(user) => user,
                Err(e) => {
                    warn!(namespace, error = %e, "discarding unreadable cached user");
                    None
                }
            }
        } else {
            None
        };

        info!(
            namespace,
            restored = user.is_some(),
            "container configured"
        );
        *self.session.lock().await = SessionState {
            user,
            access_token: None,
            expires_at: None,
        };
        *self.config.lock().await = Some(config);
        Ok(())
    }

    /// Drop the in-memory session and configuration. Stored state is kept.
    pub async fn dispose(&self) {
        *self.session.lock().await = SessionState::default();
        *self.config.lock().await = None;
    }

    pub async fn current_user(&self) -> Option<UserRecord> {
        self.session.lock().await.user.clone()
    }

    /// Current access token, refreshed first when missing or about to expire.
    pub async fn access_token(&self) -> Result<Secret<String>> {
        {
            let session = self.session.lock().await;
            if let (Some(token), Some(expires_at)) = (&session.access_token, session.expires_at) {
                if Instant::now() + ACCESS_TOKEN_REFRESH_THRESHOLD < expires_at {
                    return Ok(token.clone());
                }
            }
        }
        self.refresh_session().await?;
        self.session
            .lock()
            .await
            .access_token
            .clone()
            .ok_or(Error::NotAuthenticated)
    }

    /// First-party OIDC login through the UI surface.
    pub async fn authorize(&self, options: AuthorizeOptions) -> Result<AuthorizeResult> {
        let config = self.config().await?;
        let mut run = FlowRun::start(FlowVariant::Authorize, &config.namespace);
        let result = self
            .oidc_flow(&mut run, &config, options, Action::Login)
            .await;
        finish(&mut run, result)
    }

    /// Sign in with a third-party provider.
    pub async fn login_oauth_provider(
        &self,
        provider_id: &str,
        callback_url: &str,
        options: SsoOptions,
    ) -> Result<UserRecord> {
        let config = self.config().await?;
        let mut run = FlowRun::start(FlowVariant::ProviderLogin, &config.namespace);
        let target = ProviderTarget {
            provider_id,
            callback_url,
            action: Action::Login,
        };
        let result = self
            .provider_flow(&mut run, &config, target, options, None)
            .await;
        finish(&mut run, result)
    }

    /// Attach a third-party provider identity to the signed-in user.
    pub async fn link_oauth_provider(
        &self,
        provider_id: &str,
        callback_url: &str,
    ) -> Result<UserRecord> {
        let config = self.config().await?;
        let access_token = self.access_token().await?;
        let mut run = FlowRun::start(FlowVariant::ProviderLink, &config.namespace);
        let target = ProviderTarget {
            provider_id,
            callback_url,
            action: Action::Link,
        };
        let result = self
            .provider_flow(
                &mut run,
                &config,
                target,
                SsoOptions::default(),
                Some(&access_token),
            )
            .await;
        finish(&mut run, result)
    }

    /// Create or resume the namespace's anonymous user.
    pub async fn authenticate_anonymously(&self) -> Result<UserRecord> {
        let config = self.config().await?;
        let mut run = FlowRun::start(FlowVariant::Anonymous, &config.namespace);
        let result = self.anonymous_flow(&mut run, &config).await;
        finish(&mut run, result)
    }

    /// Turn the anonymous user into a regular one through the interactive
    /// login. The anonymous key is deleted only once the new session is
    /// stored.
    pub async fn promote_anonymous_user(&self, options: PromoteOptions) -> Result<AuthorizeResult> {
        let config = self.config().await?;
        let mut run = FlowRun::start(FlowVariant::Promote, &config.namespace);
        let result = self.promote_flow(&mut run, &config, options).await;
        finish(&mut run, result)
    }

    /// Trade the stored refresh token for a new access token.
    pub async fn refresh_session(&self) -> Result<UserRecord> {
        let config = self.config().await?;
        let mut run = FlowRun::start(FlowVariant::Refresh, &config.namespace);
        let result = self.refresh_flow(&mut run, &config).await;
        finish(&mut run, result)
    }

    /// Revoke the refresh token and clear the namespace's session.
    ///
    /// With `force`, a failed revocation is logged and the local session is
    /// cleared anyway. The anonymous key survives logout.
    pub async fn logout(&self, force: bool) -> Result<()> {
        let config = self.config().await?;
        let namespace = config.namespace.as_str();

        if let Some(refresh_token) = self.storage.get_refresh_token(namespace).await? {
            let refresh_token = Secret::new(refresh_token);
            if let Err(e) = self.api.revoke(refresh_token.expose()).await {
                if !force {
                    return Err(e);
                }
                warn!(namespace, error = %e, "revoke failed, clearing session anyway");
            }
        }

        {
            let guard = self.storage.lock(namespace).await?;
            guard.del_refresh_token().await?;
            guard.del_user().await?;
        }
        *self.session.lock().await = SessionState::default();
        info!(namespace, "logged out");
        Ok(())
    }

    async fn config(&self) -> Result<ContainerConfig> {
        self.config.lock().await.clone().ok_or(Error::NotConfigured)
    }

    async fn oidc_flow(
        &self,
        run: &mut FlowRun,
        config: &ContainerConfig,
        options: AuthorizeOptions,
        action: Action,
    ) -> Result<AuthorizeResult> {
        let pkce = PkcePair::generate();
        let request = AuthorizeRequest {
            client_id: config.client_id.clone(),
            redirect_uri: options.redirect_uri,
            code_challenge: pkce.challenge.clone(),
            action,
            ux_mode: UxMode::MobileApp,
            prompt: options.prompt,
            login_hint: options.login_hint,
            state: Some(options.state.unwrap_or_else(generate_state)),
            on_user_duplicate: None,
            provider_id: None,
        };
        let url = request.authorize_url(&config.endpoint)?;

        let (code, state) = self.interact(run, config, &request, url).await?;

        let tokens = self
            .api
            .token_request(&TokenRequest::AuthorizationCode {
                code,
                redirect_uri: request.redirect_uri.clone(),
                code_verifier: pkce.verifier.clone(),
            })
            .await?;
        let session = self.session_from_tokens(tokens, None).await?;
        let user = self
            .persist(run, &config.namespace, session, action == Action::Promote)
            .await?;
        Ok(AuthorizeResult { user, state })
    }

    async fn provider_flow(
        &self,
        run: &mut FlowRun,
        config: &ContainerConfig,
        target: ProviderTarget<'_>,
        options: SsoOptions,
        access_token: Option<&Secret<String>>,
    ) -> Result<UserRecord> {
        let ProviderTarget {
            provider_id,
            callback_url,
            action,
        } = target;
        let pkce = PkcePair::generate();
        let request = AuthorizeRequest {
            client_id: config.client_id.clone(),
            redirect_uri: callback_url.to_owned(),
            code_challenge: pkce.challenge.clone(),
            action,
            ux_mode: options.ux_mode,
            prompt: None,
            login_hint: None,
            state: None,
            on_user_duplicate: options.on_user_duplicate,
            provider_id: Some(provider_id.to_owned()),
        };
        let url = self
            .api
            .oauth_authorization_url(&request, access_token.map(|t| t.expose().as_str()))
            .await?;

        let code = match options.ux_mode {
            UxMode::MobileApp => self.interact(run, config, &request, url).await?.0,
            UxMode::Manual => {
                let provider_url = self.api.fetch_intermediate_redirect(&url).await?;
                run.advance(FlowEvent::RequestBuilt);
                let native = self
                    .ui
                    .sign_in_with_native_provider(provider_url.as_str())
                    .await?;
                let code = self.api.oauth_handler(provider_id, &native).await?;
                run.advance(FlowEvent::RedirectReceived);
                code
            }
        };

        let auth = self.api.oauth_result(&code, &pkce.verifier).await?;
        let session = session_from_sso(auth)?;
        self.persist(run, &config.namespace, session, false).await
    }

    async fn anonymous_flow(&self, run: &mut FlowRun, config: &ContainerConfig) -> Result<UserRecord> {
        let challenge = self.api.oauth_challenge(ANONYMOUS_CHALLENGE_PURPOSE).await?;
        let record = self.keys.ensure_key(&config.namespace).await?;
        let jwt = self.keys.sign(&record, &challenge, AssertionAction::Auth).await?;
        run.advance(FlowEvent::InteractionSkipped);

        let tokens = self
            .api
            .token_request(&TokenRequest::Anonymous { jwt })
            .await?;
        let session = self.session_from_tokens(tokens, None).await?;
        self.persist(run, &config.namespace, session, false).await
    }

    async fn promote_flow(
        &self,
        run: &mut FlowRun,
        config: &ContainerConfig,
        options: PromoteOptions,
    ) -> Result<AuthorizeResult> {
        let record = self
            .keys
            .lookup_key(&config.namespace)
            .await?
            .ok_or(Error::NotAuthenticated)?;
        let challenge = self.api.oauth_challenge(ANONYMOUS_CHALLENGE_PURPOSE).await?;
        let jwt = self
            .keys
            .sign(&record, &challenge, AssertionAction::Promote)
            .await?;
        let login_hint = Url::parse_with_params(
            ANONYMOUS_LOGIN_HINT_BASE,
            &[("type", "anonymous"), ("jwt", jwt.as_str())],
        )
        .map_err(|e| Error::InvalidConfig(format!("login hint: {e}")))?;

        let options = AuthorizeOptions {
            redirect_uri: options.redirect_uri,
            state: options.state,
            prompt: Some("login".into()),
            login_hint: Some(login_hint.into()),
        };
        self.oidc_flow(run, config, options, Action::Promote).await
    }

    async fn refresh_flow(&self, run: &mut FlowRun, config: &ContainerConfig) -> Result<UserRecord> {
        let refresh_token = self
            .storage
            .get_refresh_token(&config.namespace)
            .await?
            .map(Secret::new)
            .ok_or(Error::NotAuthenticated)?;
        run.advance(FlowEvent::InteractionSkipped);

        let tokens = self
            .api
            .token_request(&TokenRequest::RefreshToken {
                refresh_token: refresh_token.clone(),
            })
            .await?;
        let session = self.session_from_tokens(tokens, Some(refresh_token)).await?;
        self.persist(run, &config.namespace, session, false).await
    }

    /// Hand the authorize URL to the UI surface and wait for the redirect.
    async fn interact(
        &self,
        run: &mut FlowRun,
        config: &ContainerConfig,
        request: &AuthorizeRequest,
        url: Url,
    ) -> Result<(String, Option<String>)> {
        run.advance(FlowEvent::RequestBuilt);
        let ui_result = self
            .ui
            .open_authorization_url(OpenAuthorizationUrlOptions {
                url: url.into(),
                redirect_uri: request.redirect_uri.clone(),
                share_cookies_with_device_browser: config.share_cookies_with_device_browser,
            })
            .await;

        match RedirectOutcome::capture(ui_result, &request.redirect_uri)? {
            RedirectOutcome::Success { code, state } => {
                if request.state.is_some() && state != request.state {
                    return Err(Error::MalformedRedirect(
                        "state does not match the authorization request".into(),
                    ));
                }
                run.advance(FlowEvent::RedirectReceived);
                Ok((code, state))
            }
            // Cancelled is the only outcome without a provider error
            outcome => Err(outcome.into_provider_error().unwrap_or(Error::Cancel)),
        }
    }

    async fn session_from_tokens(
        &self,
        tokens: TokenResponse,
        current_refresh_token: Option<Secret<String>>,
    ) -> Result<Session> {
        let user = self.api.userinfo(&tokens.access_token).await?;
        let refresh_token = match (tokens.refresh_token, current_refresh_token) {
            (Some(issued), _) => Secret::new(issued),
            (None, Some(current)) => current,
            (None, None) => {
                return Err(Error::Transport(
                    "token response carries no refresh_token".into(),
                ));
            }
        };
        Ok(Session {
            user,
            access_token: Secret::new(tokens.access_token),
            refresh_token,
            expires_in: tokens.expires_in,
        })
    }

    /// Write `session` under the namespace lock, then adopt it in memory.
    ///
    /// With `delete_anonymous_key` the namespace's anonymous key goes in the
    /// same critical section, after the session is written.
    async fn persist(
        &self,
        run: &mut FlowRun,
        namespace: &str,
        session: Session,
        delete_anonymous_key: bool,
    ) -> Result<UserRecord> {
        let expires_at = Instant::now()
            .checked_add(Duration::from_secs(session.expires_in))
            .ok_or_else(|| {
                Error::Transport(format!("expires_in out of range: {}", session.expires_in))
            })?;
        run.advance(FlowEvent::TokensIssued);

        let guard = self.storage.lock(namespace).await?;
        guard
            .replace_session(session.refresh_token.expose(), &session.user)
            .await?;

        let user = session.user.clone();
        *self.session.lock().await = SessionState {
            user: Some(session.user),
            access_token: Some(session.access_token),
            expires_at: Some(expires_at),
        };

        if delete_anonymous_key {
            self.keys.delete_key_locked(&guard).await?;
        }
        drop(guard);

        run.advance(FlowEvent::Persisted);
        Ok(user)
    }
}

fn session_from_sso(auth: AuthResponse) -> Result<Session> {
    let refresh_token = auth.refresh_token.ok_or_else(|| {
        Error::Transport("provider result carries no refresh_token".into())
    })?;
    Ok(Session {
        user: auth.user,
        access_token: Secret::new(auth.access_token),
        refresh_token: Secret::new(refresh_token),
        expires_in: auth.expires_in,
    })
}

/// Settle the run's terminal state for a failed flow.
fn finish<T>(run: &mut FlowRun, result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        run.fail(e);
    }
    result
}
