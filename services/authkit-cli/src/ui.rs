//! Terminal UI surfaces
//!
//! The authorization page is opened by the user in their own browser; these
//! surfaces print the URL and wait for the redirect to come back.

use std::sync::Arc;
use std::time::Duration;

use authkit_auth::{Error, Result};
use authkit_flow::{OpenAuthorizationUrlOptions, UiSurface};
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::IntoResponse;
use common::BoxFuture;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, info, warn};
use url::Url;

/// Catches the browser redirect on a local listener bound to the redirect
/// URI's host and port.
pub struct LoopbackBrowserUi {
    timeout: Duration,
}

#[derive(Clone)]
struct CallbackState {
    redirect: Arc<Url>,
    captured: mpsc::Sender<Url>,
}

impl LoopbackBrowserUi {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn wait_for_redirect(&self, options: OpenAuthorizationUrlOptions) -> Result<String> {
        let redirect = Url::parse(&options.redirect_uri)
            .map_err(|e| Error::InvalidConfig(format!("redirect_uri: {e}")))?;
        let host = redirect
            .host_str()
            .ok_or_else(|| Error::InvalidConfig("redirect_uri has no host".into()))?;
        let port = redirect
            .port_or_known_default()
            .ok_or_else(|| Error::InvalidConfig("redirect_uri has no port".into()))?;

        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|e| Error::Transport(format!("binding redirect listener on {host}:{port}: {e}")))?;
        debug!(host, port, "redirect listener ready");

        let (captured_tx, mut captured_rx) = mpsc::channel(1);
        let state = CallbackState {
            redirect: Arc::new(redirect.clone()),
            captured: captured_tx,
        };
        let app = Router::new().fallback(callback_handler).with_state(state);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        eprintln!("Open this URL in your browser to continue:\n\n  {}\n", options.url);

        let outcome = tokio::select! {
            captured = captured_rx.recv() => captured
                .map(|url| url.to_string())
                .ok_or(Error::Cancel),
            _ = tokio::time::sleep(self.timeout) => {
                warn!(timeout_secs = self.timeout.as_secs(), "no redirect received before timeout");
                Err(Error::Cancel)
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted while waiting for redirect");
                Err(Error::Cancel)
            }
        };

        let _ = shutdown_tx.send(());
        if let Err(e) = server.await {
            warn!(error = %e, "redirect listener task failed");
        }
        outcome
    }
}

impl UiSurface for LoopbackBrowserUi {
    fn open_authorization_url<'a>(
        &'a self,
        options: OpenAuthorizationUrlOptions,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(self.wait_for_redirect(options))
    }
}

/// Requests under the redirect path are the redirect; anything else (the
/// browser's favicon request) is a 404.
async fn callback_handler(State(state): State<CallbackState>, uri: Uri) -> impl IntoResponse {
    if !uri.path().starts_with(state.redirect.path()) {
        return (StatusCode::NOT_FOUND, "not found");
    }

    let mut captured = (*state.redirect).clone();
    captured.set_path(uri.path());
    captured.set_query(uri.query());

    if state.captured.try_send(captured).is_err() {
        debug!("duplicate redirect ignored");
    }
    (
        StatusCode::OK,
        "Authorization finished. You can close this window and return to the terminal.",
    )
}

/// Reads the redirect URL the user copies from the browser's address bar.
pub struct ManualPasteUi {
    input: Mutex<Box<dyn AsyncBufRead + Send + Unpin>>,
}

impl ManualPasteUi {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }

    pub fn new(input: impl AsyncBufRead + Send + Unpin + 'static) -> Self {
        Self {
            input: Mutex::new(Box::new(input)),
        }
    }

    async fn read_redirect(&self, options: OpenAuthorizationUrlOptions) -> Result<String> {
        eprintln!("Open this URL in your browser to continue:\n\n  {}\n", options.url);
        eprintln!(
            "After signing in, paste the URL starting with {} (empty line cancels):",
            options.redirect_uri
        );

        let mut line = String::new();
        let mut input = self.input.lock().await;
        let read = input
            .read_line(&mut line)
            .await
            .map_err(|e| Error::Transport(format!("reading redirect from terminal: {e}")))?;

        let line = line.trim();
        if read == 0 || line.is_empty() {
            return Err(Error::Cancel);
        }
        Ok(line.to_owned())
    }
}

impl UiSurface for ManualPasteUi {
    fn open_authorization_url<'a>(
        &'a self,
        options: OpenAuthorizationUrlOptions,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(self.read_redirect(options))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(redirect_uri: &str) -> OpenAuthorizationUrlOptions {
        OpenAuthorizationUrlOptions {
            url: "https://accounts.example.com/oauth/authorize?client_id=c".into(),
            redirect_uri: redirect_uri.into(),
            share_cookies_with_device_browser: false,
        }
    }

    /// Reserve a free local port; the listener is dropped before the UI binds it.
    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    async fn get_with_retry(client: &reqwest::Client, url: &str) -> reqwest::Response {
        for _ in 0..50 {
            if let Ok(response) = client.get(url).send().await {
                return response;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("redirect listener never came up at {url}");
    }

    #[tokio::test]
    async fn loopback_captures_redirect() {
        let port = free_port();
        let redirect_uri = format!("http://127.0.0.1:{port}/callback");
        let ui = Arc::new(LoopbackBrowserUi::new(Duration::from_secs(10)));

        let waiting = {
            let ui = ui.clone();
            let opts = options(&redirect_uri);
            tokio::spawn(async move { ui.open_authorization_url(opts).await })
        };

        let client = reqwest::Client::new();
        let response = get_with_retry(
            &client,
            &format!("{redirect_uri}?code=abc123&state=xyz"),
        )
        .await;
        assert_eq!(response.status(), reqwest::StatusCode::OK);

        let captured = waiting.await.unwrap().unwrap();
        assert_eq!(
            captured,
            format!("http://127.0.0.1:{port}/callback?code=abc123&state=xyz")
        );
    }

    #[tokio::test]
    async fn loopback_ignores_other_paths() {
        let port = free_port();
        let redirect_uri = format!("http://127.0.0.1:{port}/callback");
        let ui = Arc::new(LoopbackBrowserUi::new(Duration::from_secs(10)));

        let waiting = {
            let ui = ui.clone();
            let opts = options(&redirect_uri);
            tokio::spawn(async move { ui.open_authorization_url(opts).await })
        };

        let client = reqwest::Client::new();
        let favicon = get_with_retry(&client, &format!("http://127.0.0.1:{port}/favicon.ico")).await;
        assert_eq!(favicon.status(), reqwest::StatusCode::NOT_FOUND);

        client
            .get(format!("{redirect_uri}?error=access_denied"))
            .send()
            .await
            .unwrap();
        let captured = waiting.await.unwrap().unwrap();
        assert!(captured.ends_with("/callback?error=access_denied"), "got: {captured}");
    }

    #[tokio::test]
    async fn loopback_timeout_is_cancel() {
        let port = free_port();
        let ui = LoopbackBrowserUi::new(Duration::from_millis(50));
        let err = ui
            .open_authorization_url(options(&format!("http://127.0.0.1:{port}/callback")))
            .await
            .unwrap_err();
        assert!(err.is_cancel());
    }

    #[tokio::test]
    async fn loopback_rejects_unparseable_redirect() {
        let ui = LoopbackBrowserUi::new(Duration::from_millis(50));
        let err = ui
            .open_authorization_url(options("not a url"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn manual_paste_returns_trimmed_line() {
        let ui = ManualPasteUi::new(&b"  com.example.app://cb?code=pasted  \n"[..]);
        let captured = ui
            .open_authorization_url(options("com.example.app://cb"))
            .await
            .unwrap();
        assert_eq!(captured, "com.example.app://cb?code=pasted");
    }

    #[tokio::test]
    async fn manual_paste_empty_line_is_cancel() {
        let ui = ManualPasteUi::new(&b"\n"[..]);
        let err = ui
            .open_authorization_url(options("com.example.app://cb"))
            .await
            .unwrap_err();
        assert!(err.is_cancel());
    }

    #[tokio::test]
    async fn manual_paste_eof_is_cancel() {
        let ui = ManualPasteUi::new(&b""[..]);
        let err = ui
            .open_authorization_url(options("com.example.app://cb"))
            .await
            .unwrap_err();
        assert!(err.is_cancel());
    }

    #[tokio::test]
    async fn native_provider_unsupported_in_terminal() {
        let ui = ManualPasteUi::new(&b""[..]);
        let err = ui
            .sign_in_with_native_provider("https://appleid.apple.com/auth")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }
}
