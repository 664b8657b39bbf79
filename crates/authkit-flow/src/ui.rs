//! User-interaction surface
//!
//! The one step of a flow that waits on a human. Implementations render the
//! authorization page, detect navigation to the redirect URI and hand the
//! full URL back. Dismissal is reported as `Error::Cancel`.

use authkit_auth::{Error, NativeProviderResult, Result};
use common::BoxFuture;

/// What the UI surface needs to present an authorization page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenAuthorizationUrlOptions {
    pub url: String,
    /// Navigation to a URL under this prefix ends the interaction
    pub redirect_uri: String,
    /// Let the page see the device browser's cookies (existing logins)
    pub share_cookies_with_device_browser: bool,
}

pub trait UiSurface: Send + Sync {
    /// Open `options.url` and resolve with the redirect URL the page
    /// navigated to, or `Err(Error::Cancel)` if the user dismissed it.
    fn open_authorization_url<'a>(
        &'a self,
        options: OpenAuthorizationUrlOptions,
    ) -> BoxFuture<'a, Result<String>>;

    /// Run a native provider SDK sign-in against `url`. Surfaces without
    /// native provider support keep the default.
    fn sign_in_with_native_provider<'a>(
        &'a self,
        url: &'a str,
    ) -> BoxFuture<'a, Result<NativeProviderResult>> {
        Box::pin(async move {
            Err(Error::Unsupported(format!(
                "native provider sign-in is not available for {url}"
            )))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrowserOnly;

    impl UiSurface for BrowserOnly {
        fn open_authorization_url<'a>(
            &'a self,
            options: OpenAuthorizationUrlOptions,
        ) -> BoxFuture<'a, Result<String>> {
            Box::pin(async move { Ok(format!("{}?code=abc", options.redirect_uri)) })
        }
    }

    #[tokio::test]
    async fn native_provider_defaults_to_unsupported() {
        let ui = BrowserOnly;
        let err = ui
            .sign_in_with_native_provider("https://appleid.apple.com/auth")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }
}
