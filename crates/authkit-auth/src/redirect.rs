//! Redirect result parsing
//!
//! Turns the terminal URL captured by the UI surface into a `RedirectOutcome`.
//! Only the query component is read. `error` wins over `code`; `result` is
//! accepted in place of `code` for the provider SSO flow, which reports its
//! authorization code under that name.

use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

/// Terminal result of the user-interaction step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectOutcome {
    Success {
        code: String,
        state: Option<String>,
    },
    Failure {
        error_code: String,
        error_description: Option<String>,
    },
    /// The end user dismissed the interaction. Never produced from a URL.
    Cancelled,
}

impl RedirectOutcome {
    /// Fold the UI surface's result into an outcome.
    ///
    /// `Err(Cancel)` becomes `Cancelled`; a captured URL is parsed; any other
    /// error from the surface propagates unchanged.
    pub fn capture(ui_result: Result<String>, expected_redirect_uri: &str) -> Result<Self> {
        match ui_result {
            Ok(url) => parse(&url, expected_redirect_uri),
            Err(Error::Cancel) => Ok(RedirectOutcome::Cancelled),
            Err(e) => Err(e),
        }
    }

    /// `Failure` as the error the flow caller sees; `None` otherwise.
    pub fn into_provider_error(self) -> Option<Error> {
        match self {
            RedirectOutcome::Failure {
                error_code,
                error_description,
            } => Some(Error::Provider {
                code: error_code,
                description: error_description,
            }),
            _ => None,
        }
    }
}

/// Parse the redirect URL returned after user interaction.
pub fn parse(url: &str, expected_redirect_uri: &str) -> Result<RedirectOutcome> {
    let actual = Url::parse(url)
        .map_err(|e| Error::MalformedRedirect(format!("unparseable redirect URL: {e}")))?;
    let expected = Url::parse(expected_redirect_uri)
        .map_err(|e| Error::InvalidConfig(format!("invalid redirect URI: {e}")))?;

    if !matches_redirect_uri(&actual, &expected) {
        return Err(Error::MalformedRedirect(format!(
            "redirect does not match {expected_redirect_uri}"
        )));
    }

    let mut code = None;
    let mut result = None;
    let mut state = None;
    let mut error = None;
    let mut error_description = None;
    for (name, value) in actual.query_pairs() {
        let slot = match name.as_ref() {
            "code" => &mut code,
            "result" => &mut result,
            "state" => &mut state,
            "error" => &mut error,
            "error_description" => &mut error_description,
            _ => continue,
        };
        if slot.is_none() {
            *slot = Some(value.into_owned());
        }
    }

    if let Some(error_code) = error {
        debug!(error = %error_code, "redirect carries provider error");
        return Ok(RedirectOutcome::Failure {
            error_code,
            error_description,
        });
    }

    match code.or(result) {
        Some(code) => Ok(RedirectOutcome::Success { code, state }),
        None => Err(Error::MalformedRedirect(
            "redirect has neither `code` nor `error`".into(),
        )),
    }
}

/// Scheme and authority must be equal; the path must start with the
/// expected path. Query and fragment of the expected URI are ignored.
fn matches_redirect_uri(actual: &Url, expected: &Url) -> bool {
    actual.scheme() == expected.scheme()
        && actual.host_str() == expected.host_str()
        && actual.port_or_known_default() == expected.port_or_known_default()
        && actual.path().starts_with(expected.path())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CALLBACK: &str = "https://cb/";

    #[test]
    fn code_and_state_is_success() {
        let outcome = parse("https://cb/?code=abc&state=xyz", CALLBACK).unwrap();
        assert_eq!(
            outcome,
            RedirectOutcome::Success {
                code: "abc".into(),
                state: Some("xyz".into()),
            }
        );
    }

    #[test]
    fn error_is_failure() {
        let outcome = parse("https://cb/?error=access_denied", CALLBACK).unwrap();
        assert_eq!(
            outcome,
            RedirectOutcome::Failure {
                error_code: "access_denied".into(),
                error_description: None,
            }
        );
    }

    #[test]
    fn error_description_is_decoded() {
        let outcome = parse(
            "https://cb/?error=access_denied&error_description=user%20said%20no",
            CALLBACK,
        )
        .unwrap();
        assert_eq!(
            outcome,
            RedirectOutcome::Failure {
                error_code: "access_denied".into(),
                error_description: Some("user said no".into()),
            }
        );
    }

    #[test]
    fn error_wins_over_code() {
        let outcome = parse("https://cb/?code=abc&error=server_error", CALLBACK).unwrap();
        assert!(matches!(outcome, RedirectOutcome::Failure { .. }));
    }

    #[test]
    fn neither_code_nor_error_is_malformed() {
        let result = parse("https://cb/", CALLBACK);
        assert!(matches!(result, Err(Error::MalformedRedirect(_))));
    }

    #[test]
    fn result_parameter_stands_in_for_code() {
        let outcome = parse("https://cb/?result=sso-code", CALLBACK).unwrap();
        assert_eq!(
            outcome,
            RedirectOutcome::Success {
                code: "sso-code".into(),
                state: None,
            }
        );
    }

    #[test]
    fn code_preferred_over_result() {
        let outcome = parse("https://cb/?result=r&code=c", CALLBACK).unwrap();
        assert!(matches!(outcome, RedirectOutcome::Success { code, .. } if code == "c"));
    }

    #[test]
    fn failure_converts_to_provider_error() {
        let outcome = parse("https://cb/?error=access_denied", CALLBACK).unwrap();
        let err = outcome.into_provider_error().unwrap();
        assert!(matches!(err, Error::Provider { code, description: None } if code == "access_denied"));

        let success = parse("https://cb/?code=abc", CALLBACK).unwrap();
        assert!(success.into_provider_error().is_none());
    }

    #[test]
    fn custom_scheme_redirect() {
        let outcome = parse(
            "com.example.app://host/after-auth?code=abc",
            "com.example.app://host/after-auth",
        )
        .unwrap();
        assert!(matches!(outcome, RedirectOutcome::Success { code, .. } if code == "abc"));
    }

    #[test]
    fn mismatched_redirect_is_malformed() {
        let wrong_host = parse("https://evil/?code=abc", CALLBACK);
        assert!(matches!(wrong_host, Err(Error::MalformedRedirect(_))));

        let wrong_path = parse(
            "https://cb/other?code=abc",
            "https://cb/callback",
        );
        assert!(matches!(wrong_path, Err(Error::MalformedRedirect(_))));

        let wrong_scheme = parse("http://cb/?code=abc", CALLBACK);
        assert!(matches!(wrong_scheme, Err(Error::MalformedRedirect(_))));
    }

    #[test]
    fn unparseable_url_is_malformed() {
        let result = parse("not a url", CALLBACK);
        assert!(matches!(result, Err(Error::MalformedRedirect(_))));
    }

    #[test]
    fn capture_maps_cancel_and_passes_other_errors() {
        let cancelled = RedirectOutcome::capture(Err(Error::Cancel), CALLBACK).unwrap();
        assert_eq!(cancelled, RedirectOutcome::Cancelled);

        let failed = RedirectOutcome::capture(Err(Error::Unsupported("webview".into())), CALLBACK);
        assert!(matches!(failed, Err(Error::Unsupported(_))));

        let parsed =
            RedirectOutcome::capture(Ok("https://cb/?code=abc".into()), CALLBACK).unwrap();
        assert!(matches!(parsed, RedirectOutcome::Success { .. }));
    }
}
