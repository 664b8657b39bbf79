//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! `AUTHKIT_CLIENT_ID` overrides `container.client_id` so one config file
//! can serve several registered clients.

use std::path::{Path, PathBuf};

use authkit_flow::{ContainerConfig, DEFAULT_NAMESPACE};
use serde::Deserialize;
use url::Url;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub container: ContainerSection,
    pub storage: StorageSection,
    pub ui: UiSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Per-app container settings
#[derive(Debug, Deserialize)]
pub struct ContainerSection {
    #[serde(default)]
    pub client_id: String,
    pub endpoint: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub share_cookies_with_device_browser: bool,
}

/// Where the session and anonymous keys live on disk
#[derive(Debug, Deserialize)]
pub struct StorageSection {
    pub dir: PathBuf,
}

/// How the authorization page reaches the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UiMode {
    /// Local listener on the redirect URI catches the browser redirect
    Loopback,
    /// User pastes the redirect URL back into the terminal
    Manual,
}

#[derive(Debug, Deserialize)]
pub struct UiSection {
    #[serde(default = "default_ui_mode")]
    pub mode: UiMode,
    /// Redirect URI registered for this client
    pub redirect_uri: String,
    /// How long to wait for the redirect before treating it as cancelled
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoggingSection {
    /// JSON log lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_owned()
}

fn default_ui_mode() -> UiMode {
    UiMode::Loopback
}

fn default_timeout() -> u64 {
    300
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(client_id) = std::env::var("AUTHKIT_CLIENT_ID") {
            config.container.client_id = client_id;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        if self.container.client_id.trim().is_empty() {
            return Err(common::Error::Config(
                "container.client_id is required (or set AUTHKIT_CLIENT_ID)".into(),
            ));
        }

        let endpoint = self.endpoint()?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(common::Error::Config(format!(
                "container.endpoint must start with http:// or https://, got: {}",
                self.container.endpoint
            )));
        }

        if self.container.namespace.is_empty() {
            return Err(common::Error::Config(
                "container.namespace must not be empty".into(),
            ));
        }

        if self.ui.timeout_secs == 0 {
            return Err(common::Error::Config(
                "ui.timeout_secs must be greater than 0".into(),
            ));
        }

        let redirect = Url::parse(&self.ui.redirect_uri).map_err(|e| {
            common::Error::Config(format!(
                "ui.redirect_uri is not a valid URL ({}): {e}",
                self.ui.redirect_uri
            ))
        })?;
        if self.ui.mode == UiMode::Loopback {
            let loopback_host = matches!(redirect.host_str(), Some("127.0.0.1" | "localhost"));
            if redirect.scheme() != "http" || !loopback_host || redirect.port().is_none() {
                return Err(common::Error::Config(format!(
                    "loopback mode needs an http://127.0.0.1:<port>/ redirect_uri, got: {}",
                    self.ui.redirect_uri
                )));
            }
        }

        Ok(())
    }

    pub fn endpoint(&self) -> common::Result<Url> {
        Url::parse(&self.container.endpoint).map_err(|e| {
            common::Error::Config(format!(
                "container.endpoint is not a valid URL ({}): {e}",
                self.container.endpoint
            ))
        })
    }

    pub fn container_config(&self) -> common::Result<ContainerConfig> {
        Ok(ContainerConfig {
            client_id: self.container.client_id.clone(),
            endpoint: self.endpoint()?,
            namespace: self.container.namespace.clone(),
            share_cookies_with_device_browser: self.container.share_cookies_with_device_browser,
        })
    }

    /// File backing the token store.
    pub fn storage_path(&self) -> PathBuf {
        self.storage.dir.join("storage.json")
    }

    /// Directory of the file keystore.
    pub fn keystore_dir(&self) -> PathBuf {
        self.storage.dir.join("keys")
    }

    /// Resolve config file path from CLI arg or AUTHKIT_CONFIG env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("AUTHKIT_CONFIG") {
            return PathBuf::from(p);
        }
        PathBuf::from("authkit.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serializes tests that mutate environment variables.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    fn valid_toml() -> &'static str {
        r#"
[container]
client_id = "client-1"
endpoint = "https://accounts.example.com"

[storage]
dir = "/var/lib/authkit"

[ui]
redirect_uri = "http://127.0.0.1:8765/callback"
"#
    }

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("authkit.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn load_valid_config_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("AUTHKIT_CLIENT_ID") };
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, valid_toml());

        let config = Config::load(&path).unwrap();
        assert_eq!(config.container.client_id, "client-1");
        assert_eq!(config.container.namespace, "default");
        assert!(!config.container.share_cookies_with_device_browser);
        assert_eq!(config.ui.mode, UiMode::Loopback);
        assert_eq!(config.ui.timeout_secs, 300);
        assert!(!config.logging.json);
        assert_eq!(
            config.storage_path(),
            PathBuf::from("/var/lib/authkit/storage.json")
        );
        assert_eq!(config.keystore_dir(), PathBuf::from("/var/lib/authkit/keys"));

        let container = config.container_config().unwrap();
        assert_eq!(container.endpoint.as_str(), "https://accounts.example.com/");
    }

    #[test]
    fn load_missing_file() {
        let result = Config::load(Path::new("/nonexistent/path/authkit.toml"));
        assert!(matches!(result, Err(common::Error::Io(_))));
    }

    #[test]
    fn load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "not valid {{{{ toml");
        assert!(matches!(Config::load(&path), Err(common::Error::Toml(_))));
    }

    #[test]
    fn client_id_from_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, valid_toml());

        unsafe { set_env("AUTHKIT_CLIENT_ID", "client-from-env") };
        let config = Config::load(&path);
        unsafe { remove_env("AUTHKIT_CLIENT_ID") };

        assert_eq!(config.unwrap().container.client_id, "client-from-env");
    }

    #[test]
    fn missing_client_id_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("AUTHKIT_CLIENT_ID") };
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[container]
endpoint = "https://accounts.example.com"

[storage]
dir = "/tmp/authkit"

[ui]
redirect_uri = "http://127.0.0.1:8765/callback"
"#,
        );

        let err = Config::load(&path).unwrap_err().to_string();
        assert!(err.contains("client_id"), "got: {err}");
    }

    #[test]
    fn invalid_endpoint_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("AUTHKIT_CLIENT_ID") };
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, &valid_toml().replace("https://accounts.example.com", "accounts.example.com"));

        let err = Config::load(&path).unwrap_err().to_string();
        assert!(err.contains("container.endpoint"), "got: {err}");
    }

    #[test]
    fn zero_timeout_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("AUTHKIT_CLIENT_ID") };
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, &format!("{}timeout_secs = 0\n", valid_toml()));

        assert!(Config::load(&path).is_err(), "timeout_secs = 0 must be rejected");
    }

    #[test]
    fn loopback_requires_local_http_redirect() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("AUTHKIT_CLIENT_ID") };
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            &valid_toml().replace("http://127.0.0.1:8765/callback", "com.example.app://host/cb"),
        );
        let err = Config::load(&path).unwrap_err().to_string();
        assert!(err.contains("loopback"), "got: {err}");

        // The same redirect is fine when the user pastes it back
        let manual = valid_toml()
            .replace("http://127.0.0.1:8765/callback", "com.example.app://host/cb")
            .replace("[ui]\n", "[ui]\nmode = \"manual\"\n");
        let path = write_config(&dir, &manual);
        let config = Config::load(&path).unwrap();
        assert_eq!(config.ui.mode, UiMode::Manual);
    }

    #[test]
    fn resolve_path_cli_arg() {
        let path = Config::resolve_path(Some("/custom/path.toml"));
        assert_eq!(path, PathBuf::from("/custom/path.toml"));
    }

    #[test]
    fn resolve_path_env_var() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("AUTHKIT_CONFIG", "/env/path.toml") };
        let path = Config::resolve_path(None);
        unsafe { remove_env("AUTHKIT_CONFIG") };
        assert_eq!(path, PathBuf::from("/env/path.toml"));
    }

    #[test]
    fn resolve_path_default() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("AUTHKIT_CONFIG") };
        assert_eq!(Config::resolve_path(None), PathBuf::from("authkit.toml"));
    }

    #[test]
    fn resolve_path_cli_overrides_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("AUTHKIT_CONFIG", "/env/should-lose.toml") };
        let path = Config::resolve_path(Some("/cli/wins.toml"));
        unsafe { remove_env("AUTHKIT_CONFIG") };
        assert_eq!(path, PathBuf::from("/cli/wins.toml"));
    }
}
