//! authkit command-line client
//!
//! Drives the authkit flows from a terminal:
//! 1. Loads the config file and builds a `Container` over file-backed storage
//! 2. Runs one command (login, anonymous, promote, ...) against it
//! 3. Prints the resulting user record as JSON on stdout
//!
//! Logs go to stderr so stdout stays machine-readable.

mod config;
mod ui;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use authkit_auth::{FileKeystore, HttpAuthApi, OnUserDuplicate, UserRecord, UxMode};
use authkit_flow::{
    AuthorizeOptions, Container, ContainerParts, PromoteOptions, SsoOptions, UiSurface,
};
use authkit_storage::{ContainerStorage, FileStorageDriver};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, UiMode};
use crate::ui::{LoopbackBrowserUi, ManualPasteUi};

/// Exit code when the user cancels the interaction.
const EXIT_CANCELLED: u8 = 2;

const USAGE: &str = "\
usage: authkit [--config PATH] <command>

commands:
  login                                     sign in through the authorization page
  provider <id> [--on-duplicate <policy>]   sign in with a third-party provider
  link <id>                                 link a provider to the signed-in user
  anonymous                                 sign in as an anonymous user
  promote                                   turn the anonymous user into a regular one
  refresh                                   refresh the session
  token                                     print a valid access token
  whoami                                    print the signed-in user
  logout [--force]                          revoke and clear the session";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Login,
    Provider {
        provider_id: String,
        on_user_duplicate: Option<OnUserDuplicate>,
    },
    Link {
        provider_id: String,
    },
    Anonymous,
    Promote,
    Refresh,
    Token,
    Whoami,
    Logout {
        force: bool,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Login => "login",
            Command::Provider { .. } => "provider",
            Command::Link { .. } => "link",
            Command::Anonymous => "anonymous",
            Command::Promote => "promote",
            Command::Refresh => "refresh",
            Command::Token => "token",
            Command::Whoami => "whoami",
            Command::Logout { .. } => "logout",
        }
    }
}

/// Parse the command from the arguments after the program name.
/// `--config PATH` may appear anywhere and is skipped here.
fn parse_command(args: &[String]) -> Result<Command> {
    let mut rest = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--config" {
            iter.next();
        } else {
            rest.push(arg.as_str());
        }
    }

    let command = match rest.as_slice() {
        ["login"] => Command::Login,
        ["provider", provider_id] => Command::Provider {
            provider_id: provider_id.to_string(),
            on_user_duplicate: None,
        },
        ["provider", provider_id, "--on-duplicate", policy] => Command::Provider {
            provider_id: provider_id.to_string(),
            on_user_duplicate: Some(parse_duplicate_policy(policy)?),
        },
        ["link", provider_id] => Command::Link {
            provider_id: provider_id.to_string(),
        },
        ["anonymous"] => Command::Anonymous,
        ["promote"] => Command::Promote,
        ["refresh"] => Command::Refresh,
        ["token"] => Command::Token,
        ["whoami"] => Command::Whoami,
        ["logout"] => Command::Logout { force: false },
        ["logout", "--force"] => Command::Logout { force: true },
        _ => bail!("{USAGE}"),
    };
    Ok(command)
}

fn parse_duplicate_policy(policy: &str) -> Result<OnUserDuplicate> {
    match policy {
        "abort" => Ok(OnUserDuplicate::Abort),
        "merge" => Ok(OnUserDuplicate::Merge),
        "create" => Ok(OnUserDuplicate::Create),
        other => bail!("unknown --on-duplicate policy {other:?} (expected abort, merge or create)"),
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());
    let command = parse_command(args.get(1..).unwrap_or_default())?;

    let config_path = Config::resolve_path(cli_config_path);
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    init_tracing(config.logging.json);
    info!(
        path = %config_path.display(),
        endpoint = %config.container.endpoint,
        namespace = %config.container.namespace,
        ui_mode = ?config.ui.mode,
        "configuration loaded"
    );

    let container = build_container(&config).await?;
    match run(&container, &config, &command).await {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) if is_cancel(&e) => {
            eprintln!("{} cancelled", command.name());
            Ok(ExitCode::from(EXIT_CANCELLED))
        }
        Err(e) => Err(e.context(format!("{} failed", command.name()))),
    }
}

fn is_cancel(err: &anyhow::Error) -> bool {
    err.downcast_ref::<authkit_flow::Error>()
        .is_some_and(authkit_flow::Error::is_cancel)
}

/// Wire file-backed storage, the HTTP client and the configured UI surface
/// into a configured `Container`.
async fn build_container(config: &Config) -> Result<Container> {
    tokio::fs::create_dir_all(&config.storage.dir)
        .await
        .with_context(|| format!("failed to create {}", config.storage.dir.display()))?;

    let driver = FileStorageDriver::load(config.storage_path())
        .await
        .context("failed to open session storage")?;
    let keystore = FileKeystore::open(config.keystore_dir())
        .await
        .context("failed to open keystore")?;
    let api = HttpAuthApi::new(
        reqwest::Client::new(),
        config.endpoint()?,
        config.container.client_id.clone(),
    );
    let ui: Arc<dyn UiSurface> = match config.ui.mode {
        UiMode::Loopback => Arc::new(LoopbackBrowserUi::new(Duration::from_secs(
            config.ui.timeout_secs,
        ))),
        UiMode::Manual => Arc::new(ManualPasteUi::stdin()),
    };

    let container = Container::new(ContainerParts {
        storage: ContainerStorage::new(Arc::new(driver)),
        keystore: Arc::new(keystore),
        api: Arc::new(api),
        ui,
    });
    container.configure(config.container_config()?).await?;
    Ok(container)
}

async fn run(container: &Container, config: &Config, command: &Command) -> Result<()> {
    let redirect_uri = config.ui.redirect_uri.as_str();

    match command {
        Command::Login => {
            let result = container
                .authorize(AuthorizeOptions::new(redirect_uri))
                .await?;
            print_user(&result.user)?;
        }
        Command::Provider {
            provider_id,
            on_user_duplicate,
        } => {
            let options = SsoOptions {
                ux_mode: UxMode::MobileApp,
                on_user_duplicate: *on_user_duplicate,
            };
            let user = container
                .login_oauth_provider(provider_id, redirect_uri, options)
                .await?;
            print_user(&user)?;
        }
        Command::Link { provider_id } => {
            let user = container
                .link_oauth_provider(provider_id, redirect_uri)
                .await?;
            print_user(&user)?;
        }
        Command::Anonymous => {
            let user = container.authenticate_anonymously().await?;
            print_user(&user)?;
        }
        Command::Promote => {
            let result = container
                .promote_anonymous_user(PromoteOptions::new(redirect_uri))
                .await?;
            print_user(&result.user)?;
        }
        Command::Refresh => {
            let user = container.refresh_session().await?;
            print_user(&user)?;
        }
        Command::Token => {
            let token = container.access_token().await?;
            println!("{}", token.expose());
        }
        Command::Whoami => match container.current_user().await {
            Some(user) => print_user(&user)?,
            None => eprintln!("not signed in"),
        },
        Command::Logout { force } => {
            container.logout(*force).await?;
            eprintln!("signed out");
        }
    }
    Ok(())
}

fn print_user(user: &UserRecord) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(user)?);
    Ok(())
}
