// # drivewatchd - Drive activity relay daemon
//
// A THIN integration layer: it reads configuration from the environment,
// builds the Google Drive, Slack and Mailchimp adapters, and runs the
// drivewatch engine until SIGTERM or SIGINT.
//
// All polling, detection and notification logic lives in drivewatch-core.
//
// ## Configuration
//
// All configuration is done via environment variables:
//
// ### Google
// - `DRIVEWATCH_GOOGLE_CLIENT_ID`: OAuth client id (required)
// - `DRIVEWATCH_GOOGLE_CLIENT_SECRET`: OAuth client secret (required)
// - `DRIVEWATCH_GOOGLE_TOKEN_URI`: Token endpoint
// - `DRIVEWATCH_GOOGLE_REDIRECT_URI`: Public enrollment page
// - `DRIVEWATCH_GOOGLE_API_BASE`: Drive API base URL
//
// ### Slack
// - `DRIVEWATCH_SLACK_API_BASE`: Web API base URL
// - `DRIVEWATCH_SLACK_USERNAME`: Name messages are posted under
// - `DRIVEWATCH_SLACK_ICON_URL`: Icon shown next to messages
//
// ### Mailchimp (optional; all three of key, data center and list id enable it)
// - `DRIVEWATCH_MAILCHIMP_API_KEY`
// - `DRIVEWATCH_MAILCHIMP_DATA_CENTER`
// - `DRIVEWATCH_MAILCHIMP_LIST_ID`
// - `DRIVEWATCH_MAILCHIMP_GROUP_TITLE`, `DRIVEWATCH_MAILCHIMP_GROUP_NAME`
//
// ### Subscription Store
// - `DRIVEWATCH_STORE_TYPE`: file or memory (default file)
// - `DRIVEWATCH_STORE_PATH`: Path to the subscriptions file (for file store)
//
// ### Engine
// - `DRIVEWATCH_POLL_INTERVAL_SECS`: Cycle period (default 30)
// - `DRIVEWATCH_WORKERS`: Concurrent checks per cycle (default 16)
// - `DRIVEWATCH_DEDUP_WINDOW_SECS`: Repeat suppression window (default 3600)
// - `DRIVEWATCH_FAILURE_THRESHOLD_SECS`: Removal after failing this long (default 86400)
// - `DRIVEWATCH_REQUEST_TIMEOUT_SECS`: Per remote call (default 15)
// - `DRIVEWATCH_LOG_LEVEL`: trace, debug, info, warn, error (default info)
//
// ## Example
//
// ```bash
// export DRIVEWATCH_GOOGLE_CLIENT_ID=1234.apps.googleusercontent.com
// export DRIVEWATCH_GOOGLE_CLIENT_SECRET=your_secret
// export DRIVEWATCH_GOOGLE_REDIRECT_URI=https://drivewatch.example.com/
// export DRIVEWATCH_STORE_PATH=/var/lib/drivewatch/subscriptions.json
//
// drivewatchd
// ```

use anyhow::Result;
use drivewatch_core::config::{MailchimpConfig, StoreConfig, WatchConfig};
use drivewatch_core::state::open_store;
use drivewatch_core::traits::EnrollmentHook;
use drivewatch_core::{EngineComponents, WatchEngine};
use drivewatch_gdrive::GoogleDriveClient;
use drivewatch_slack::SlackMessenger;
use std::env;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum DrivewatchExitCode {
    CleanShutdown = 0,
    ConfigError = 1,
    RuntimeError = 2,
}

impl From<DrivewatchExitCode> for ExitCode {
    fn from(code: DrivewatchExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
struct Config {
    watch: WatchConfig,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to
    /// its value
    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.is_empty());
        let mut watch = WatchConfig::default();

        watch.google.client_id = var("DRIVEWATCH_GOOGLE_CLIENT_ID").unwrap_or_default();
        watch.google.client_secret = var("DRIVEWATCH_GOOGLE_CLIENT_SECRET").unwrap_or_default();
        if let Some(uri) = var("DRIVEWATCH_GOOGLE_TOKEN_URI") {
            watch.google.token_uri = uri;
        }
        if let Some(uri) = var("DRIVEWATCH_GOOGLE_REDIRECT_URI") {
            watch.google.redirect_uri = uri;
        }
        if let Some(base) = var("DRIVEWATCH_GOOGLE_API_BASE") {
            watch.google.api_base = base;
        }

        if let Some(base) = var("DRIVEWATCH_SLACK_API_BASE") {
            watch.slack.api_base = base;
        }
        if let Some(username) = var("DRIVEWATCH_SLACK_USERNAME") {
            watch.slack.username = username;
        }
        if let Some(icon) = var("DRIVEWATCH_SLACK_ICON_URL") {
            watch.slack.icon_url = icon;
        }

        let mailchimp = MailchimpConfig {
            api_key: var("DRIVEWATCH_MAILCHIMP_API_KEY").unwrap_or_default(),
            data_center: var("DRIVEWATCH_MAILCHIMP_DATA_CENTER").unwrap_or_default(),
            list_id: var("DRIVEWATCH_MAILCHIMP_LIST_ID").unwrap_or_default(),
            group_title: var("DRIVEWATCH_MAILCHIMP_GROUP_TITLE"),
            group_name: var("DRIVEWATCH_MAILCHIMP_GROUP_NAME"),
        };
        watch.mailchimp = mailchimp.is_configured().then_some(mailchimp);

        watch.store = match var("DRIVEWATCH_STORE_TYPE").as_deref().unwrap_or("file") {
            "file" => StoreConfig::File {
                path: var("DRIVEWATCH_STORE_PATH")
                    .unwrap_or_else(|| "subscriptions.json".to_string()),
            },
            "memory" => StoreConfig::Memory,
            other => anyhow::bail!(
                "DRIVEWATCH_STORE_TYPE '{}' is not supported. \
                Supported types: file, memory",
                other
            ),
        };

        let engine = &mut watch.engine;
        if let Some(v) = parse_var(&var, "DRIVEWATCH_POLL_INTERVAL_SECS")? {
            engine.poll_interval_secs = v;
        }
        if let Some(v) = parse_var(&var, "DRIVEWATCH_WORKERS")? {
            engine.workers = v;
        }
        if let Some(v) = parse_var(&var, "DRIVEWATCH_DEDUP_WINDOW_SECS")? {
            engine.dedup_window_secs = v;
        }
        if let Some(v) = parse_var(&var, "DRIVEWATCH_FAILURE_THRESHOLD_SECS")? {
            engine.failure_threshold_secs = v;
        }
        if let Some(v) = parse_var(&var, "DRIVEWATCH_REQUEST_TIMEOUT_SECS")? {
            engine.request_timeout_secs = v;
        }
        engine.version = env!("CARGO_PKG_VERSION").to_string();

        Ok(Self {
            watch,
            log_level: var("DRIVEWATCH_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.watch.google.client_id.is_empty() {
            anyhow::bail!(
                "DRIVEWATCH_GOOGLE_CLIENT_ID is required. \
                Set it via: export DRIVEWATCH_GOOGLE_CLIENT_ID=your_client_id"
            );
        }
        if self.watch.google.client_secret.is_empty() {
            anyhow::bail!(
                "DRIVEWATCH_GOOGLE_CLIENT_SECRET is required. \
                Set it via: export DRIVEWATCH_GOOGLE_CLIENT_SECRET=your_secret"
            );
        }
        if self.watch.google.redirect_uri.is_empty() {
            eprintln!(
                "WARNING: DRIVEWATCH_GOOGLE_REDIRECT_URI is not set. \
                Channel-not-found notes will carry no enrollment link."
            );
        }

        if let StoreConfig::File { path } = &self.watch.store
            && let Some(parent) = std::path::Path::new(path).parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            anyhow::bail!(
                "DRIVEWATCH_STORE_PATH parent directory does not exist: {}. \
                Create it first: sudo mkdir -p {}",
                parent.display(),
                parent.display()
            );
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "DRIVEWATCH_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        self.watch.validate()?;
        Ok(())
    }
}

/// Parse an optional numeric variable, failing on a malformed value
fn parse_var<T, V>(var: &V, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    V: Fn(&str) -> Option<String>,
{
    match var(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow::anyhow!("{} must be a non-negative integer. Got: {}", name, raw)),
    }
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return DrivewatchExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return DrivewatchExitCode::ConfigError.into();
    }

    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return DrivewatchExitCode::ConfigError.into();
    }

    info!("Starting drivewatchd {}", env!("CARGO_PKG_VERSION"));

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return DrivewatchExitCode::RuntimeError.into();
        }
    };

    rt.block_on(async {
        match run_daemon(config).await {
            Ok(()) => DrivewatchExitCode::CleanShutdown,
            Err(DaemonError::Startup(e)) => {
                error!("Startup error: {}", e);
                DrivewatchExitCode::ConfigError
            }
            Err(DaemonError::Runtime(e)) => {
                error!("Daemon error: {}", e);
                DrivewatchExitCode::RuntimeError
            }
        }
    })
    .into()
}

/// Where the daemon failed, which decides the exit code
enum DaemonError {
    Startup(anyhow::Error),
    Runtime(anyhow::Error),
}

/// Build the adapters and run the engine until a shutdown signal
async fn run_daemon(config: Config) -> std::result::Result<(), DaemonError> {
    let watch = config.watch;
    let timeout = watch.engine.request_timeout();

    // The handle stays alive for the daemon's lifetime; enrollment is wired
    // in by embedders
    let (mut engine, _handle, mut events) = build_engine(&watch)
        .await
        .map_err(DaemonError::Startup)?;

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            debug!("Engine event: {:?}", event);
        }
    });

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let signals = tokio::spawn(async move {
        match wait_for_shutdown().await {
            Ok(signal) => info!("Received shutdown signal: {}", signal),
            Err(e) => warn!("Signal handling failed, shutting down: {}", e),
        }
        let _ = shutdown_tx.send(());
    });

    info!(
        "Watching {} subscriber(s) every {:?} (request timeout {:?})",
        engine.subscriber_count(),
        watch.engine.poll_interval(),
        timeout
    );

    let result = engine
        .run_with_shutdown(Some(shutdown_rx))
        .await
        .map_err(|e| DaemonError::Runtime(e.into()));
    signals.abort();

    info!("drivewatchd stopped");
    result
}

async fn build_engine(
    watch: &WatchConfig,
) -> Result<(
    WatchEngine,
    drivewatch_core::EngineHandle,
    tokio::sync::mpsc::Receiver<drivewatch_core::EngineEvent>,
)> {
    let timeout = watch.engine.request_timeout();

    let drive = Arc::new(GoogleDriveClient::new(&watch.google, timeout)?);
    let slack = Arc::new(SlackMessenger::new(&watch.slack, timeout)?);
    let store = open_store(&watch.store).await?;

    let components = EngineComponents::new(drive.clone(), drive, slack, store)
        .with_hook(enrollment_hook(watch)?);

    Ok(WatchEngine::new(components, watch).await?)
}

#[cfg(feature = "mailchimp")]
fn enrollment_hook(watch: &WatchConfig) -> Result<Arc<dyn EnrollmentHook>> {
    match &watch.mailchimp {
        Some(mailchimp) => {
            info!("Mailing list enrollment enabled (list {})", mailchimp.list_id);
            let hook = drivewatch_mailchimp::MailchimpHook::new(
                mailchimp,
                watch.engine.request_timeout(),
            )?;
            Ok(Arc::new(hook))
        }
        None => Ok(Arc::new(drivewatch_core::traits::NoopEnrollmentHook)),
    }
}

#[cfg(not(feature = "mailchimp"))]
fn enrollment_hook(watch: &WatchConfig) -> Result<Arc<dyn EnrollmentHook>> {
    if watch.mailchimp.is_some() {
        warn!("Mailchimp configured but drivewatchd was built without the mailchimp feature");
    }
    Ok(Arc::new(drivewatch_core::traits::NoopEnrollmentHook))
}

/// Wait for SIGTERM or SIGINT
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for CTRL-C
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
