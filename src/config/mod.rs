//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, num::NonZeroU32, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::cache::{CacheLayout, Credentials, DEFAULT_NOCACHE_LABEL};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "wikimirror";
const ENV_PREFIX: &str = "WIKIMIRROR";
const DEFAULT_ADMIN_HOST: &str = "127.0.0.1";
const DEFAULT_ADMIN_PORT: u16 = 3080;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DEBOUNCE_MS: u64 = 10_000;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PAGE_LIMIT: u32 = 100;

/// Command-line arguments for the wikimirror binary.
#[derive(Debug, Parser)]
#[command(
    name = "wikimirror",
    version,
    about = "Keeps a static HTML mirror of wiki pages up to date"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "WIKIMIRROR_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the regeneration worker and the admin HTTP listener.
    Serve(Box<ServeArgs>),
    /// Reconcile every global space (or one space) once and exit when the queue drains.
    Rebuild(RebuildArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RebuildArgs {
    #[command(flatten)]
    pub mirror: MirrorOverrides,

    /// Reconcile only this space key.
    #[arg(long = "space", value_name = "KEY")]
    pub space: Option<String>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct MirrorOverrides {
    /// Override the directory the mirror is written to.
    #[arg(long = "cache-root", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub cache_root: Option<PathBuf>,

    /// Override the base URL pages are rendered from.
    #[arg(long = "render-base-url", value_name = "URL")]
    pub render_base_url: Option<String>,

    /// Override the quiet period before a changed page is regenerated.
    #[arg(long = "debounce-ms", value_name = "MILLIS")]
    pub debounce_ms: Option<u64>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub mirror: MirrorOverrides,

    /// Override the administrative listener host.
    #[arg(long = "admin-host", value_name = "HOST")]
    pub admin_host: Option<String>,

    /// Override the administrative listener port.
    #[arg(long = "admin-port", value_name = "PORT")]
    pub admin_port: Option<u16>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub mirror: MirrorSettings,
    pub content: ContentSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub admin_addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

/// Where and how the mirror is produced.
///
/// Every location and credential is optional: a deployment without them runs
/// but treats all mirror operations as no-ops.
#[derive(Debug, Clone)]
pub struct MirrorSettings {
    pub root_path: Option<PathBuf>,
    pub render_base_url: Option<Url>,
    pub credentials: Option<Credentials>,
    pub debounce: Duration,
    pub nocache_label: String,
    pub request_timeout: Duration,
    pub reconcile_on_startup: bool,
}

impl Default for MirrorSettings {
    fn default() -> Self {
        Self {
            root_path: None,
            render_base_url: None,
            credentials: None,
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            nocache_label: DEFAULT_NOCACHE_LABEL.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            reconcile_on_startup: true,
        }
    }
}

impl MirrorSettings {
    /// Settings for a fully configured mirror; mainly useful for tests and embedding.
    pub fn configured(
        root_path: impl Into<PathBuf>,
        render_base_url: Url,
        credentials: Credentials,
    ) -> Self {
        Self {
            root_path: Some(root_path.into()),
            render_base_url: Some(render_base_url),
            credentials: Some(credentials),
            ..Self::default()
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn is_configured(&self) -> bool {
        self.root_path.is_some() && self.render_base_url.is_some() && self.credentials.is_some()
    }

    /// Path layout of the mirror, or `None` while the mirror is unconfigured.
    pub fn layout(&self) -> Option<CacheLayout> {
        if !self.is_configured() {
            return None;
        }
        let root = self.root_path.as_ref()?;
        let base = self.render_base_url.as_ref()?;
        Some(CacheLayout::new(root.clone(), base, self.nocache_label.clone()))
    }
}

/// Access to the content store's REST API.
#[derive(Debug, Clone)]
pub struct ContentSettings {
    pub api_url: Option<Url>,
    pub page_limit: NonZeroU32,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Rebuild(args)) => raw.apply_rebuild_overrides(args),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    mirror: RawMirrorSettings,
    content: RawContentSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.admin_host.as_ref() {
            self.server.admin_host = Some(host.clone());
        }
        if let Some(port) = overrides.admin_port {
            self.server.admin_port = Some(port);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }

        self.apply_mirror_overrides(&overrides.mirror);
    }

    fn apply_rebuild_overrides(&mut self, args: &RebuildArgs) {
        if let Some(level) = args.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        self.apply_mirror_overrides(&args.mirror);
    }

    fn apply_mirror_overrides(&mut self, overrides: &MirrorOverrides) {
        if let Some(root) = overrides.cache_root.as_ref() {
            self.mirror.root_path = Some(root.clone());
        }
        if let Some(url) = overrides.render_base_url.as_ref() {
            self.mirror.render_base_url = Some(url.clone());
        }
        if let Some(debounce) = overrides.debounce_ms {
            self.mirror.debounce_ms = Some(debounce);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            mirror,
            content,
        } = raw;

        let mirror = build_mirror_settings(mirror)?;
        let content = build_content_settings(content, &mirror)?;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            mirror,
            content,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let admin_host = server
        .admin_host
        .unwrap_or_else(|| DEFAULT_ADMIN_HOST.to_string());
    let admin_port = server.admin_port.unwrap_or(DEFAULT_ADMIN_PORT);
    if admin_port == 0 {
        return Err(LoadError::invalid(
            "server.admin_port",
            "must be greater than zero",
        ));
    }

    let admin_addr = parse_socket_addr(&admin_host, admin_port)
        .map_err(|reason| LoadError::invalid("server.admin_addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        admin_addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_mirror_settings(mirror: RawMirrorSettings) -> Result<MirrorSettings, LoadError> {
    let root_path = mirror
        .root_path
        .filter(|path| !path.as_os_str().is_empty());

    let render_base_url = non_blank(mirror.render_base_url)
        .map(|value| parse_http_url(&value, "mirror.render_base_url"))
        .transpose()?;

    let credentials = match (non_blank(mirror.username), mirror.password) {
        (Some(username), Some(password)) if !password.is_empty() => {
            Some(Credentials::new(username, password))
        }
        (None, None) => None,
        (None, Some(password)) if password.is_empty() => None,
        _ => {
            return Err(LoadError::invalid(
                "mirror.username",
                "username and password must be set together",
            ));
        }
    };

    let nocache_label = match mirror.nocache_label {
        Some(label) => {
            let trimmed = label.trim();
            if trimmed.is_empty() {
                return Err(LoadError::invalid(
                    "mirror.nocache_label",
                    "label must not be empty",
                ));
            }
            trimmed.to_string()
        }
        None => DEFAULT_NOCACHE_LABEL.to_string(),
    };

    let timeout_secs = mirror
        .request_timeout_seconds
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "mirror.request_timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(MirrorSettings {
        root_path,
        render_base_url,
        credentials,
        debounce: Duration::from_millis(mirror.debounce_ms.unwrap_or(DEFAULT_DEBOUNCE_MS)),
        nocache_label,
        request_timeout: Duration::from_secs(timeout_secs),
        reconcile_on_startup: mirror.reconcile_on_startup.unwrap_or(true),
    })
}

fn build_content_settings(
    content: RawContentSettings,
    mirror: &MirrorSettings,
) -> Result<ContentSettings, LoadError> {
    let api_url = match non_blank(content.api_url) {
        Some(value) => Some(parse_http_url(&value, "content.api_url")?),
        None => mirror.render_base_url.clone(),
    };

    let page_limit = non_zero_u32(
        content.page_limit.unwrap_or(DEFAULT_PAGE_LIMIT).into(),
        "content.page_limit",
    )?;

    Ok(ContentSettings {
        api_url,
        page_limit,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    admin_host: Option<String>,
    admin_port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawMirrorSettings {
    root_path: Option<PathBuf>,
    render_base_url: Option<String>,
    username: Option<String>,
    password: Option<String>,
    debounce_ms: Option<u64>,
    nocache_label: Option<String>,
    request_timeout_seconds: Option<u64>,
    reconcile_on_startup: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawContentSettings {
    api_url: Option<String>,
    page_limit: Option<u32>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn parse_http_url(value: &str, key: &'static str) -> Result<Url, LoadError> {
    let url = Url::parse(value)
        .map_err(|err| LoadError::invalid(key, format!("invalid URL `{value}`: {err}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(LoadError::invalid(
            key,
            format!("unsupported scheme `{other}`; expected http or https"),
        )),
    }
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
mod tests;
