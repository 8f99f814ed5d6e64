//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    collections::HashSet,
    net::SocketAddr,
    num::NonZeroUsize,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

pub use cli::{CliArgs, Command, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "kvgate";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_STORE_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_FETCH_TIMEOUT_MS: u64 = 2000;
const DEFAULT_FETCH_CONCURRENCY: usize = 16;
const DEFAULT_SCAN_COUNT: usize = 500;
const DEFAULT_REFRESH_INTERVAL_MS: u64 = 1000;
const HEALTH_PATH: &str = "/_health";

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub store: StoreSettings,
    pub collections: Vec<CollectionSettings>,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown backend `{other}` (expected redis or memory)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    pub url: String,
    pub fetch_timeout: Duration,
    pub fetch_concurrency: NonZeroUsize,
    pub scan_count: NonZeroUsize,
    /// JSON object of `key -> value` loaded into the memory backend at startup.
    pub seed_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct CollectionSettings {
    pub uri: String,
    pub key_prefix: String,
    /// `None` serves the collection straight from the store.
    pub cache: Option<CollectionCacheSettings>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionCacheSettings {
    pub refresh_interval: Duration,
    pub entry_ttl: Duration,
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

    builder = builder.add_source(Environment::with_prefix("KVGATE").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Check) | None => {}
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    store: RawStoreSettings,
    collections: Vec<RawCollectionSettings>,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.store_url.as_ref() {
            self.store.url = Some(url.clone());
        }
        if let Some(timeout) = overrides.store_fetch_timeout_ms {
            self.store.fetch_timeout_ms = Some(timeout);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            store,
            collections,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let store = build_store_settings(store)?;
        let collections = build_collection_settings(collections)?;

        Ok(Self {
            server,
            logging,
            store,
            collections,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    Ok(ServerSettings { addr })
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

fn build_store_settings(store: RawStoreSettings) -> Result<StoreSettings, LoadError> {
    let backend = match store.backend {
        Some(value) => StoreBackend::from_str(&value)
            .map_err(|reason| LoadError::invalid("store.backend", reason))?,
        None => StoreBackend::Redis,
    };

    let url = store
        .url
        .and_then(|value| {
            let trimmed = value.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
        .unwrap_or_else(|| DEFAULT_STORE_URL.to_string());

    let fetch_timeout = positive_millis(
        store.fetch_timeout_ms.unwrap_or(DEFAULT_FETCH_TIMEOUT_MS),
        "store.fetch_timeout_ms",
    )?;
    let fetch_concurrency = non_zero_usize(
        store.fetch_concurrency.unwrap_or(DEFAULT_FETCH_CONCURRENCY),
        "store.fetch_concurrency",
    )?;
    let scan_count = non_zero_usize(
        store.scan_count.unwrap_or(DEFAULT_SCAN_COUNT),
        "store.scan_count",
    )?;

    Ok(StoreSettings {
        backend,
        url,
        fetch_timeout,
        fetch_concurrency,
        scan_count,
        seed_file: store.seed_file,
    })
}

fn build_collection_settings(
    collections: Vec<RawCollectionSettings>,
) -> Result<Vec<CollectionSettings>, LoadError> {
    let mut uris = HashSet::new();
    let mut prefixes = HashSet::new();
    let mut resolved = Vec::with_capacity(collections.len());

    for (index, raw) in collections.into_iter().enumerate() {
        let uri = raw.uri.ok_or_else(|| {
            LoadError::invalid("collections.uri", format!("entry {index} is missing a uri"))
        })?;
        validate_uri(&uri).map_err(|reason| {
            LoadError::invalid("collections.uri", format!("`{uri}`: {reason}"))
        })?;
        if !uris.insert(uri.clone()) {
            return Err(LoadError::invalid(
                "collections.uri",
                format!("`{uri}` is configured more than once"),
            ));
        }

        let key_prefix = raw.key_prefix.unwrap_or_default();
        if key_prefix.is_empty() {
            return Err(LoadError::invalid(
                "collections.key_prefix",
                format!("collection `{uri}` needs a non-empty key prefix"),
            ));
        }
        if !prefixes.insert(key_prefix.clone()) {
            return Err(LoadError::invalid(
                "collections.key_prefix",
                format!("`{key_prefix}` is configured more than once"),
            ));
        }

        let cache = build_cache_settings(raw.cache)?;

        resolved.push(CollectionSettings {
            uri,
            key_prefix,
            cache,
        });
    }

    Ok(resolved)
}

fn build_cache_settings(
    cache: RawCollectionCacheSettings,
) -> Result<Option<CollectionCacheSettings>, LoadError> {
    if !cache.enabled.unwrap_or(false) {
        return Ok(None);
    }

    let refresh_interval = positive_millis(
        cache
            .refresh_interval_ms
            .unwrap_or(DEFAULT_REFRESH_INTERVAL_MS),
        "collections.cache.refresh_interval_ms",
    )?;
    let entry_ttl = match cache.entry_ttl_ms {
        Some(ms) => positive_millis(ms, "collections.cache.entry_ttl_ms")?,
        None => refresh_interval * 2,
    };

    Ok(Some(CollectionCacheSettings {
        refresh_interval,
        entry_ttl,
    }))
}

fn validate_uri(uri: &str) -> Result<(), &'static str> {
    if !uri.starts_with('/') {
        return Err("must start with `/`");
    }
    if uri.ends_with('/') {
        return Err("must not end with `/`");
    }
    if uri == HEALTH_PATH {
        return Err("collides with the health endpoint");
    }
    if uri.contains(['{', '}']) {
        return Err("must not contain `{` or `}`");
    }
    if uri[1..]
        .split('/')
        .any(|segment| segment.is_empty() || segment.starts_with([':', '*']))
    {
        return Err("segments must be non-empty and must not start with `:` or `*`");
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStoreSettings {
    backend: Option<String>,
    url: Option<String>,
    fetch_timeout_ms: Option<u64>,
    fetch_concurrency: Option<usize>,
    scan_count: Option<usize>,
    seed_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCollectionSettings {
    uri: Option<String>,
    key_prefix: Option<String>,
    cache: RawCollectionCacheSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCollectionCacheSettings {
    enabled: Option<bool>,
    refresh_interval_ms: Option<u64>,
    entry_ttl_ms: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn positive_millis(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_millis(value))
}

fn non_zero_usize(value: usize, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
