//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

mod cli;

pub use cli::{CliArgs, Command, SessionArgs, SessionOverrides, WatchArgs};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "dokan";
const ENV_PREFIX: &str = "DOKAN";
const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 300;
const DEFAULT_FRESH_SECS: u64 = 8;
const DEFAULT_STALE_SECS: u64 = 24;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 8;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 3_000;
const DEFAULT_MIN_REFETCH_INTERVAL_MS: u64 = 2_000;
const DEFAULT_SIGNAL_DEBOUNCE_MS: u64 = 5_000;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub auth: AuthSettings,
    pub provider: ProviderSettings,
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

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub cleanup_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub fresh_window: Duration,
    pub stale_window: Duration,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub min_refetch_interval: Duration,
    pub signal_debounce: Duration,
}

#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub url: Option<Url>,
    pub anon_key: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
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
        Some(Command::Whoami(args)) => raw.apply_session_overrides(&args.overrides),
        Some(Command::Watch(args)) => raw.apply_watch_overrides(args),
        None => {}
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    auth: RawAuthSettings,
    provider: RawProviderSettings,
}

impl RawSettings {
    fn apply_session_overrides(&mut self, overrides: &SessionOverrides) {
        if let Some(url) = overrides.auth_url.as_ref() {
            self.provider.url = Some(url.clone());
        }
        if let Some(key) = overrides.anon_key.as_ref() {
            self.provider.anon_key = Some(key.clone());
        }
        if let Some(token) = overrides.access_token.as_ref() {
            self.provider.access_token = Some(token.clone());
        }
        if let Some(token) = overrides.refresh_token.as_ref() {
            self.provider.refresh_token = Some(token.clone());
        }
        if let Some(timeout) = overrides.request_timeout_ms {
            self.auth.request_timeout_ms = Some(timeout);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }

    fn apply_watch_overrides(&mut self, args: &WatchArgs) {
        self.apply_session_overrides(&args.overrides);
        if let Some(seconds) = args.poll_interval_seconds {
            self.auth.poll_interval_seconds = Some(seconds);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            cache,
            auth,
            provider,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            cache: build_cache_settings(cache)?,
            auth: build_auth_settings(auth)?,
            provider: build_provider_settings(provider)?,
        })
    }
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

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let seconds = cache
        .cleanup_interval_seconds
        .unwrap_or(DEFAULT_CLEANUP_INTERVAL_SECS);
    let seconds = non_zero(seconds, "cache.cleanup_interval_seconds")?;
    Ok(CacheSettings {
        cleanup_interval: Duration::from_secs(seconds),
    })
}

fn build_auth_settings(auth: RawAuthSettings) -> Result<AuthSettings, LoadError> {
    let fresh = non_zero(
        auth.fresh_seconds.unwrap_or(DEFAULT_FRESH_SECS),
        "auth.fresh_seconds",
    )?;
    // Without an explicit stale window the cache rule applies: twice the fresh one.
    let stale = match (auth.stale_seconds, auth.fresh_seconds) {
        (Some(stale), _) => stale,
        (None, Some(_)) => fresh.saturating_mul(2),
        (None, None) => DEFAULT_STALE_SECS,
    };
    let stale = non_zero(stale, "auth.stale_seconds")?;
    if stale < fresh {
        return Err(LoadError::invalid(
            "auth.stale_seconds",
            format!("must be at least auth.fresh_seconds ({fresh})"),
        ));
    }

    let poll = non_zero(
        auth.poll_interval_seconds
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
        "auth.poll_interval_seconds",
    )?;
    let timeout = non_zero(
        auth.request_timeout_ms.unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS),
        "auth.request_timeout_ms",
    )?;
    let min_refetch = auth
        .min_refetch_interval_ms
        .unwrap_or(DEFAULT_MIN_REFETCH_INTERVAL_MS);
    let debounce = auth
        .signal_debounce_ms
        .unwrap_or(DEFAULT_SIGNAL_DEBOUNCE_MS);

    Ok(AuthSettings {
        fresh_window: Duration::from_secs(fresh),
        stale_window: Duration::from_secs(stale),
        poll_interval: Duration::from_secs(poll),
        request_timeout: Duration::from_millis(timeout),
        min_refetch_interval: Duration::from_millis(min_refetch),
        signal_debounce: Duration::from_millis(debounce),
    })
}

fn build_provider_settings(provider: RawProviderSettings) -> Result<ProviderSettings, LoadError> {
    let url = match trimmed(provider.url) {
        Some(value) => {
            let parsed = Url::parse(&value)
                .map_err(|err| LoadError::invalid("provider.url", format!("invalid URL: {err}")))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(LoadError::invalid(
                    "provider.url",
                    "scheme must be http or https",
                ));
            }
            Some(parsed)
        }
        None => None,
    };

    Ok(ProviderSettings {
        url,
        anon_key: trimmed(provider.anon_key),
        access_token: trimmed(provider.access_token),
        refresh_token: trimmed(provider.refresh_token),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    cleanup_interval_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawAuthSettings {
    fresh_seconds: Option<u64>,
    stale_seconds: Option<u64>,
    poll_interval_seconds: Option<u64>,
    request_timeout_ms: Option<u64>,
    min_refetch_interval_ms: Option<u64>,
    signal_debounce_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawProviderSettings {
    url: Option<String>,
    anon_key: Option<String>,
    access_token: Option<String>,
    refresh_token: Option<String>,
}

fn trimmed(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn non_zero(value: u64, key: &'static str) -> Result<u64, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(value)
}

#[cfg(test)]
mod tests;
