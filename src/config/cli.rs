use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the Dokan session tools.
#[derive(Debug, Parser)]
#[command(name = "dokan", version, about = "Dokan storefront session tools")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "DOKAN_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Resolve the signed-in identity once and print it.
    Whoami(SessionArgs),
    /// Keep a consumer mounted and log identity changes until interrupted.
    Watch(WatchArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct SessionArgs {
    #[command(flatten)]
    pub overrides: SessionOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct WatchArgs {
    #[command(flatten)]
    pub overrides: SessionOverrides,

    /// Override the shared polling period.
    #[arg(long = "auth-poll-interval-seconds", value_name = "SECONDS")]
    pub poll_interval_seconds: Option<u64>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct SessionOverrides {
    /// Override the auth platform base URL.
    #[arg(long = "auth-url", value_name = "URL")]
    pub auth_url: Option<String>,

    /// Override the public (anon) API key.
    #[arg(long = "anon-key", value_name = "KEY")]
    pub anon_key: Option<String>,

    /// Access token of the session to inspect.
    #[arg(long = "access-token", env = "DOKAN_ACCESS_TOKEN", value_name = "TOKEN")]
    pub access_token: Option<String>,

    /// Refresh token of the session to inspect.
    #[arg(long = "refresh-token", env = "DOKAN_REFRESH_TOKEN", value_name = "TOKEN")]
    pub refresh_token: Option<String>,

    /// Override the identity call timeout.
    #[arg(long = "auth-request-timeout-ms", value_name = "MILLIS")]
    pub request_timeout_ms: Option<u64>,

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
