use super::*;

#[test]
fn defaults_match_polling_constants() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.auth.fresh_window, Duration::from_secs(8));
    assert_eq!(settings.auth.stale_window, Duration::from_secs(24));
    assert_eq!(settings.auth.poll_interval, Duration::from_secs(8));
    assert_eq!(settings.auth.request_timeout, Duration::from_secs(3));
    assert_eq!(settings.auth.min_refetch_interval, Duration::from_secs(2));
    assert_eq!(settings.auth.signal_debounce, Duration::from_secs(5));
    assert_eq!(settings.cache.cleanup_interval, Duration::from_secs(300));
    assert_eq!(settings.logging.level, LevelFilter::INFO);
    assert!(matches!(settings.logging.format, LogFormat::Compact));
    assert!(settings.provider.url.is_none());
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.provider.url = Some("https://file.example".to_string());
    raw.logging.level = Some("info".to_string());

    let overrides = SessionOverrides {
        auth_url: Some("https://cli.example".to_string()),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    raw.apply_session_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    let url = settings.provider.url.expect("url");
    assert_eq!(url.host_str(), Some("cli.example"));
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = SessionOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_session_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn stale_window_follows_fresh_window_when_unset() {
    let mut raw = RawSettings::default();
    raw.auth.fresh_seconds = Some(10);

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.auth.stale_window, Duration::from_secs(20));
}

#[test]
fn stale_window_shorter_than_fresh_is_rejected() {
    let mut raw = RawSettings::default();
    raw.auth.fresh_seconds = Some(10);
    raw.auth.stale_seconds = Some(5);

    let err = Settings::from_raw(raw).expect_err("stale < fresh");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "auth.stale_seconds",
            ..
        }
    ));
}

#[test]
fn zero_poll_interval_is_rejected() {
    let mut raw = RawSettings::default();
    raw.auth.poll_interval_seconds = Some(0);

    let err = Settings::from_raw(raw).expect_err("zero poll interval");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "auth.poll_interval_seconds",
            ..
        }
    ));
}

#[test]
fn zero_debounce_is_allowed() {
    let mut raw = RawSettings::default();
    raw.auth.signal_debounce_ms = Some(0);
    raw.auth.min_refetch_interval_ms = Some(0);

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.auth.signal_debounce, Duration::ZERO);
    assert_eq!(settings.auth.min_refetch_interval, Duration::ZERO);
}

#[test]
fn provider_url_must_be_http() {
    let mut raw = RawSettings::default();
    raw.provider.url = Some("ftp://auth.example".to_string());

    let err = Settings::from_raw(raw).expect_err("ftp scheme");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "provider.url",
            ..
        }
    ));
}

#[test]
fn blank_tokens_are_treated_as_absent() {
    let mut raw = RawSettings::default();
    raw.provider.access_token = Some("   ".to_string());
    raw.provider.anon_key = Some(" anon ".to_string());

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(settings.provider.access_token.is_none());
    assert_eq!(settings.provider.anon_key.as_deref(), Some("anon"));
}

#[test]
fn invalid_log_level_is_reported() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("chatty".to_string());

    let err = Settings::from_raw(raw).expect_err("bad level");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "logging.level",
            ..
        }
    ));
}

#[test]
fn watch_overrides_poll_interval() {
    let args = CliArgs::parse_from([
        "dokan",
        "watch",
        "--auth-poll-interval-seconds",
        "15",
        "--access-token",
        "token-a",
    ]);

    let mut raw = RawSettings::default();
    match args.command.expect("watch command") {
        Command::Watch(watch) => raw.apply_watch_overrides(&watch),
        other => panic!("unexpected command: {other:?}"),
    }
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.auth.poll_interval, Duration::from_secs(15));
    assert_eq!(settings.provider.access_token.as_deref(), Some("token-a"));
}

#[test]
fn parse_whoami_arguments() {
    let args = CliArgs::parse_from([
        "dokan",
        "--config-file",
        "custom.toml",
        "whoami",
        "--auth-url",
        "https://auth.example",
        "--log-json",
        "true",
    ]);

    assert_eq!(
        args.config_file.as_deref(),
        Some(std::path::Path::new("custom.toml"))
    );
    match args.command.expect("whoami command") {
        Command::Whoami(whoami) => {
            assert_eq!(
                whoami.overrides.auth_url.as_deref(),
                Some("https://auth.example")
            );
            assert_eq!(whoami.overrides.log_json, Some(true));
        }
        other => panic!("unexpected command: {other:?}"),
    }
}
