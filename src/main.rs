use std::{process, sync::Arc};

use dokan::{
    auth::{AuthConfig, AuthConsumer, AuthSnapshot, PollingCoordinator},
    cache::{CacheConfig, TtlCache, spawn_sweeper},
    config::{self, LoadError},
    infra::{error::InfraError, identity::HttpIdentityProvider, telemetry},
};
use thiserror::Error;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[derive(Debug, Error)]
enum AppError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("failed to resolve identity: {0}")]
    Identity(String),
    #[error("failed to render output: {0}")]
    Output(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Whoami(config::SessionArgs::default()));

    telemetry::init(&settings.logging)?;

    let auth_config = AuthConfig::from(&settings.auth);
    let provider = Arc::new(HttpIdentityProvider::from_settings(
        &settings.provider,
        auth_config.request_timeout,
    )?);

    let cache = Arc::new(TtlCache::new());
    let sweeper = spawn_sweeper(Arc::clone(&cache), &CacheConfig::from(&settings.cache));

    let coordinator = PollingCoordinator::new(provider.clone(), provider, cache, auth_config);

    let result = match command {
        config::Command::Whoami(_) => run_whoami(&coordinator).await,
        config::Command::Watch(_) => run_watch(&coordinator).await,
    };

    sweeper.shutdown();
    result
}

async fn run_whoami(coordinator: &Arc<PollingCoordinator>) -> Result<(), AppError> {
    let mut consumer = coordinator.mount();
    let snapshot = consumer.settled().await;

    if let Some(message) = snapshot.error {
        return Err(AppError::Identity(message));
    }

    let Some(user) = snapshot.user.as_ref() else {
        println!("signed out");
        return Ok(());
    };

    let is_admin = coordinator
        .cached_user()
        .is_some_and(|identity| identity.is_admin());
    let output = serde_json::json!({
        "user": user,
        "profile": snapshot.profile,
        "is_admin": is_admin,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn run_watch(coordinator: &Arc<PollingCoordinator>) -> Result<(), AppError> {
    let mut consumer = coordinator.mount();
    log_snapshot(&consumer.settled().await);

    loop {
        tokio::select! {
            snapshot = consumer.changed() => log_snapshot(&snapshot),
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("Interrupt received; unmounting");
                break;
            }
        }
    }

    unmount(consumer);
    Ok(())
}

fn unmount(consumer: AuthConsumer) {
    let coordinator = Arc::clone(consumer.coordinator());
    drop(consumer);
    info!(
        polling = coordinator.is_polling(),
        subscribers = coordinator.subscriber_count(),
        "Consumer unmounted"
    );
}

fn log_snapshot(snapshot: &AuthSnapshot) {
    if let Some(message) = snapshot.error.as_deref() {
        warn!(error = message, "Identity unavailable");
        return;
    }

    match snapshot.user.as_ref() {
        Some(user) => info!(
            user_id = %user.id,
            email = user.email.as_deref().unwrap_or_default(),
            has_profile = snapshot.profile.is_some(),
            is_stale = snapshot.is_stale,
            "Signed in"
        ),
        None if snapshot.loading => info!("Resolving identity"),
        None => info!("Signed out"),
    }
}
