use std::{process, sync::Arc};

use kvgate::{
    application::{
        collections::CollectionRegistry,
        error::AppError,
        store::{StoreHandle, StoreReader},
    },
    config::{self, StoreBackend},
    infra::{error::InfraError, http, memory::MemoryStore, redis_store::RedisStore, telemetry},
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

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
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(config::ServeArgs::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;
    validate_store_settings(&settings.store)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Check => run_check(&settings),
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let store = open_store(&settings.store).await?;

    if settings.collections.is_empty() {
        warn!(
            target = "kvgate::startup",
            "no collections configured; only the health endpoint is served"
        );
    }

    let registry = CollectionRegistry::from_settings(&settings.collections, &store);
    let router = http::build_router(&registry);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "kvgate::startup",
        addr = %settings.server.addr,
        collections = registry.len(),
        "listening"
    );

    let result = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::from(InfraError::from(err)));

    registry.shutdown();
    info!(target = "kvgate::startup", "stopped");

    result
}

fn run_check(settings: &config::Settings) -> Result<(), AppError> {
    for collection in &settings.collections {
        info!(
            target = "kvgate::check",
            uri = %collection.uri,
            prefix = %collection.key_prefix,
            cached = collection.cache.is_some(),
            refresh_interval_ms = collection
                .cache
                .map(|cache| cache.refresh_interval.as_millis() as u64),
            entry_ttl_ms = collection
                .cache
                .map(|cache| cache.entry_ttl.as_millis() as u64),
            "collection"
        );
    }

    info!(
        target = "kvgate::check",
        addr = %settings.server.addr,
        backend = ?settings.store.backend,
        collections = settings.collections.len(),
        "configuration is valid"
    );
    Ok(())
}

fn validate_store_settings(store: &config::StoreSettings) -> Result<(), AppError> {
    if store.seed_file.is_some() && store.backend != StoreBackend::Memory {
        return Err(AppError::validation(
            "store.seed_file is only supported by the memory backend",
        ));
    }
    Ok(())
}

async fn open_store(settings: &config::StoreSettings) -> Result<StoreHandle, AppError> {
    let reader: Arc<dyn StoreReader> = match settings.backend {
        StoreBackend::Redis => {
            Arc::new(RedisStore::connect(&settings.url, settings.scan_count).await?)
        }
        StoreBackend::Memory => {
            let store = MemoryStore::new();
            if let Some(path) = settings.seed_file.as_deref() {
                let loaded = store.load_seed_file(path)?;
                info!(
                    target = "kvgate::startup",
                    path = %path.display(),
                    loaded,
                    "memory store seeded"
                );
            }
            Arc::new(store)
        }
    };

    Ok(StoreHandle::new(
        reader,
        settings.fetch_timeout,
        settings.fetch_concurrency,
    ))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(
            target = "kvgate::startup",
            error = %err,
            "failed to listen for shutdown signal"
        );
        std::future::pending::<()>().await;
    }
    info!(target = "kvgate::startup", "shutdown signal received");
}
