// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use settlement_facilitator::{
    aggregator::{AggregatorError, KyberSwapClient},
    api::router,
    blockchain::{signing::load_signer, ChainError, EvmChainClient, SettlementChain},
    config::{Config, ConfigError, LogFormat},
    ledger::PurchaseLedger,
    lock::ExecutorLock,
    pipeline::SettlementPipeline,
    rate_limit::RateLimiter,
    recovery::RecoverySweeper,
    state::AppState,
    storage::{StorageBackend, StorageError},
    swap::SwapExecutor,
};

const DEFAULT_LOG_FILTER: &str = "info,tower_http=debug";

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    #[error(
        "database {0} is already open in another process; the database backend serves a \
         single process, run multiple instances on the filesystem backend (unset DATABASE_PATH \
         and share the lock directory and purchase log)"
    )]
    DatabaseInUse(PathBuf),

    #[error("chain: {0}")]
    Chain(#[from] ChainError),

    #[error("aggregator: {0}")]
    Aggregator(#[from] AggregatorError),

    #[error("invalid bind address {0}")]
    BindAddress(String),

    #[error("server: {0}")]
    Server(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    let log_format = match LogFormat::from_env() {
        Ok(format) => format,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(log_format);

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Settlement facilitator failed");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init(),
    }
}

async fn run() -> Result<(), StartupError> {
    let config = Config::from_env()?;

    let backend = StorageBackend::select(&config.storage).map_err(|e| {
        match (&config.storage.database_path, e.is_database_in_use()) {
            (Some(path), true) => StartupError::DatabaseInUse(path.clone()),
            _ => StartupError::Storage(e),
        }
    })?;
    let lock = Arc::new(ExecutorLock::new(backend.lock_store(), &config.lock));
    let ledger = PurchaseLedger::new(backend.ledger_store());
    tracing::info!(
        backend = ?backend.kind(),
        lock_key = %lock.lock_key(),
        "Storage backend selected"
    );

    let signer = load_signer(&config.signer)?;
    let chain = EvmChainClient::new(config.chain.clone(), signer)?;
    match chain.verify_chain_id().await {
        Ok(()) => {}
        Err(e @ ChainError::ChainMismatch { .. }) => return Err(e.into()),
        Err(e) => tracing::warn!(error = %e, "Could not verify chain id, continuing"),
    }
    tracing::info!(
        chain = %config.chain.name,
        chain_id = config.chain.chain_id,
        facilitator = %chain.facilitator_address(),
        "Chain client ready"
    );

    let aggregator = KyberSwapClient::new(config.aggregator.clone())?;
    let executor = SwapExecutor::new(Arc::new(chain), Arc::new(aggregator), config.swap.clone());
    let pipeline = Arc::new(SettlementPipeline::new(
        Arc::new(RateLimiter::new(config.rate_limit.clone())),
        lock,
        ledger,
        Arc::new(executor),
        config.stablecoin_decimals,
    ));

    let shutdown = CancellationToken::new();
    let sweeper = config.recovery_interval.map(|interval| {
        tokio::spawn(RecoverySweeper::new(pipeline.clone(), interval).run(shutdown.clone()))
    });

    let app = router(AppState::new(pipeline, config.chain.clone()));
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|_| StartupError::BindAddress(format!("{}:{}", config.host, config.port)))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Settlement facilitator listening (docs at /docs)");

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown signal received");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Some(task) = sweeper {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "Recovery sweeper task failed");
        }
    }
    Ok(())
}
