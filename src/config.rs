// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Environment variable names, defaults, and the typed [`Config`] assembled
//! from them at startup. Nothing is read from the command line.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |
//! | `DATABASE_PATH` | redb file; presence selects the database backend | unset |
//! | `X402_LOCK_DIR` | Lock directory root (falls back to `TMPDIR`) | `/tmp` |
//! | `PURCHASE_LOG_PATH` | NDJSON purchase ledger | `./data/purchase_log.ndjson` |
//! | `EXECUTOR_LOCK_KEY` | Lock key guarding the pipeline | `settlement_executor` |
//! | `EXECUTOR_LOCK_TIMEOUT_MS` | Stale-lock timeout | `60000` |
//! | `LOCK_SECRET` | Shared HMAC secret for lock records | random per process |
//! | `RPC_URL` | EVM JSON-RPC endpoint | Base mainnet |
//! | `CHAIN_ID` | EVM chain id | `8453` |
//! | `EXPLORER_URL` | Block explorer base URL | `https://basescan.org` |
//! | `FACILITATOR_PRIVATE_KEY` | Facilitator key (hex) | required unless PEM set |
//! | `FACILITATOR_PRIVATE_KEY_PEM` | Path to a PEM facilitator key | unset |
//! | `STABLECOIN_ADDRESS` | Input token | Base USDC |
//! | `STABLECOIN_DECIMALS` | Input token decimals | `6` |
//! | `REWARD_TOKEN_ADDRESS` | Output token | required |
//! | `AGGREGATOR_HOST` | Aggregator API host | `https://aggregator-api.kyberswap.com` |
//! | `AGGREGATOR_CHAIN` | Aggregator chain slug | `base` |
//! | `AGGREGATOR_ROUTER` | Router that receives the approval | KyberSwap meta router |
//! | `AGGREGATOR_CLIENT_ID` | `X-Client-Id` header value | `settlement-facilitator` |
//! | `SWAP_SLIPPAGE_BPS` | Slippage tolerance (max 500) | `50` |
//! | `SWAP_DEADLINE_SECS` | Swap deadline | `1200` |
//! | `RATE_LIMIT_WINDOW_MS` | Rate-limit window | `60000` |
//! | `RATE_LIMIT_MAX_WALLET` | Requests per wallet per window | `10` |
//! | `RATE_LIMIT_MAX_IP` | Requests per IP per window | `50` |
//! | `RATE_LIMIT_CLEANUP_MS` | Expired-entry sweep interval | `300000` |
//! | `RECOVERY_SWEEP_INTERVAL_SECS` | Enables the recovery sweeper | unset |

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::Address;

use crate::aggregator::AggregatorConfig;
use crate::blockchain::ChainConfig;
use crate::lock::LockConfig;
use crate::rate_limit::RateLimitConfig;
use crate::storage::StorageConfig;
use crate::swap::{SwapConfig, MAX_SLIPPAGE_BPS};

pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const DATABASE_PATH_ENV: &str = "DATABASE_PATH";
pub const LOCK_DIR_ENV: &str = "X402_LOCK_DIR";
pub const PURCHASE_LOG_PATH_ENV: &str = "PURCHASE_LOG_PATH";

pub const LOCK_KEY_ENV: &str = "EXECUTOR_LOCK_KEY";
pub const LOCK_TIMEOUT_ENV: &str = "EXECUTOR_LOCK_TIMEOUT_MS";
pub const LOCK_SECRET_ENV: &str = "LOCK_SECRET";

pub const RPC_URL_ENV: &str = "RPC_URL";
pub const CHAIN_ID_ENV: &str = "CHAIN_ID";
pub const EXPLORER_URL_ENV: &str = "EXPLORER_URL";
pub const PRIVATE_KEY_ENV: &str = "FACILITATOR_PRIVATE_KEY";
pub const PRIVATE_KEY_PEM_ENV: &str = "FACILITATOR_PRIVATE_KEY_PEM";
pub const STABLECOIN_ADDRESS_ENV: &str = "STABLECOIN_ADDRESS";
pub const STABLECOIN_DECIMALS_ENV: &str = "STABLECOIN_DECIMALS";
pub const REWARD_TOKEN_ADDRESS_ENV: &str = "REWARD_TOKEN_ADDRESS";

pub const AGGREGATOR_HOST_ENV: &str = "AGGREGATOR_HOST";
pub const AGGREGATOR_CHAIN_ENV: &str = "AGGREGATOR_CHAIN";
pub const AGGREGATOR_ROUTER_ENV: &str = "AGGREGATOR_ROUTER";
pub const AGGREGATOR_CLIENT_ID_ENV: &str = "AGGREGATOR_CLIENT_ID";
pub const SLIPPAGE_BPS_ENV: &str = "SWAP_SLIPPAGE_BPS";
pub const DEADLINE_SECS_ENV: &str = "SWAP_DEADLINE_SECS";

pub const RATE_LIMIT_WINDOW_ENV: &str = "RATE_LIMIT_WINDOW_MS";
pub const RATE_LIMIT_MAX_WALLET_ENV: &str = "RATE_LIMIT_MAX_WALLET";
pub const RATE_LIMIT_MAX_IP_ENV: &str = "RATE_LIMIT_MAX_IP";
pub const RATE_LIMIT_CLEANUP_ENV: &str = "RATE_LIMIT_CLEANUP_MS";

pub const RECOVERY_INTERVAL_ENV: &str = "RECOVERY_SWEEP_INTERVAL_SECS";

const DEFAULT_PURCHASE_LOG_PATH: &str = "./data/purchase_log.ndjson";
const DEFAULT_LOCK_DIR: &str = "/tmp";

/// Errors raised while assembling [`Config`] from the environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    /// Read `LOG_FORMAT` alone, so logging can start before the rest of the
    /// configuration is parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        match env_or_default(LOG_FORMAT_ENV, "pretty").to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            other => Err(ConfigError::Invalid {
                name: LOG_FORMAT_ENV,
                reason: format!("expected `json` or `pretty`, got `{other}`"),
            }),
        }
    }
}

/// Where the facilitator signing key comes from.
#[derive(Clone)]
pub enum SignerSource {
    /// Raw hex private key (with or without `0x`).
    Hex(String),
    /// Path to a SEC1 or PKCS#8 PEM file.
    PemFile(PathBuf),
}

impl fmt::Debug for SignerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignerSource::Hex(_) => f.write_str("SignerSource::Hex(<redacted>)"),
            SignerSource::PemFile(path) => write!(f, "SignerSource::PemFile({})", path.display()),
        }
    }
}

/// Fully resolved service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_format: LogFormat,
    pub storage: StorageConfig,
    pub lock: LockConfig,
    pub rate_limit: RateLimitConfig,
    pub chain: ChainConfig,
    pub signer: SignerSource,
    pub stablecoin_decimals: u8,
    pub aggregator: AggregatorConfig,
    pub swap: SwapConfig,
    /// `None` disables the background recovery sweeper.
    pub recovery_interval: Option<Duration>,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let log_format = LogFormat::from_env()?;

        let lock_dir = env_optional(LOCK_DIR_ENV)
            .or_else(|| env_optional("TMPDIR"))
            .unwrap_or_else(|| DEFAULT_LOCK_DIR.to_string());

        let storage = StorageConfig {
            database_path: env_optional(DATABASE_PATH_ENV).map(PathBuf::from),
            lock_dir: PathBuf::from(lock_dir),
            purchase_log: PathBuf::from(env_or_default(
                PURCHASE_LOG_PATH_ENV,
                DEFAULT_PURCHASE_LOG_PATH,
            )),
        };

        let lock_defaults = LockConfig::default();
        let lock = LockConfig {
            lock_key: env_or_default(LOCK_KEY_ENV, &lock_defaults.lock_key),
            timeout: Duration::from_millis(parse_env(
                LOCK_TIMEOUT_ENV,
                lock_defaults.timeout.as_millis() as u64,
            )?),
            secret: match env_optional(LOCK_SECRET_ENV) {
                Some(secret) => secret,
                None => {
                    tracing::warn!(
                        "{LOCK_SECRET_ENV} is not set; using a random per-process secret, \
                         lock records written by other instances will be treated as forged"
                    );
                    random_secret()
                }
            },
        };

        let limiter_defaults = RateLimitConfig::default();
        let rate_limit = RateLimitConfig {
            window: Duration::from_millis(parse_env(
                RATE_LIMIT_WINDOW_ENV,
                limiter_defaults.window.as_millis() as u64,
            )?),
            max_wallet_requests: require_positive(
                RATE_LIMIT_MAX_WALLET_ENV,
                parse_env(RATE_LIMIT_MAX_WALLET_ENV, limiter_defaults.max_wallet_requests)?,
            )?,
            max_ip_requests: require_positive(
                RATE_LIMIT_MAX_IP_ENV,
                parse_env(RATE_LIMIT_MAX_IP_ENV, limiter_defaults.max_ip_requests)?,
            )?,
            cleanup_interval: Duration::from_millis(parse_env(
                RATE_LIMIT_CLEANUP_ENV,
                limiter_defaults.cleanup_interval.as_millis() as u64,
            )?),
        };

        let chain_defaults = ChainConfig::default();
        let chain = ChainConfig {
            name: chain_defaults.name,
            chain_id: parse_env(CHAIN_ID_ENV, chain_defaults.chain_id)?,
            rpc_url: env_or_default(RPC_URL_ENV, &chain_defaults.rpc_url),
            explorer_url: env_or_default(EXPLORER_URL_ENV, &chain_defaults.explorer_url),
        };

        let signer = match (env_optional(PRIVATE_KEY_ENV), env_optional(PRIVATE_KEY_PEM_ENV)) {
            (Some(hex), _) => SignerSource::Hex(hex),
            (None, Some(path)) => SignerSource::PemFile(PathBuf::from(path)),
            (None, None) => return Err(ConfigError::Missing(PRIVATE_KEY_ENV)),
        };

        let aggregator_defaults = AggregatorConfig::default();
        let aggregator = AggregatorConfig {
            host: env_or_default(AGGREGATOR_HOST_ENV, &aggregator_defaults.host),
            chain: env_or_default(AGGREGATOR_CHAIN_ENV, &aggregator_defaults.chain),
            client_id: env_or_default(AGGREGATOR_CLIENT_ID_ENV, &aggregator_defaults.client_id),
            timeout: aggregator_defaults.timeout,
        };

        let slippage_bps: u16 = parse_env(SLIPPAGE_BPS_ENV, SwapConfig::DEFAULT_SLIPPAGE_BPS)?;
        if slippage_bps > MAX_SLIPPAGE_BPS {
            return Err(ConfigError::Invalid {
                name: SLIPPAGE_BPS_ENV,
                reason: format!("{slippage_bps} exceeds the maximum of {MAX_SLIPPAGE_BPS} bps"),
            });
        }

        let swap = SwapConfig {
            stablecoin: parse_address(STABLECOIN_ADDRESS_ENV, Some(SwapConfig::BASE_USDC))?,
            reward_token: parse_address(REWARD_TOKEN_ADDRESS_ENV, None)?,
            router: parse_address(AGGREGATOR_ROUTER_ENV, Some(SwapConfig::DEFAULT_ROUTER))?,
            slippage_bps,
            deadline: Duration::from_secs(parse_env(
                DEADLINE_SECS_ENV,
                SwapConfig::DEFAULT_DEADLINE.as_secs(),
            )?),
        };

        let recovery_interval =
            parse_recovery_interval(env_optional(RECOVERY_INTERVAL_ENV).as_deref())?;

        Ok(Self {
            host: env_or_default(HOST_ENV, "0.0.0.0"),
            port: parse_env(PORT_ENV, 8080)?,
            log_format,
            storage,
            lock,
            rate_limit,
            chain,
            signer,
            stablecoin_decimals: parse_env(STABLECOIN_DECIMALS_ENV, 6)?,
            aggregator,
            swap,
            recovery_interval,
        })
    }
}

fn env_optional(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    env_optional(name).unwrap_or_else(|| default.to_string())
}

fn parse_env<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env_optional(name) {
        Some(raw) => parse_value(name, &raw),
        None => Ok(default),
    }
}

fn parse_value<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })
}

/// Zero is rejected where it would disable a limit or spin a loop.
fn require_positive<T>(name: &'static str, value: T) -> Result<T, ConfigError>
where
    T: PartialEq + Default,
{
    if value == T::default() {
        return Err(ConfigError::Invalid {
            name,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

fn parse_recovery_interval(raw: Option<&str>) -> Result<Option<Duration>, ConfigError> {
    raw.map(|raw| -> Result<Duration, ConfigError> {
        let secs = parse_value(RECOVERY_INTERVAL_ENV, raw)?;
        Ok(Duration::from_secs(require_positive(RECOVERY_INTERVAL_ENV, secs)?))
    })
    .transpose()
}

fn parse_address(name: &'static str, default: Option<&str>) -> Result<Address, ConfigError> {
    let raw = match (env_optional(name), default) {
        (Some(raw), _) => raw,
        (None, Some(default)) => default.to_string(),
        (None, None) => return Err(ConfigError::Missing(name)),
    };
    Address::from_str(&raw).map_err(|e| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })
}

/// 64 hex characters of OS randomness.
fn random_secret() -> String {
    format!(
        "{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    )
}
