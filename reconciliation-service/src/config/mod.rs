//! Configuration module for reconciliation-service.

use crate::engine::{EngineLimits, SearchLimits};
use crate::workers::ResultRetention;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ReconciliationConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub store: StoreBackend,
    pub database: Option<DatabaseConfig>,
    pub worker: WorkerConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(format!("Invalid store backend: {}", s)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_count: usize,
    pub queue_size: usize,
    /// Targets per blocking batch; cancellation is observed between batches.
    pub batch_size: usize,
    pub default_soft_time_limit_seconds: u64,
    /// Finished task suggestions kept per tenant.
    pub result_retention_per_tenant: usize,
    pub result_ttl_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let retention = ResultRetention::default();
        Self {
            worker_count: 4,
            queue_size: 100,
            batch_size: 64,
            default_soft_time_limit_seconds: 600,
            result_retention_per_tenant: retention.per_tenant,
            result_ttl_seconds: retention.ttl.as_secs(),
        }
    }
}

impl WorkerConfig {
    pub fn result_retention(&self) -> ResultRetention {
        ResultRetention {
            per_tenant: self.result_retention_per_tenant,
            ttl: Duration::from_secs(self.result_ttl_seconds),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub auto_match_threshold: f64,
    pub max_candidates_per_target: usize,
    pub neighbour_limit: usize,
    /// Number of recent matches consulted for `create_new` evidence.
    pub history_limit: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let search = SearchLimits::default();
        Self {
            auto_match_threshold: 1.0 - f64::EPSILON,
            max_candidates_per_target: search.max_candidates_per_target,
            neighbour_limit: search.neighbour_limit,
            history_limit: 500,
        }
    }
}

impl EngineConfig {
    pub fn limits(&self) -> EngineLimits {
        let defaults = EngineLimits::default();
        EngineLimits {
            search: SearchLimits {
                max_candidates_per_target: self.max_candidates_per_target,
                neighbour_limit: self.neighbour_limit,
                ..defaults.search
            },
            ..defaults
        }
    }
}

impl ReconciliationConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;

        let store: StoreBackend = env::var("STORE_BACKEND")
            .unwrap_or_else(|_| "postgres".to_string())
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let database = match store {
            StoreBackend::Postgres => Some(DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", 2)?,
            }),
            StoreBackend::Memory => None,
        };

        let worker_defaults = WorkerConfig::default();
        let worker = WorkerConfig {
            worker_count: parse_env("WORKER_COUNT", worker_defaults.worker_count)?.max(1),
            queue_size: parse_env("WORKER_QUEUE_SIZE", worker_defaults.queue_size)?.max(1),
            batch_size: parse_env("WORKER_BATCH_SIZE", worker_defaults.batch_size)?.max(1),
            default_soft_time_limit_seconds: parse_env(
                "DEFAULT_SOFT_TIME_LIMIT_SECONDS",
                worker_defaults.default_soft_time_limit_seconds,
            )?,
            result_retention_per_tenant: parse_env(
                "RESULT_RETENTION_PER_TENANT",
                worker_defaults.result_retention_per_tenant,
            )?
            .max(1),
            result_ttl_seconds: parse_env(
                "RESULT_TTL_SECONDS",
                worker_defaults.result_ttl_seconds,
            )?,
        };

        let engine_defaults = EngineConfig::default();
        let engine = EngineConfig {
            auto_match_threshold: parse_env(
                "AUTO_MATCH_THRESHOLD",
                engine_defaults.auto_match_threshold,
            )?,
            max_candidates_per_target: parse_env(
                "MAX_CANDIDATES_PER_TARGET",
                engine_defaults.max_candidates_per_target,
            )?,
            neighbour_limit: parse_env("NEIGHBOUR_LIMIT", engine_defaults.neighbour_limit)?,
            history_limit: parse_env("HISTORY_LIMIT", engine_defaults.history_limit)?,
        };
        if !(0.0..=1.0).contains(&engine.auto_match_threshold) {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "AUTO_MATCH_THRESHOLD must be within [0, 1]"
            )));
        }

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "reconciliation-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            store,
            database,
            worker,
            engine,
        })
    }

    /// In-memory configuration for tests.
    pub fn for_memory() -> Self {
        Self {
            common: core_config::Config::default(),
            service_name: "reconciliation-service".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            log_level: "info".to_string(),
            otlp_endpoint: None,
            store: StoreBackend::Memory,
            database: None,
            worker: WorkerConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

/// Reads an optional variable; a present but unparsable value is a config error.
fn parse_env<T: FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| {
            AppError::ConfigError(anyhow::anyhow!("{} has an invalid value: {}", key, raw))
        }),
        Err(_) => Ok(default),
    }
}
