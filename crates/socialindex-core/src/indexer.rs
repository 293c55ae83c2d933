//! Indexer configuration and the fluent builder.
//!
//! # Example
//!
//! ```rust,no_run
//! use socialindex_core::IndexerBuilder;
//!
//! let config = IndexerBuilder::new()
//!     .database_url("postgres://localhost/socialindex")
//!     .retry_interval_ms(500)
//!     .skip_errored_blocks(false)
//!     .log_level("debug")
//!     .build_config();
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::consumer::Consumer;
use crate::error::IndexerError;
use crate::gate::HeightGate;
use crate::handler::HandlerRegistry;
use crate::logging::LogConfig;
use crate::source::{BlockSource, FetchOptions};

/// Connection pool tuning for the Postgres backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostgresOptions {
    /// Maximum number of connections in the pool (default: 10)
    pub max_connections: u32,
    /// Minimum number of idle connections to keep open (default: 1)
    pub min_connections: u32,
    /// Connection timeout in seconds (default: 30)
    pub connect_timeout_secs: u64,
}

impl Default for PostgresOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            connect_timeout_secs: 30,
        }
    }
}

/// Configuration for an indexer process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Postgres connection string. `None` means the caller supplies storage.
    pub database_url: Option<String>,
    pub postgres: PostgresOptions,
    /// Delay before redelivering a failed block (milliseconds).
    pub retry_interval_ms: u64,
    /// Poll interval once caught up with the source (milliseconds).
    pub retry_last_block_interval_ms: u64,
    /// Move past blocks whose handler failed instead of retrying them.
    /// Breaks exactly-once semantics; meant for manual recovery only.
    pub skip_errored_blocks: bool,
    pub log: LogConfig,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            postgres: PostgresOptions::default(),
            retry_interval_ms: 1000,
            retry_last_block_interval_ms: 1000,
            skip_errored_blocks: false,
            log: LogConfig::default(),
        }
    }
}

impl IndexerConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, IndexerError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| IndexerError::Other(format!("read config {}: {e}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| IndexerError::Other(format!("parse config {}: {e}", path.display())))
    }

    /// Delivery policy derived from this config.
    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            retry_interval: Duration::from_millis(self.retry_interval_ms),
            retry_last_block_interval: Duration::from_millis(self.retry_last_block_interval_ms),
            skip_errored_blocks: self.skip_errored_blocks,
            on_error: None,
        }
    }
}

/// Fluent builder for [`IndexerConfig`] and [`Consumer`].
#[derive(Default)]
pub struct IndexerBuilder {
    config: IndexerConfig,
    registry: Option<HandlerRegistry>,
}

impl IndexerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing config (e.g. one loaded from a file).
    pub fn from_config(config: IndexerConfig) -> Self {
        Self {
            config,
            registry: None,
        }
    }

    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.config.database_url = Some(url.into());
        self
    }

    pub fn postgres_options(mut self, opts: PostgresOptions) -> Self {
        self.config.postgres = opts;
        self
    }

    pub fn retry_interval_ms(mut self, ms: u64) -> Self {
        self.config.retry_interval_ms = ms;
        self
    }

    pub fn retry_last_block_interval_ms(mut self, ms: u64) -> Self {
        self.config.retry_last_block_interval_ms = ms;
        self
    }

    pub fn skip_errored_blocks(mut self, skip: bool) -> Self {
        self.config.skip_errored_blocks = skip;
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.log.level = level.into();
        self
    }

    pub fn json_logs(mut self, json: bool) -> Self {
        self.config.log.json = json;
        self
    }

    /// Use a custom handler table instead of [`HandlerRegistry::standard`].
    pub fn registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build_config(self) -> IndexerConfig {
        self.config
    }

    /// Build a consumer that applies blocks from `source` through `gate`.
    pub fn build(self, gate: Arc<dyn HeightGate>, source: Arc<dyn BlockSource>) -> Consumer {
        let options = self.config.fetch_options().with_error_hook(|height, err| {
            tracing::error!(height, error = %err, "failed to process block");
        });
        let registry = self.registry.unwrap_or_else(HandlerRegistry::standard);
        Consumer::new(gate, source, registry, options)
    }
}
