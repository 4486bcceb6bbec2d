use std::path::PathBuf;
use std::time::Duration;

use archive_worker::{ArchiveWorkerConfig, ArchiveWriterConfig, QueueConsumerConfig};
use common::{DEFAULT_QUEUE_CAPACITY, PostgresConfig};
use config::{Config, ConfigError, Environment};
use ingestion_service::{BatchAccumulatorConfig, IngestionConfig, TapGeneratorConfig};
use serde::{Deserialize, Serialize};

/// Broker implementation behind both pipelines
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    Postgres,
    Memory,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// JSON log lines; disable for human-readable output
    #[serde(default = "default_true")]
    pub log_json: bool,

    #[serde(default = "default_broker")]
    pub broker: BrokerKind,

    // PostgreSQL configuration
    #[serde(default = "default_postgres_host")]
    pub postgres_host: String,

    #[serde(default = "default_postgres_port")]
    pub postgres_port: u16,

    #[serde(default = "default_postgres_database")]
    pub postgres_database: String,

    #[serde(default = "default_postgres_username")]
    pub postgres_username: String,

    #[serde(default = "default_postgres_password")]
    pub postgres_password: String,

    #[serde(default = "default_postgres_max_pool_size")]
    pub postgres_max_pool_size: usize,

    // Queue configuration
    /// Name of the broker queue shared by both pipelines
    #[serde(default = "default_queue_name")]
    pub queue_name: String,

    /// Most events per published or dequeued batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Ingestion queue capacity before producers wait
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Connection attempts at startup
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay between startup connection attempts and after a failed publish
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_poll_delay_ms")]
    pub poll_delay_ms: u64,

    #[serde(default = "default_fault_backoff_ms")]
    pub fault_backoff_ms: u64,

    /// Budget for the final flush on shutdown
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Startup timeout for broker initialization in seconds
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    // Archive configuration
    #[serde(default = "default_output_path")]
    pub output_path: String,

    /// Advisory size in bytes; exceeding it only logs a warning
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Reserved; archives are always written uncompressed
    #[serde(default)]
    pub compression: bool,

    // Process selection
    #[serde(default = "default_true")]
    pub run_ingestion: bool,

    #[serde(default = "default_true")]
    pub run_archival: bool,

    /// Feed synthetic taps into the ingestion pipeline
    #[serde(default = "default_true")]
    pub demo_enabled: bool,

    #[serde(default = "default_demo_interval_ms")]
    pub demo_interval_ms: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_broker() -> BrokerKind {
    BrokerKind::Postgres
}

// PostgreSQL defaults
fn default_postgres_host() -> String {
    "localhost".to_string()
}

fn default_postgres_port() -> u16 {
    5432
}

fn default_postgres_database() -> String {
    "tapline".to_string()
}

fn default_postgres_username() -> String {
    "tapline".to_string()
}

fn default_postgres_password() -> String {
    "tapline".to_string()
}

fn default_postgres_max_pool_size() -> usize {
    5
}

// Queue defaults
fn default_queue_name() -> String {
    "TAP_QUEUE".to_string()
}

fn default_batch_size() -> usize {
    1000
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    100
}

fn default_poll_delay_ms() -> u64 {
    100
}

fn default_fault_backoff_ms() -> u64 {
    1000
}

fn default_shutdown_timeout_secs() -> u64 {
    5
}

fn default_startup_timeout_secs() -> u64 {
    30
}

// Archive defaults
fn default_output_path() -> String {
    "output/taps.dat".to_string()
}

fn default_max_file_size() -> u64 {
    100 * 1024 * 1024
}

fn default_demo_interval_ms() -> u64 {
    1000
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("TAPLINE"))
            .build()?
            .try_deserialize()
    }

    /// Reject settings the pipelines cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Message("batch_size must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Message(
                "queue_capacity must be at least 1".into(),
            ));
        }
        if self.queue_name.trim().is_empty() {
            return Err(ConfigError::Message("queue_name must not be empty".into()));
        }
        if self.output_path.trim().is_empty() {
            return Err(ConfigError::Message("output_path must not be empty".into()));
        }
        Ok(())
    }

    pub fn postgres_config(&self) -> PostgresConfig {
        PostgresConfig {
            host: self.postgres_host.clone(),
            port: self.postgres_port,
            database: self.postgres_database.clone(),
            username: self.postgres_username.clone(),
            password: self.postgres_password.clone(),
            max_pool_size: self.postgres_max_pool_size,
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn ingestion_config(&self) -> IngestionConfig {
        IngestionConfig {
            queue_capacity: self.queue_capacity,
            accumulator: BatchAccumulatorConfig {
                batch_size: self.batch_size,
                backoff: self.retry_delay(),
            },
            shutdown_budget: self.shutdown_timeout(),
        }
    }

    pub fn archive_worker_config(&self) -> ArchiveWorkerConfig {
        ArchiveWorkerConfig {
            consumer: QueueConsumerConfig {
                batch_size: self.batch_size,
                poll_delay: Duration::from_millis(self.poll_delay_ms),
                fault_backoff: Duration::from_millis(self.fault_backoff_ms),
            },
            writer: ArchiveWriterConfig {
                output_path: PathBuf::from(&self.output_path),
                max_file_size: self.max_file_size,
                compression: self.compression,
                ..Default::default()
            },
        }
    }

    pub fn tap_generator_config(&self) -> TapGeneratorConfig {
        TapGeneratorConfig {
            interval: Duration::from_millis(self.demo_interval_ms),
            ..Default::default()
        }
    }
}
