//! seal-runner Library
//!
//! Runs jobs for Avro-encoded Kafka messages: a consumer group decodes each
//! message with the writer schema from the schema registry and dispatches it
//! to the service its topic is routed to.
//!
//! # Crates
//!
//! - `seal_runner_kafka` - schema cache, codec pipeline, consumer group runner
//! - `seal_runner_kafka_producer` - Avro producer in the registry wire format
//! - `seal_runner_services` - job services and topic dispatch
//!
//! # CLI Usage
//!
//! ```bash
//! # Run jobs for the "test" topic with the cars service
//! seal-runner serve --brokers localhost:9092 --route test=cars
//!
//! # Publish one string message to the "test" topic
//! seal-runner kafka producer key-1 hello
//!
//! # Print the service manifests
//! seal-runner services list
//! ```

use clap::Parser;
use seal_runner_kafka::ErrorPolicy;
use std::path::PathBuf;

pub mod commands;
pub mod config;
pub mod logging;

pub use config::{ConfigFile, LogSettings, ServeSettings};

/// Global options shared by every subcommand
#[derive(Parser, Clone, Debug, Default)]
pub struct GlobalOpts {
    /// TOML configuration file
    #[arg(long, global = true, env = "SEAL_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub log: LogOpts,
}

#[derive(Parser, Clone, Debug, Default)]
pub struct LogOpts {
    /// Log level filter (ignored when RUST_LOG is set)
    #[arg(long, global = true, env = "SEAL_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "SEAL_LOG_JSON")]
    pub log_json: bool,

    /// Disable colored log output
    #[arg(long, global = true, env = "SEAL_NO_ANSI")]
    pub no_ansi: bool,
}

#[derive(Parser, Clone, Debug, Default)]
pub struct KafkaOpts {
    /// Kafka brokers (comma-separated list)
    #[arg(long, env = "SEAL_KAFKA_BROKERS")]
    pub brokers: Option<String>,

    /// Schema registry base URLs, tried in order
    #[arg(long, env = "SEAL_SCHEMA_REGISTRIES", value_delimiter = ',')]
    pub schema_registries: Option<Vec<String>>,
}

#[derive(Parser, Clone, Debug, Default)]
pub struct ServeArgs {
    #[command(flatten)]
    pub kafka: KafkaOpts,

    /// Consumer group ID
    #[arg(long, env = "SEAL_KAFKA_GROUP_ID")]
    pub group_id: Option<String>,

    /// Topics to consume from
    #[arg(long, env = "SEAL_KAFKA_TOPICS", value_delimiter = ',')]
    pub topics: Option<Vec<String>>,

    /// Where a new group starts reading
    #[arg(long, env = "SEAL_AUTO_OFFSET_RESET", value_parser = ["earliest", "latest"])]
    pub auto_offset_reset: Option<String>,

    /// Consumer session timeout in milliseconds
    #[arg(long, env = "SEAL_SESSION_TIMEOUT_MS")]
    pub session_timeout_ms: Option<u32>,

    /// Messages buffered per partition
    #[arg(long, env = "SEAL_CHANNEL_BUFFER_SIZE")]
    pub channel_buffer_size: Option<usize>,

    /// What to do with a message that fails: skip (mark it anyway) or stop
    /// (leave it unmarked and rejoin)
    #[arg(long, env = "SEAL_ON_ERROR")]
    pub on_error: Option<ErrorPolicy>,

    /// Consecutive failed sessions tolerated before giving up (default: retry forever)
    #[arg(long, env = "SEAL_MAX_RETRIES")]
    pub max_retries: Option<u32>,

    /// Pause between rejoin attempts (e.g., "500ms", "2s")
    #[arg(long, env = "SEAL_RETRY_BACKOFF")]
    pub retry_backoff: Option<String>,

    /// Abort jobs running longer than this (e.g., "30s")
    #[arg(long, env = "SEAL_JOB_TIMEOUT")]
    pub job_timeout: Option<String>,

    /// Route a topic to a service as topic=service (repeatable)
    #[arg(long = "route", env = "SEAL_ROUTES", value_delimiter = ',')]
    pub routes: Vec<String>,

    /// Simulated work per cars job (e.g., "10s")
    #[arg(long, env = "SEAL_CARS_JOB_DELAY")]
    pub cars_job_delay: Option<String>,
}

#[derive(Parser, Clone, Debug)]
pub struct ProduceArgs {
    #[command(flatten)]
    pub kafka: KafkaOpts,

    /// Message key
    pub key: String,

    /// Message value: JSON text, or plain text for string schemas
    pub value: String,

    /// Topic to publish to
    #[arg(long, default_value = "test")]
    pub topic: String,

    /// Avro schema text or primitive type name
    #[arg(long, default_value = "string")]
    pub schema: String,

    /// Delivery timeout in milliseconds
    #[arg(long, default_value_t = 5000)]
    pub message_timeout_ms: u64,
}

/// Process exit code for a failed command: 2 when the transport could not
/// be closed cleanly, 1 otherwise.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    let fatal = err.chain().any(|cause| {
        cause
            .downcast_ref::<seal_runner_kafka::Error>()
            .is_some_and(seal_runner_kafka::Error::is_fatal)
    });

    if fatal {
        2
    } else {
        1
    }
}
