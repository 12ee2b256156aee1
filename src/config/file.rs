//! TOML configuration file.
//!
//! Every key is optional; anything missing falls back to the command line or
//! the built-in default.
//!
//! ```toml
//! [kafka]
//! brokers = "kafka-1:9092,kafka-2:9092"
//! schema_registries = ["http://registry-1:8081", "http://registry-2:8081"]
//! group_id = "seal-runner-kafka"
//! topics = ["test"]
//!
//! [runner]
//! on_error = "stop"
//! max_retries = 5
//! retry_backoff = "2s"
//! job_timeout = "30s"
//!
//! [routes]
//! test = "cars"
//!
//! [services]
//! cars_job_delay = "10s"
//!
//! [log]
//! level = "debug"
//! json = true
//! ansi = false
//! ```

use anyhow::Context;
use seal_runner_kafka::ErrorPolicy;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub kafka: KafkaSection,
    #[serde(default)]
    pub runner: RunnerSection,
    /// topic -> service name
    #[serde(default)]
    pub routes: BTreeMap<String, String>,
    #[serde(default)]
    pub services: ServicesSection,
    #[serde(default)]
    pub log: LogSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KafkaSection {
    pub brokers: Option<String>,
    #[serde(alias = "schemaRegistries")]
    pub schema_registries: Option<Vec<String>>,
    #[serde(alias = "groupId")]
    pub group_id: Option<String>,
    pub topics: Option<Vec<String>>,
    pub auto_offset_reset: Option<String>,
    pub session_timeout_ms: Option<u32>,
    pub channel_buffer_size: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunnerSection {
    pub on_error: Option<ErrorPolicy>,
    pub max_retries: Option<u32>,
    /// Duration string, e.g. "500ms" or "2s"
    pub retry_backoff: Option<String>,
    pub job_timeout: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServicesSection {
    pub cars_job_delay: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogSection {
    pub level: Option<String>,
    pub json: Option<bool>,
    pub ansi: Option<bool>,
}

impl ConfigFile {
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        toml::from_str(text).context("Invalid configuration file")
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// The file at `path` if one was given, an empty configuration otherwise.
    pub fn load_optional(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}
