//! Configuration resolution.
//!
//! Each setting comes from the command line (or its environment variable),
//! then the configuration file, then the built-in default.

pub mod duration;
pub mod file;

pub use duration::parse_duration;
pub use file::{ConfigFile, KafkaSection, LogSection, RunnerSection, ServicesSection};

use crate::{KafkaOpts, LogOpts, ServeArgs};
use anyhow::Context;
use seal_runner_kafka::{ConsumerConfig, RetryPolicy};
use seal_runner_kafka_producer::ProducerConfig;
use seal_runner_services::{parse_routes, ServiceSettings};
use std::collections::BTreeMap;
use std::time::Duration;

/// Route used when neither the command line nor the file names any.
pub const DEFAULT_ROUTE: &str = "test=cars";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: String,
    pub json: bool,
    pub ansi: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            ansi: true,
        }
    }
}

impl LogSettings {
    pub fn resolve(opts: &LogOpts, file: &LogSection) -> Self {
        let defaults = Self::default();
        Self {
            level: opts
                .log_level
                .clone()
                .or_else(|| file.level.clone())
                .unwrap_or(defaults.level),
            json: opts.log_json || file.json.unwrap_or(defaults.json),
            ansi: !opts.no_ansi && file.ansi.unwrap_or(defaults.ansi),
        }
    }
}

/// Everything `serve` needs.
#[derive(Debug, Clone)]
pub struct ServeSettings {
    pub consumer: ConsumerConfig,
    /// topic -> service name
    pub routes: BTreeMap<String, String>,
    pub job_timeout: Option<Duration>,
    pub services: ServiceSettings,
}

impl ServeSettings {
    pub fn resolve(args: &ServeArgs, file: &ConfigFile) -> anyhow::Result<Self> {
        let defaults = ConsumerConfig::default();
        let kafka = &file.kafka;
        let runner = &file.runner;

        let retry = RetryPolicy {
            max_retries: args.max_retries.or(runner.max_retries),
            backoff: duration_setting(
                "retry backoff",
                args.retry_backoff.as_deref(),
                runner.retry_backoff.as_deref(),
            )?
            .unwrap_or(defaults.retry.backoff),
        };

        let consumer = ConsumerConfig {
            brokers: brokers(&args.kafka, kafka).unwrap_or(defaults.brokers),
            group_id: args
                .group_id
                .clone()
                .or_else(|| kafka.group_id.clone())
                .unwrap_or(defaults.group_id),
            topics: args
                .topics
                .clone()
                .or_else(|| kafka.topics.clone())
                .unwrap_or(defaults.topics),
            schema_registries: schema_registries(&args.kafka, kafka)
                .unwrap_or(defaults.schema_registries),
            auto_offset_reset: args
                .auto_offset_reset
                .clone()
                .or_else(|| kafka.auto_offset_reset.clone())
                .unwrap_or(defaults.auto_offset_reset),
            session_timeout_ms: args
                .session_timeout_ms
                .or(kafka.session_timeout_ms)
                .unwrap_or(defaults.session_timeout_ms),
            channel_buffer_size: args
                .channel_buffer_size
                .or(kafka.channel_buffer_size)
                .unwrap_or(defaults.channel_buffer_size),
            on_error: args.on_error.or(runner.on_error).unwrap_or_default(),
            retry,
            ..defaults
        };
        consumer
            .validate()
            .context("Invalid consumer configuration")?;

        let routes = if !args.routes.is_empty() {
            parse_routes(&args.routes)?
        } else if !file.routes.is_empty() {
            file.routes.clone()
        } else {
            parse_routes([DEFAULT_ROUTE])?
        };

        Ok(Self {
            consumer,
            routes,
            job_timeout: duration_setting(
                "job timeout",
                args.job_timeout.as_deref(),
                runner.job_timeout.as_deref(),
            )?,
            services: service_settings(args.cars_job_delay.as_deref(), &file.services)?,
        })
    }
}

pub fn producer_config(
    opts: &KafkaOpts,
    file: &ConfigFile,
    message_timeout_ms: u64,
) -> ProducerConfig {
    let defaults = ProducerConfig::default();
    ProducerConfig {
        brokers: brokers(opts, &file.kafka).unwrap_or(defaults.brokers),
        schema_registries: schema_registries(opts, &file.kafka)
            .unwrap_or(defaults.schema_registries),
        message_timeout_ms,
    }
}

pub fn service_settings(
    cars_job_delay: Option<&str>,
    file: &ServicesSection,
) -> anyhow::Result<ServiceSettings> {
    let defaults = ServiceSettings::default();
    Ok(ServiceSettings {
        cars_job_delay: duration_setting(
            "cars job delay",
            cars_job_delay,
            file.cars_job_delay.as_deref(),
        )?
        .unwrap_or(defaults.cars_job_delay),
    })
}

fn brokers(opts: &KafkaOpts, file: &KafkaSection) -> Option<String> {
    opts.brokers.clone().or_else(|| file.brokers.clone())
}

fn schema_registries(opts: &KafkaOpts, file: &KafkaSection) -> Option<Vec<String>> {
    opts.schema_registries
        .clone()
        .or_else(|| file.schema_registries.clone())
}

fn duration_setting(
    name: &str,
    cli: Option<&str>,
    file: Option<&str>,
) -> anyhow::Result<Option<Duration>> {
    cli.or(file)
        .map(|s| parse_duration(s).with_context(|| format!("Invalid {name}: {s}")))
        .transpose()
}
