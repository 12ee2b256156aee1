use kafka_types::{KafkaTypesError, SchemaId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad data: {0}")]
    BadData(String),

    #[error("Invalid type: {0}")]
    InvalidType(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Already closed: {0}")]
    Closed(String),

    #[error("Job failed in service '{service}': {source}")]
    Job {
        service: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Gave up rejoining consumer group after {0} attempts")]
    RetriesExhausted(u32),

    #[error("Fatal: {0}")]
    Fatal(String),
}

impl Error {
    pub fn schema_not_found(id: SchemaId) -> Self {
        Error::NotFound(format!("schema id {id}"))
    }

    /// Whether retrying the same request against another endpoint may help.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Unavailable(_) | Error::Timeout(_))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Fatal(_))
    }
}

impl From<KafkaTypesError> for Error {
    fn from(e: KafkaTypesError) -> Self {
        Error::BadData(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
