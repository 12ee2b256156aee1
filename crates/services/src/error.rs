use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Service '{0}' is registered twice")]
    Duplicate(String),

    #[error("Unknown service: {0}")]
    UnknownService(String),

    #[error("Unknown service kind '{0}', expected one of: cars, routes")]
    UnknownKind(String),

    #[error("No service routed for topic '{0}'")]
    NoRoute(String),

    #[error("Invalid route '{0}', expected <topic>=<service>")]
    InvalidRoute(String),

    #[error("Invalid payload for service '{service}': {reason}")]
    InvalidPayload { service: String, reason: String },

    #[error("Job in service '{service}' exceeded {after:?}")]
    Timeout { service: String, after: Duration },

    #[error("Job failed in service '{service}': {source}")]
    Job {
        service: String,
        #[source]
        source: anyhow::Error,
    },
}

impl From<ServiceError> for seal_runner_kafka::Error {
    fn from(e: ServiceError) -> Self {
        use seal_runner_kafka::Error;

        match e {
            ServiceError::UnknownService(_) | ServiceError::NoRoute(_) => {
                Error::NotFound(e.to_string())
            }
            ServiceError::Duplicate(_)
            | ServiceError::UnknownKind(_)
            | ServiceError::InvalidRoute(_) => Error::InvalidConfig(e.to_string()),
            ServiceError::Timeout { .. } => Error::Timeout(e.to_string()),
            ServiceError::InvalidPayload { service, reason } => Error::Job {
                service,
                source: anyhow::anyhow!("invalid payload: {reason}"),
            },
            ServiceError::Job { service, source } => Error::Job { service, source },
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
