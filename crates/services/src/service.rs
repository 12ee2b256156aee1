use crate::cars::CarsService;
use crate::error::{Result, ServiceError};
use crate::manifest::{DocDefs, Param, Triggers};
use crate::routes::RoutesService;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_TASK_VERSION: &str = "v0.1.0";

/// Directory a service keeps its files under: `/mnt/<name>/<version>`.
pub fn default_root_dir(name: &str) -> PathBuf {
    PathBuf::from("/mnt").join(name).join(DEFAULT_TASK_VERSION)
}

/// A job handler reachable through dispatch.
///
/// Everything but [`Service::run_job`] is descriptive metadata for external
/// orchestration; dispatch only ever calls `run_job`.
#[async_trait]
pub trait Service: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn scope(&self) -> Vec<String> {
        Vec::new()
    }

    fn categories(&self) -> Vec<String> {
        Vec::new()
    }

    fn version(&self) -> &str {
        DEFAULT_TASK_VERSION
    }

    /// Parameters accepted by each version.
    fn params(&self) -> BTreeMap<String, Vec<Param>>;

    fn doc_types(&self) -> DocDefs;

    fn root_dir(&self) -> PathBuf {
        default_root_dir(self.name())
    }

    fn triggers(&self) -> Triggers {
        Triggers::new()
    }

    /// Run one job for `payload`, the JSON text of a decoded message.
    ///
    /// Called concurrently for messages of different partitions.
    async fn run_job(&self, payload: &[u8]) -> Result<()>;
}

/// Settings the built-in services are constructed with.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub cars_job_delay: Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            cars_job_delay: CarsService::DEFAULT_JOB_DELAY,
        }
    }
}

/// The closed set of services this runner ships.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ServiceKind {
    Cars,
    Routes,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 2] = [ServiceKind::Cars, ServiceKind::Routes];

    pub fn name(&self) -> &'static str {
        match self {
            ServiceKind::Cars => "cars",
            ServiceKind::Routes => "routes",
        }
    }

    pub fn build(&self, settings: &ServiceSettings) -> Arc<dyn Service> {
        match self {
            ServiceKind::Cars => Arc::new(CarsService::new(settings.cars_job_delay)),
            ServiceKind::Routes => Arc::new(RoutesService::new()),
        }
    }
}

impl FromStr for ServiceKind {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self> {
        ServiceKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s.trim())
            .ok_or_else(|| ServiceError::UnknownKind(s.to_string()))
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_round_trip() {
        for kind in ServiceKind::ALL {
            assert_eq!(kind.name().parse::<ServiceKind>().unwrap(), kind);
            assert_eq!(kind.build(&ServiceSettings::default()).name(), kind.name());
        }
        assert!(matches!(
            "trucks".parse::<ServiceKind>(),
            Err(ServiceError::UnknownKind(_))
        ));
    }

    #[test]
    fn test_default_root_dir() {
        assert_eq!(default_root_dir("cars"), PathBuf::from("/mnt/cars/v0.1.0"));
    }
}
