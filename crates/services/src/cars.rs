use crate::error::Result;
use crate::manifest::{doc_defs, DocDefs, Param};
use crate::service::{Service, DEFAULT_TASK_VERSION};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::info;

/// Logs each payload, then simulates work by sleeping.
pub struct CarsService {
    job_delay: Duration,
    completed: AtomicU64,
}

impl CarsService {
    pub const DEFAULT_JOB_DELAY: Duration = Duration::from_secs(10);

    pub fn new(job_delay: Duration) -> Self {
        Self {
            job_delay,
            completed: AtomicU64::new(0),
        }
    }

    pub fn completed_jobs(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }
}

impl Default for CarsService {
    fn default() -> Self {
        Self::new(Self::DEFAULT_JOB_DELAY)
    }
}

#[async_trait]
impl Service for CarsService {
    fn name(&self) -> &str {
        "cars"
    }

    fn params(&self) -> BTreeMap<String, Vec<Param>> {
        BTreeMap::from([(DEFAULT_TASK_VERSION.to_string(), Vec::new())])
    }

    fn doc_types(&self) -> DocDefs {
        doc_defs(&[])
    }

    async fn run_job(&self, payload: &[u8]) -> Result<()> {
        info!(service = "cars", payload = %String::from_utf8_lossy(payload), "Running job");
        tokio::time::sleep(self.job_delay).await;
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
