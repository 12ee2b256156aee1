use crate::error::{Result, ServiceError};
use crate::manifest::{doc_defs, DocDefs, Param, ServTrigger, Triggers};
use crate::service::{Service, DEFAULT_TASK_VERSION};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

const ROUTES_DOCTYPE: &str = "io.seal.routes";

#[derive(Debug, Deserialize)]
struct Route {
    from: String,
    to: String,
    #[serde(default)]
    stops: Vec<String>,
}

/// Accepts route documents `{"from", "to", "stops"}` and logs the leg count.
#[derive(Default)]
pub struct RoutesService {
    completed: AtomicU64,
}

impl RoutesService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn completed_jobs(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Service for RoutesService {
    fn name(&self) -> &str {
        "routes"
    }

    fn description(&self) -> &str {
        "Plans route legs between stops"
    }

    fn categories(&self) -> Vec<String> {
        vec!["transport".to_string()]
    }

    fn params(&self) -> BTreeMap<String, Vec<Param>> {
        BTreeMap::from([(
            DEFAULT_TASK_VERSION.to_string(),
            vec![
                Param::new("from", "string", "Start of the route"),
                Param::new("to", "string", "End of the route"),
                Param::new("stops", "string", "Intermediate stops")
                    .array()
                    .with_default(serde_json::json!([])),
            ],
        )])
    }

    fn doc_types(&self) -> DocDefs {
        doc_defs(&[ROUTES_DOCTYPE])
    }

    fn triggers(&self) -> Triggers {
        Triggers::from([(
            "plan".to_string(),
            ServTrigger {
                debounce: "5s".to_string(),
                trigger_type: "@event".to_string(),
                trigger_options: format!("{ROUTES_DOCTYPE}:CREATED"),
            },
        )])
    }

    async fn run_job(&self, payload: &[u8]) -> Result<()> {
        let route: Route =
            serde_json::from_slice(payload).map_err(|e| ServiceError::InvalidPayload {
                service: self.name().to_string(),
                reason: e.to_string(),
            })?;

        info!(
            service = "routes",
            from = %route.from,
            to = %route.to,
            legs = route.stops.len() + 1,
            "Running job"
        );
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
