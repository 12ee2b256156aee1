//! CLI command: `services list`

use crate::config::{service_settings, ConfigFile};
use anyhow::Context;
use seal_runner_services::ServiceRegistry;

/// Manifests of every built-in service as pretty-printed JSON.
pub fn list(file: &ConfigFile) -> anyhow::Result<String> {
    let settings = service_settings(None, &file.services)?;
    let registry = ServiceRegistry::with_all(&settings)?;

    serde_json::to_string_pretty(&registry.manifests())
        .context("Failed to render service manifests")
}
