//! Service metadata as published to external orchestration.

use crate::service::Service;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One job parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    #[serde(rename = "is_array", default, skip_serializing_if = "is_false")]
    pub array: bool,
    #[serde(default)]
    pub description: String,
}

impl Param {
    pub fn new(name: &str, param_type: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type: param_type.to_string(),
            default: None,
            array: false,
            description: description.to_string(),
        }
    }

    pub fn with_default(mut self, default: serde_json::Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn array(mut self) -> Self {
        self.array = true;
        self
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Document type definition: indexes and the unique key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocDef {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub index: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub unique: String,
}

pub type DocDefs = BTreeMap<String, DocDef>;

/// Definitions for the given document types; unknown types get an empty
/// definition.
pub fn doc_defs(types: &[&str]) -> DocDefs {
    types
        .iter()
        .map(|doc_type| (doc_type.to_string(), DocDef::default()))
        .collect()
}

/// When and how orchestration should start a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServTrigger {
    pub debounce: String,
    #[serde(rename = "type")]
    pub trigger_type: String,
    #[serde(rename = "trigger")]
    pub trigger_options: String,
}

pub type Triggers = BTreeMap<String, ServTrigger>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceManifest {
    pub name: String,
    pub description: String,
    pub version: String,
    pub repository: String,
    pub categories: Vec<String>,
    pub support_mime: Vec<String>,
    pub scope: Vec<String>,
    pub params: Vec<Param>,
    #[serde(rename = "doctypes", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub doc_types: DocDefs,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub services: BTreeMap<String, serde_json::Value>,
}

impl ServiceManifest {
    pub fn from_service(service: &dyn Service) -> Self {
        let version = service.version().to_string();
        let params = service.params().remove(&version).unwrap_or_default();

        let mut services = BTreeMap::new();
        services.insert(
            service.name().to_string(),
            serde_json::json!({
                "root_dir": service.root_dir(),
                "triggers": service.triggers(),
            }),
        );

        Self {
            name: service.name().to_string(),
            description: service.description().to_string(),
            version,
            repository: String::new(),
            categories: service.categories(),
            support_mime: Vec::new(),
            scope: service.scope(),
            params,
            doc_types: service.doc_types(),
            services,
        }
    }
}
