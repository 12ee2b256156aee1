use crate::error::{Result, ServiceError};
use crate::manifest::ServiceManifest;
use crate::service::{Service, ServiceKind, ServiceSettings};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Immutable name → service table, built once at startup.
pub struct ServiceRegistry {
    services: BTreeMap<String, Arc<dyn Service>>,
}

impl ServiceRegistry {
    pub fn builder() -> ServiceRegistryBuilder {
        ServiceRegistryBuilder::default()
    }

    /// Registry holding every [`ServiceKind`].
    pub fn with_all(settings: &ServiceSettings) -> Result<Self> {
        ServiceKind::ALL
            .iter()
            .fold(Self::builder(), |builder, kind| builder.kind(*kind, settings))
            .build()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Service>> {
        self.services.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn manifests(&self) -> Vec<ServiceManifest> {
        self.services
            .values()
            .map(|service| ServiceManifest::from_service(service.as_ref()))
            .collect()
    }
}

#[derive(Default)]
pub struct ServiceRegistryBuilder {
    services: Vec<Arc<dyn Service>>,
}

impl ServiceRegistryBuilder {
    pub fn register(mut self, service: Arc<dyn Service>) -> Self {
        self.services.push(service);
        self
    }

    pub fn kind(self, kind: ServiceKind, settings: &ServiceSettings) -> Self {
        self.register(kind.build(settings))
    }

    /// Fails with [`ServiceError::Duplicate`] if two services share a name.
    pub fn build(self) -> Result<ServiceRegistry> {
        let mut services = BTreeMap::new();
        for service in self.services {
            let name = service.name().to_string();
            if services.insert(name.clone(), service).is_some() {
                return Err(ServiceError::Duplicate(name));
            }
        }
        Ok(ServiceRegistry { services })
    }
}
