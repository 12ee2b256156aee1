//! Job services for seal-runner.
//!
//! A [`Service`] is a named job handler plus descriptive metadata. The
//! built-in services form a closed set ([`ServiceKind`]); they are collected
//! into an immutable [`ServiceRegistry`] at startup, and a [`Dispatcher`]
//! maps each consumed topic to one of them.
//!
//! # Modules
//!
//! - [`service`] - the `Service` trait and the service kinds
//! - [`cars`], [`routes`] - built-in services
//! - [`registry`] - name to service lookup
//! - [`dispatch`] - topic routing, job timeouts, runner integration
//! - [`manifest`] - serializable metadata for orchestration

pub mod cars;
pub mod dispatch;
pub mod error;
pub mod manifest;
pub mod registry;
pub mod routes;
pub mod service;

pub use cars::CarsService;
pub use dispatch::{parse_routes, Dispatcher};
pub use error::{Result, ServiceError};
pub use manifest::{doc_defs, DocDef, DocDefs, Param, ServTrigger, ServiceManifest, Triggers};
pub use registry::{ServiceRegistry, ServiceRegistryBuilder};
pub use routes::RoutesService;
pub use service::{
    default_root_dir, Service, ServiceKind, ServiceSettings, DEFAULT_TASK_VERSION,
};
