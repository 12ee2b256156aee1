//! Topic-based dispatch of decoded messages to services.

use crate::error::{Result, ServiceError};
use crate::registry::ServiceRegistry;
use crate::service::Service;
use async_trait::async_trait;
use kafka_types::DecodedMessage;
use seal_runner_kafka::Dispatch;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info_span, Instrument, Span};

/// Parse `topic=service` routes.
pub fn parse_routes<I, S>(routes: I) -> Result<BTreeMap<String, String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    routes
        .into_iter()
        .map(|route| {
            let route = route.as_ref();
            match route.split_once('=') {
                Some((topic, service)) if !topic.trim().is_empty() && !service.trim().is_empty() => {
                    Ok((topic.trim().to_string(), service.trim().to_string()))
                }
                _ => Err(ServiceError::InvalidRoute(route.to_string())),
            }
        })
        .collect()
}

/// Routes each message to the service its topic is mapped to and runs the
/// job inside the claim that delivered it.
pub struct Dispatcher {
    registry: Arc<ServiceRegistry>,
    routes: BTreeMap<String, String>,
    job_timeout: Option<Duration>,
    span: Span,
}

impl Dispatcher {
    /// Fails with [`ServiceError::UnknownService`] if a route names a
    /// service that is not registered.
    pub fn new(
        registry: Arc<ServiceRegistry>,
        routes: BTreeMap<String, String>,
        job_timeout: Option<Duration>,
    ) -> Result<Self> {
        if let Some(service) = routes.values().find(|service| !registry.contains(service)) {
            return Err(ServiceError::UnknownService(service.clone()));
        }

        Ok(Self {
            registry,
            routes,
            job_timeout,
            span: info_span!("services"),
        })
    }

    pub fn routes(&self) -> &BTreeMap<String, String> {
        &self.routes
    }

    /// Service handling messages from `topic`.
    pub fn route(&self, topic: &str) -> Result<&Arc<dyn Service>> {
        let name = self
            .routes
            .get(topic)
            .ok_or_else(|| ServiceError::NoRoute(topic.to_string()))?;

        self.registry
            .get(name)
            .ok_or_else(|| ServiceError::UnknownService(name.clone()))
    }

    pub async fn run(&self, topic: &str, payload: &[u8]) -> Result<()> {
        let service = self.route(topic)?;

        match self.job_timeout {
            Some(after) => tokio::time::timeout(after, service.run_job(payload))
                .await
                .map_err(|_| ServiceError::Timeout {
                    service: service.name().to_string(),
                    after,
                })?,
            None => service.run_job(payload).await,
        }
    }
}

#[async_trait]
impl Dispatch for Dispatcher {
    async fn dispatch(&self, message: &DecodedMessage) -> seal_runner_kafka::Result<()> {
        let payload = message.textual()?;

        let span = info_span!(
            parent: &self.span,
            "job",
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset
        );

        async {
            self.run(&message.topic, payload.as_bytes()).await?;
            debug!("Job finished");
            Ok::<(), seal_runner_kafka::Error>(())
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cars::CarsService;
    use crate::routes::RoutesService;
    use apache_avro::types::Value;
    use apache_avro::Schema;
    use seal_runner_kafka::Error;

    const ROUTE_SCHEMA: &str = r#"{
        "type": "record",
        "name": "Route",
        "fields": [
            {"name": "from", "type": "string"},
            {"name": "to", "type": "string"}
        ]
    }"#;

    struct Fixture {
        cars: Arc<CarsService>,
        routes: Arc<RoutesService>,
        dispatcher: Dispatcher,
    }

    fn fixture(job_timeout: Option<Duration>, cars_delay: Duration) -> Fixture {
        let cars = Arc::new(CarsService::new(cars_delay));
        let routes = Arc::new(RoutesService::new());
        let registry = ServiceRegistry::builder()
            .register(cars.clone())
            .register(routes.clone())
            .build()
            .unwrap();

        let dispatcher = Dispatcher::new(
            Arc::new(registry),
            parse_routes(["vehicles=cars", "trips=routes"]).unwrap(),
            job_timeout,
        )
        .unwrap();

        Fixture {
            cars,
            routes,
            dispatcher,
        }
    }

    fn decoded(topic: &str, schema: &str, value: Value) -> DecodedMessage {
        DecodedMessage {
            schema_id: 1,
            topic: topic.to_string(),
            partition: 0,
            offset: 0,
            key: "k".to_string(),
            value,
            schema: Arc::new(Schema::parse_str(schema).unwrap()),
        }
    }

    #[test]
    fn test_parse_routes() {
        let routes = parse_routes(["test=cars", " trips = routes "]).unwrap();
        assert_eq!(routes["test"], "cars");
        assert_eq!(routes["trips"], "routes");

        for bad in ["test", "=cars", "test=", ""] {
            assert!(
                matches!(parse_routes([bad]), Err(ServiceError::InvalidRoute(_))),
                "{bad}"
            );
        }
    }

    #[tokio::test]
    async fn test_message_for_cars_reaches_only_cars() {
        let f = fixture(None, Duration::from_millis(1));

        f.dispatcher
            .dispatch(&decoded("vehicles", "\"string\"", Value::String("volvo".to_string())))
            .await
            .unwrap();

        assert_eq!(f.cars.completed_jobs(), 1);
        assert_eq!(f.routes.completed_jobs(), 0);
    }

    #[tokio::test]
    async fn test_record_payload_is_json_text() {
        let f = fixture(None, Duration::from_millis(1));
        let route = Value::Record(vec![
            ("from".to_string(), Value::String("Oslo".to_string())),
            ("to".to_string(), Value::String("Bergen".to_string())),
        ]);

        f.dispatcher
            .dispatch(&decoded("trips", ROUTE_SCHEMA, route))
            .await
            .unwrap();

        assert_eq!(f.routes.completed_jobs(), 1);
        assert_eq!(f.cars.completed_jobs(), 0);
    }

    #[tokio::test]
    async fn test_unrouted_topic_is_not_found() {
        let f = fixture(None, Duration::from_millis(1));

        let result = f
            .dispatcher
            .dispatch(&decoded("unknown", "\"null\"", Value::Null))
            .await;

        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(f.cars.completed_jobs() + f.routes.completed_jobs(), 0);
    }

    #[tokio::test]
    async fn test_route_to_unregistered_service_is_rejected() {
        let registry = Arc::new(ServiceRegistry::builder().build().unwrap());

        let result = Dispatcher::new(registry, parse_routes(["test=cars"]).unwrap(), None);

        assert!(matches!(result, Err(ServiceError::UnknownService(name)) if name == "cars"));
    }

    #[tokio::test]
    async fn test_job_timeout() {
        let f = fixture(Some(Duration::from_millis(20)), Duration::from_secs(5));

        let result = f
            .dispatcher
            .dispatch(&decoded("vehicles", "\"string\"", Value::String("slow".to_string())))
            .await;

        assert!(matches!(result, Err(Error::Timeout(_))));
        assert_eq!(f.cars.completed_jobs(), 0);
    }

    #[tokio::test]
    async fn test_job_failure_names_service() {
        let f = fixture(None, Duration::from_millis(1));

        let result = f
            .dispatcher
            .dispatch(&decoded("trips", "\"string\"", Value::String("not a route".to_string())))
            .await;

        assert!(matches!(result, Err(Error::Job { service, .. }) if service == "routes"));
    }
}
