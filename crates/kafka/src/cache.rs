//! Schema cache.
//!
//! Maps schema ids to parsed [`Codec`]s, fetching from the registry on a miss.
//! Lookups on different ids never wait on each other: the fetch happens with
//! no lock held. Two concurrent misses on the same id may both fetch; the last
//! insert wins, which is harmless because a schema id is immutable.

use crate::codec::Codec;
use crate::error::Result;
use crate::registry::{HttpSchemaRegistry, SchemaRegistry};
use kafka_types::SchemaId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

pub struct SchemaCache<R = HttpSchemaRegistry> {
    registry: R,
    codecs: RwLock<HashMap<SchemaId, Arc<Codec>>>,
    subjects: RwLock<HashMap<String, SchemaId>>,
}

impl<R: SchemaRegistry> SchemaCache<R> {
    pub fn new(registry: R) -> Self {
        Self {
            registry,
            codecs: RwLock::new(HashMap::new()),
            subjects: RwLock::new(HashMap::new()),
        }
    }

    /// Return the codec for `schema_id`, fetching and parsing it on a miss.
    ///
    /// Failed fetches and unparseable schemas leave no entry behind, so the
    /// next lookup tries the registry again.
    pub async fn get_schema(&self, schema_id: SchemaId) -> Result<Arc<Codec>> {
        if let Some(codec) = self.codecs.read().await.get(&schema_id) {
            return Ok(codec.clone());
        }

        debug!("Schema {schema_id} not cached, fetching from registry");
        let text = self.registry.fetch_schema_by_id(schema_id).await?;
        let codec = Arc::new(Codec::parse(&text)?);

        self.codecs.write().await.insert(schema_id, codec.clone());
        Ok(codec)
    }

    /// Register `schema_text` under `subject` and cache the resulting codec.
    ///
    /// A subject already registered with the same schema text is answered
    /// from the cache. The schema is parsed before anything is sent, so
    /// malformed text never reaches the registry.
    pub async fn register(&self, subject: &str, schema_text: &str) -> Result<(SchemaId, Arc<Codec>)> {
        let codec = Arc::new(Codec::parse(schema_text)?);

        if let Some(schema_id) = self.subject_id(subject).await {
            if let Some(cached) = self.codecs.read().await.get(&schema_id) {
                if cached.text() == codec.text() {
                    return Ok((schema_id, cached.clone()));
                }
            }
        }

        let schema_id = self.registry.register_schema(subject, codec.text()).await?;
        debug!("Registered schema for subject {subject} as id {schema_id}");

        self.codecs.write().await.insert(schema_id, codec.clone());
        self.subjects
            .write()
            .await
            .insert(subject.to_string(), schema_id);

        Ok((schema_id, codec))
    }

    /// Id most recently registered under `subject` through this cache.
    pub async fn subject_id(&self, subject: &str) -> Option<SchemaId> {
        self.subjects.read().await.get(subject).copied()
    }

    pub async fn contains(&self, schema_id: SchemaId) -> bool {
        self.codecs.read().await.contains_key(&schema_id)
    }

    pub async fn len(&self) -> usize {
        self.codecs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.codecs.read().await.is_empty()
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }
}
