use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::ConnectionId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub name: String,
    pub host: String,
    pub database: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSummary {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSummary {
    pub name: String,
    /// Estimated; engines such as InnoDB only keep an approximation.
    pub row_count: Option<u64>,
    pub columns: Vec<ColumnSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SchemaSummary {
    pub tables: Vec<TableSummary>,
}

impl SchemaSummary {
    /// Case-insensitive lookup, matching how MySQL treats table names on
    /// most platforms.
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&TableSummary> {
        let name = name.trim();
        self.tables
            .iter()
            .find(|table| table.name == name)
            .or_else(|| {
                self.tables
                    .iter()
                    .find(|table| table.name.eq_ignore_ascii_case(name))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SchemaProviderError {
    message: String,
}

impl SchemaProviderError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Read-only source of connection metadata and table listings.
#[async_trait]
pub trait SchemaProvider: Send + Sync {
    async fn list_connections(&self) -> Result<Vec<ConnectionInfo>, SchemaProviderError>;
    async fn get_schema(
        &self,
        connection_id: ConnectionId,
    ) -> Result<SchemaSummary, SchemaProviderError>;
}

#[derive(Debug)]
struct Cached<T> {
    fetched_at: Instant,
    value: Arc<T>,
}

impl<T> Cached<T> {
    fn fresh(&self, now: Instant, ttl: Duration) -> Option<Arc<T>> {
        (now.saturating_duration_since(self.fetched_at) <= ttl).then(|| Arc::clone(&self.value))
    }
}

#[derive(Debug)]
pub struct SchemaCache<P: SchemaProvider> {
    provider: P,
    ttl: Duration,
    connections: Option<Cached<Vec<ConnectionInfo>>>,
    schemas: HashMap<ConnectionId, Cached<SchemaSummary>>,
}

impl<P: SchemaProvider> SchemaCache<P> {
    #[must_use]
    pub fn new(provider: P, ttl: Duration) -> Self {
        Self {
            provider,
            ttl,
            connections: None,
            schemas: HashMap::new(),
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    #[must_use]
    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub async fn connections(&mut self) -> Result<Arc<Vec<ConnectionInfo>>, SchemaProviderError> {
        self.connections_at(Instant::now()).await
    }

    pub async fn connection(
        &mut self,
        connection_id: ConnectionId,
    ) -> Result<Option<ConnectionInfo>, SchemaProviderError> {
        let connections = self.connections().await?;
        Ok(connections
            .iter()
            .find(|connection| connection.id == connection_id)
            .cloned())
    }

    pub async fn schema(
        &mut self,
        connection_id: ConnectionId,
    ) -> Result<Arc<SchemaSummary>, SchemaProviderError> {
        self.schema_at(connection_id, Instant::now()).await
    }

    /// The table's name as the schema spells it, if the table is known.
    pub async fn canonical_table_name(
        &mut self,
        connection_id: ConnectionId,
        table_name: &str,
    ) -> Result<Option<String>, SchemaProviderError> {
        let schema = self.schema(connection_id).await?;
        Ok(schema.table(table_name).map(|table| table.name.clone()))
    }

    pub fn invalidate(&mut self, connection_id: ConnectionId) {
        self.schemas.remove(&connection_id);
        self.connections = None;
    }

    pub fn invalidate_all(&mut self) {
        self.schemas.clear();
        self.connections = None;
    }

    async fn connections_at(
        &mut self,
        now: Instant,
    ) -> Result<Arc<Vec<ConnectionInfo>>, SchemaProviderError> {
        if let Some(connections) = self
            .connections
            .as_ref()
            .and_then(|cached| cached.fresh(now, self.ttl))
        {
            return Ok(connections);
        }

        let connections = Arc::new(self.provider.list_connections().await?);
        debug!(count = connections.len(), "connection list refreshed");
        self.connections = Some(Cached {
            fetched_at: now,
            value: Arc::clone(&connections),
        });
        Ok(connections)
    }

    async fn schema_at(
        &mut self,
        connection_id: ConnectionId,
        now: Instant,
    ) -> Result<Arc<SchemaSummary>, SchemaProviderError> {
        if let Some(schema) = self
            .schemas
            .get(&connection_id)
            .and_then(|cached| cached.fresh(now, self.ttl))
        {
            return Ok(schema);
        }

        let schema = Arc::new(self.provider.get_schema(connection_id).await?);
        debug!(connection_id, tables = schema.tables.len(), "schema refreshed");
        self.schemas.insert(
            connection_id,
            Cached {
                fetched_at: now,
                value: Arc::clone(&schema),
            },
        );
        Ok(schema)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };
    use std::time::{Duration, Instant};

    use async_trait::async_trait;

    use super::{
        ColumnSummary, ConnectionInfo, SchemaCache, SchemaProvider, SchemaProviderError,
        SchemaSummary, TableSummary,
    };
    use crate::ConnectionId;

    #[derive(Debug, Default)]
    struct FakeProvider {
        schema_fetches: Arc<AtomicUsize>,
        connection_fetches: Arc<AtomicUsize>,
        unreachable: bool,
    }

    #[async_trait]
    impl SchemaProvider for FakeProvider {
        async fn list_connections(&self) -> Result<Vec<ConnectionInfo>, SchemaProviderError> {
            self.connection_fetches.fetch_add(1, Ordering::Relaxed);
            Ok(vec![ConnectionInfo {
                id: 1,
                name: "local".to_string(),
                host: "127.0.0.1".to_string(),
                database: Some("app".to_string()),
            }])
        }

        async fn get_schema(
            &self,
            connection_id: ConnectionId,
        ) -> Result<SchemaSummary, SchemaProviderError> {
            self.schema_fetches.fetch_add(1, Ordering::Relaxed);
            if self.unreachable {
                return Err(SchemaProviderError::new("connection refused"));
            }
            Ok(SchemaSummary {
                tables: vec![TableSummary {
                    name: format!("Users{connection_id}"),
                    row_count: Some(42),
                    columns: vec![ColumnSummary {
                        name: "id".to_string(),
                        data_type: "bigint".to_string(),
                        nullable: false,
                    }],
                }],
            })
        }
    }

    #[tokio::test]
    async fn serves_schema_from_cache_within_ttl() {
        let provider = FakeProvider::default();
        let fetches = Arc::clone(&provider.schema_fetches);
        let mut cache = SchemaCache::new(provider, Duration::from_secs(60));
        let now = Instant::now();

        cache.schema_at(1, now).await.expect("first load");
        cache
            .schema_at(1, now + Duration::from_secs(30))
            .await
            .expect("cached load");
        assert_eq!(fetches.load(Ordering::Relaxed), 1);

        cache
            .schema_at(1, now + Duration::from_secs(61))
            .await
            .expect("expired load");
        cache.schema_at(2, now).await.expect("other connection");
        assert_eq!(fetches.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn invalidate_forces_refetch() {
        let provider = FakeProvider::default();
        let schema_fetches = Arc::clone(&provider.schema_fetches);
        let connection_fetches = Arc::clone(&provider.connection_fetches);
        let mut cache = SchemaCache::new(provider, Duration::from_secs(60));

        cache.schema(1).await.expect("load");
        cache.connections().await.expect("load");
        cache.invalidate(1);
        cache.schema(1).await.expect("reload");
        cache.connections().await.expect("reload");

        assert_eq!(schema_fetches.load(Ordering::Relaxed), 2);
        assert_eq!(connection_fetches.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn resolves_connections_and_canonical_table_names() {
        let mut cache = SchemaCache::new(FakeProvider::default(), Duration::from_secs(60));

        let local = cache.connection(1).await.expect("lookup").expect("known");
        assert_eq!(local.name, "local");
        assert!(cache.connection(9).await.expect("lookup").is_none());

        assert_eq!(
            cache.canonical_table_name(1, " users1 ").await,
            Ok(Some("Users1".to_string()))
        );
        assert_eq!(cache.canonical_table_name(1, "orders").await, Ok(None));
    }

    #[tokio::test]
    async fn provider_errors_are_not_cached() {
        let provider = FakeProvider {
            unreachable: true,
            ..FakeProvider::default()
        };
        let fetches = Arc::clone(&provider.schema_fetches);
        let mut cache = SchemaCache::new(provider, Duration::from_secs(60));

        assert!(cache.schema(1).await.is_err());
        assert!(cache.schema(1).await.is_err());
        assert_eq!(fetches.load(Ordering::Relaxed), 2);
    }
}
