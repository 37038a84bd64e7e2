// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tenant lifecycle within a deployment.
//!
//! A tenant is an isolated slice of a running deployment: a schema or
//! dedicated database on PostgreSQL, a key prefix or numbered logical
//! database on Redis. The [`TenantManager`] owns handle assignment and
//! persists the tenant list on the deployment record. Tenant changes are
//! whole-record updates through the registry and do not take an operation
//! lease; re-rendering artifacts for the new tenant set happens on the next
//! mutating operation.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::registry::{DeploymentStatus, Registry};
use crate::spec::{DatabaseSpec, EngineSpec, IsolationStrategy};

/// A provisioned tenant and its isolation handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    /// Caller-supplied tenant identifier, unique within the deployment.
    pub tenant_id: String,
    /// The concrete isolation slot assigned at creation time.
    pub isolation: IsolationHandle,
    /// Optional per-tenant resource limits.
    #[serde(default)]
    pub limits: ResourceLimits,
    /// Creation timestamp; the tenant list is kept in creation order.
    pub created_at: DateTime<Utc>,
}

/// The concrete isolation slot a tenant was assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum IsolationHandle {
    /// PostgreSQL schema.
    Schema {
        /// Schema name, `<schema_prefix><tenant_id>`.
        name: String,
    },
    /// Dedicated PostgreSQL database.
    Database {
        /// Database name, `<deployment_name>_<tenant_id>`.
        name: String,
    },
    /// Redis key prefix.
    KeyPrefix {
        /// Fully substituted prefix, e.g. `client-1:app:`.
        prefix: String,
    },
    /// Redis numbered logical database.
    DatabaseIndex {
        /// Index in `[0, databases)`.
        index: i64,
    },
}

/// Optional per-tenant resource limits, recorded on the tenant and surfaced
/// to rendered artifacts where the engine can enforce them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceLimits {
    /// Maximum concurrent connections.
    #[serde(default)]
    pub max_connections: Option<i64>,
    /// Maximum operations per second.
    #[serde(default)]
    pub max_ops_per_sec: Option<i64>,
    /// Memory budget in MB.
    #[serde(default)]
    pub memory_mb: Option<i64>,
    /// Storage budget in MB.
    #[serde(default)]
    pub storage_mb: Option<i64>,
}

/// Everything a tenant needs to connect to its slice of the deployment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TenantConnection {
    /// Service hostname of the deployment.
    pub host: String,
    /// Client port (TLS port when TLS is enabled for Redis).
    pub port: i64,
    /// Username to authenticate as.
    pub username: String,
    /// The tenant's isolation handle; tells the client which schema,
    /// database, prefix, or index to address.
    pub isolation: IsolationHandle,
}

/// Adds, removes, and describes tenants on a deployment record.
pub struct TenantManager {
    registry: Arc<dyn Registry>,
}

impl TenantManager {
    /// Create a tenant manager over a registry.
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self { registry }
    }

    /// Add a tenant to a running deployment.
    ///
    /// Rejects duplicates, enforces the deployment's tenant cap, and assigns
    /// the isolation handle for the spec's strategy. For numbered-database
    /// isolation the lowest unused index is assigned, so freed indices are
    /// reused.
    #[instrument(skip(self, limits), fields(deployment_id = %deployment_id, tenant_id = tenant_id))]
    pub async fn add_tenant(
        &self,
        deployment_id: Uuid,
        tenant_id: &str,
        limits: ResourceLimits,
    ) -> Result<Tenant> {
        validate_tenant_id(tenant_id)?;

        let mut record = self
            .registry
            .get(deployment_id)
            .await?
            .ok_or(CoreError::DeploymentNotFound { deployment_id })?;
        require_running(deployment_id, record.status)?;

        if record.tenants.iter().any(|t| t.tenant_id == tenant_id) {
            return Err(CoreError::DuplicateTenant {
                deployment_id,
                tenant_id: tenant_id.to_string(),
            });
        }
        if record.tenants.len() as i64 >= record.spec.tenancy.max_tenants {
            return Err(CoreError::TenantLimitExceeded {
                deployment_id,
                max_tenants: record.spec.tenancy.max_tenants,
            });
        }

        let isolation = assign_handle(deployment_id, &record.spec, &record.tenants, tenant_id)?;
        let tenant = Tenant {
            tenant_id: tenant_id.to_string(),
            isolation,
            limits,
            created_at: Utc::now(),
        };

        record.tenants.push(tenant.clone());
        self.registry.update(record).await?;

        info!(
            deployment_id = %deployment_id,
            tenant_id = tenant_id,
            tenant_count = "updated",
            "tenant added"
        );
        Ok(tenant)
    }

    /// Remove a tenant. Returns `false` when the tenant does not exist, so
    /// repeated removals are a no-op rather than an error.
    #[instrument(skip(self), fields(deployment_id = %deployment_id, tenant_id = tenant_id))]
    pub async fn remove_tenant(&self, deployment_id: Uuid, tenant_id: &str) -> Result<bool> {
        let mut record = self
            .registry
            .get(deployment_id)
            .await?
            .ok_or(CoreError::DeploymentNotFound { deployment_id })?;
        require_running(deployment_id, record.status)?;

        let Some(position) = record
            .tenants
            .iter()
            .position(|t| t.tenant_id == tenant_id)
        else {
            return Ok(false);
        };

        record.tenants.remove(position);
        self.registry.update(record).await?;

        info!(deployment_id = %deployment_id, tenant_id = tenant_id, "tenant removed");
        Ok(true)
    }

    /// List tenants in creation order.
    pub async fn list_tenants(&self, deployment_id: Uuid) -> Result<Vec<Tenant>> {
        let record = self
            .registry
            .get(deployment_id)
            .await?
            .ok_or(CoreError::DeploymentNotFound { deployment_id })?;
        Ok(record.tenants)
    }

    /// Build the connection descriptor for one tenant.
    pub async fn connection_descriptor(
        &self,
        deployment_id: Uuid,
        tenant_id: &str,
    ) -> Result<TenantConnection> {
        let record = self
            .registry
            .get(deployment_id)
            .await?
            .ok_or(CoreError::DeploymentNotFound { deployment_id })?;

        let tenant = record
            .tenants
            .iter()
            .find(|t| t.tenant_id == tenant_id)
            .ok_or_else(|| CoreError::ValidationError {
                field: "tenant_id".to_string(),
                message: format!("tenant '{}' not found in deployment", tenant_id),
            })?;

        Ok(connection_for(&record.spec, tenant))
    }
}

/// Pure descriptor construction; host is the deployment's service name.
pub(crate) fn connection_for(spec: &DatabaseSpec, tenant: &Tenant) -> TenantConnection {
    let (port, username) = match &spec.engine {
        EngineSpec::Postgresql(_) => (5432, "basin_app".to_string()),
        EngineSpec::Redis(redis) => {
            let port = if spec.security.tls.enabled {
                spec.security.tls.port.unwrap_or(6380)
            } else {
                6379
            };
            let username = if redis.acl.enabled
                && matches!(tenant.isolation, IsolationHandle::KeyPrefix { .. })
            {
                format!("tenant_{}", tenant.tenant_id)
            } else {
                "default".to_string()
            };
            (port, username)
        }
    };

    TenantConnection {
        host: spec.name.clone(),
        port,
        username,
        isolation: tenant.isolation.clone(),
    }
}

/// Assign the isolation handle for a new tenant.
///
/// Pure so the allocation rules are unit-testable without a registry.
pub(crate) fn assign_handle(
    deployment_id: Uuid,
    spec: &DatabaseSpec,
    existing: &[Tenant],
    tenant_id: &str,
) -> Result<IsolationHandle> {
    match spec.tenancy.isolation {
        IsolationStrategy::Schema => Ok(IsolationHandle::Schema {
            name: format!("{}{}", spec.tenancy.schema_prefix, tenant_id),
        }),
        IsolationStrategy::Database => Ok(IsolationHandle::Database {
            name: format!("{}_{}", spec.name, tenant_id),
        }),
        IsolationStrategy::KeyPrefix => {
            let pattern = spec
                .tenancy
                .naming_pattern
                .as_deref()
                .unwrap_or("{tenantId}:");
            Ok(IsolationHandle::KeyPrefix {
                prefix: pattern.replace("{tenantId}", tenant_id),
            })
        }
        IsolationStrategy::NumberedDatabase => {
            let capacity = match &spec.engine {
                EngineSpec::Redis(redis) => redis.databases,
                EngineSpec::Postgresql(_) => 0,
            };
            let used: BTreeSet<i64> = existing
                .iter()
                .filter_map(|t| match t.isolation {
                    IsolationHandle::DatabaseIndex { index } => Some(index),
                    _ => None,
                })
                .collect();
            // Lowest unused index, so freed slots are reused.
            let free = (0..capacity).find(|index| !used.contains(index));
            match free {
                Some(index) => Ok(IsolationHandle::DatabaseIndex { index }),
                None => Err(CoreError::CapacityExhausted {
                    deployment_id,
                    capacity,
                }),
            }
        }
    }
}

fn validate_tenant_id(tenant_id: &str) -> Result<()> {
    if tenant_id.is_empty() {
        return Err(CoreError::ValidationError {
            field: "tenant_id".to_string(),
            message: "must not be empty".to_string(),
        });
    }
    if tenant_id.len() > 63 {
        return Err(CoreError::ValidationError {
            field: "tenant_id".to_string(),
            message: "must be at most 63 characters".to_string(),
        });
    }
    if !tenant_id
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    {
        return Err(CoreError::ValidationError {
            field: "tenant_id".to_string(),
            message: "may only contain lowercase letters, digits, '-' and '_'".to_string(),
        });
    }
    Ok(())
}

fn require_running(deployment_id: Uuid, status: DeploymentStatus) -> Result<()> {
    if status != DeploymentStatus::Running {
        return Err(CoreError::InvalidDeploymentState {
            deployment_id,
            expected: DeploymentStatus::Running.as_str().to_string(),
            actual: status.as_str().to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{DeploymentRecord, MemoryRegistry};
    use crate::spec::{
        DeploymentMode, Environment, InstanceClass, PostgresEngineSpec, RedisEngineSpec,
        TenancySpec,
    };

    fn redis_spec(isolation: IsolationStrategy, max_tenants: i64) -> DatabaseSpec {
        DatabaseSpec {
            name: "cache".to_string(),
            version: "7.2".to_string(),
            environment: Environment::Development,
            instance_class: InstanceClass::Small,
            mode: DeploymentMode::Standalone,
            cluster: None,
            engine: EngineSpec::Redis(RedisEngineSpec {
                memory_mb: 512,
                databases: 16,
                maxmemory_policy: "noeviction".to_string(),
                append_only: false,
                acl: Default::default(),
                rename_commands: Default::default(),
            }),
            security: Default::default(),
            features: Default::default(),
            tenancy: TenancySpec {
                isolation,
                max_tenants,
                naming_pattern: None,
                schema_prefix: "tenant_".to_string(),
            },
        }
    }

    fn postgres_spec(isolation: IsolationStrategy, max_tenants: i64) -> DatabaseSpec {
        DatabaseSpec {
            name: "orders-db".to_string(),
            version: "16".to_string(),
            environment: Environment::Development,
            instance_class: InstanceClass::Medium,
            mode: DeploymentMode::Standalone,
            cluster: None,
            engine: EngineSpec::Postgresql(PostgresEngineSpec {
                storage_gb: 50,
                performance: Default::default(),
                replication: Default::default(),
                row_level_security: false,
            }),
            security: Default::default(),
            features: Default::default(),
            tenancy: TenancySpec {
                isolation,
                max_tenants,
                naming_pattern: None,
                schema_prefix: "tenant_".to_string(),
            },
        }
    }

    fn tenant_with_index(tenant_id: &str, index: i64) -> Tenant {
        Tenant {
            tenant_id: tenant_id.to_string(),
            isolation: IsolationHandle::DatabaseIndex { index },
            limits: ResourceLimits::default(),
            created_at: Utc::now(),
        }
    }

    async fn running_deployment(
        registry: &MemoryRegistry,
        spec: DatabaseSpec,
    ) -> DeploymentRecord {
        let mut record = DeploymentRecord::new("acme", spec);
        record.status = DeploymentStatus::Running;
        registry.create(record.clone()).await.expect("create");
        record
    }

    #[test]
    fn test_schema_handle_uses_prefix() {
        let spec = postgres_spec(IsolationStrategy::Schema, 4);
        let handle = assign_handle(Uuid::nil(), &spec, &[], "client-1").expect("handle");
        assert_eq!(
            handle,
            IsolationHandle::Schema {
                name: "tenant_client-1".to_string()
            }
        );
    }

    #[test]
    fn test_database_handle_uses_deployment_name() {
        let spec = postgres_spec(IsolationStrategy::Database, 4);
        let handle = assign_handle(Uuid::nil(), &spec, &[], "client-1").expect("handle");
        assert_eq!(
            handle,
            IsolationHandle::Database {
                name: "orders-db_client-1".to_string()
            }
        );
    }

    #[test]
    fn test_key_prefix_pattern_substitution() {
        let mut spec = redis_spec(IsolationStrategy::KeyPrefix, 4);
        spec.tenancy.naming_pattern = Some("{tenantId}:app:".to_string());
        let handle = assign_handle(Uuid::nil(), &spec, &[], "client-1").expect("handle");
        assert_eq!(
            handle,
            IsolationHandle::KeyPrefix {
                prefix: "client-1:app:".to_string()
            }
        );
    }

    #[test]
    fn test_key_prefix_default_pattern() {
        let spec = redis_spec(IsolationStrategy::KeyPrefix, 4);
        let handle = assign_handle(Uuid::nil(), &spec, &[], "client-1").expect("handle");
        assert_eq!(
            handle,
            IsolationHandle::KeyPrefix {
                prefix: "client-1:".to_string()
            }
        );
    }

    #[test]
    fn test_numbered_database_assigns_lowest_unused() {
        let spec = redis_spec(IsolationStrategy::NumberedDatabase, 16);
        let existing = vec![
            tenant_with_index("a", 0),
            tenant_with_index("b", 1),
            tenant_with_index("d", 3),
        ];
        // 2 was freed earlier and must be reused before 4.
        let handle = assign_handle(Uuid::nil(), &spec, &existing, "c").expect("handle");
        assert_eq!(handle, IsolationHandle::DatabaseIndex { index: 2 });
    }

    #[test]
    fn test_numbered_database_capacity_exhausted() {
        let spec = redis_spec(IsolationStrategy::NumberedDatabase, 32);
        let existing: Vec<Tenant> = (0..16)
            .map(|i| tenant_with_index(&format!("t{}", i), i))
            .collect();

        let err = assign_handle(Uuid::nil(), &spec, &existing, "t16")
            .expect_err("17th tenant should exhaust 16 logical databases");
        assert_eq!(err.error_code(), "CAPACITY_EXHAUSTED");
    }

    #[test]
    fn test_tenant_id_charset() {
        assert!(validate_tenant_id("client-1").is_ok());
        assert!(validate_tenant_id("").is_err());
        assert!(validate_tenant_id("Client").is_err());
        assert!(validate_tenant_id("a b").is_err());
    }

    #[tokio::test]
    async fn test_add_and_list_tenants() {
        let registry = Arc::new(MemoryRegistry::new());
        let record = running_deployment(&registry, redis_spec(IsolationStrategy::KeyPrefix, 4))
            .await;
        let manager = TenantManager::new(registry);

        manager
            .add_tenant(record.id, "client-1", ResourceLimits::default())
            .await
            .expect("first tenant");
        manager
            .add_tenant(record.id, "client-2", ResourceLimits::default())
            .await
            .expect("second tenant");

        let tenants = manager.list_tenants(record.id).await.expect("list");
        assert_eq!(tenants.len(), 2);
        assert_eq!(tenants[0].tenant_id, "client-1");
        assert_eq!(tenants[1].tenant_id, "client-2");
    }

    #[tokio::test]
    async fn test_duplicate_tenant_rejected() {
        let registry = Arc::new(MemoryRegistry::new());
        let record = running_deployment(&registry, redis_spec(IsolationStrategy::KeyPrefix, 4))
            .await;
        let manager = TenantManager::new(registry);

        manager
            .add_tenant(record.id, "client-1", ResourceLimits::default())
            .await
            .expect("first add");
        let err = manager
            .add_tenant(record.id, "client-1", ResourceLimits::default())
            .await
            .expect_err("duplicate should be rejected");
        assert_eq!(err.error_code(), "DUPLICATE_TENANT");
    }

    #[tokio::test]
    async fn test_tenant_cap_enforced() {
        let registry = Arc::new(MemoryRegistry::new());
        let record = running_deployment(&registry, redis_spec(IsolationStrategy::KeyPrefix, 1))
            .await;
        let manager = TenantManager::new(registry);

        manager
            .add_tenant(record.id, "client-1", ResourceLimits::default())
            .await
            .expect("first add");
        let err = manager
            .add_tenant(record.id, "client-2", ResourceLimits::default())
            .await
            .expect_err("cap of 1 should reject the second tenant");
        assert_eq!(err.error_code(), "TENANT_LIMIT_EXCEEDED");
    }

    #[tokio::test]
    async fn test_remove_tenant_is_idempotent() {
        let registry = Arc::new(MemoryRegistry::new());
        let record = running_deployment(&registry, redis_spec(IsolationStrategy::KeyPrefix, 4))
            .await;
        let manager = TenantManager::new(registry);

        manager
            .add_tenant(record.id, "client-1", ResourceLimits::default())
            .await
            .expect("add");
        assert!(manager.remove_tenant(record.id, "client-1").await.expect("remove"));
        assert!(!manager.remove_tenant(record.id, "client-1").await.expect("second remove"));
    }

    #[tokio::test]
    async fn test_tenant_ops_require_running_deployment() {
        let registry = Arc::new(MemoryRegistry::new());
        let mut record = DeploymentRecord::new(
            "acme",
            redis_spec(IsolationStrategy::KeyPrefix, 4),
        );
        record.status = DeploymentStatus::Provisioning;
        registry.create(record.clone()).await.expect("create");
        let manager = TenantManager::new(registry);

        let err = manager
            .add_tenant(record.id, "client-1", ResourceLimits::default())
            .await
            .expect_err("tenant add should require RUNNING");
        assert_eq!(err.error_code(), "INVALID_DEPLOYMENT_STATE");
    }

    #[tokio::test]
    async fn test_connection_descriptor_for_key_prefix_tenant() {
        let registry = Arc::new(MemoryRegistry::new());
        let record = running_deployment(&registry, redis_spec(IsolationStrategy::KeyPrefix, 4))
            .await;
        let manager = TenantManager::new(registry);

        manager
            .add_tenant(record.id, "client-1", ResourceLimits::default())
            .await
            .expect("add");
        let conn = manager
            .connection_descriptor(record.id, "client-1")
            .await
            .expect("descriptor");
        assert_eq!(conn.host, "cache");
        assert_eq!(conn.port, 6379);
        assert_eq!(
            conn.isolation,
            IsolationHandle::KeyPrefix {
                prefix: "client-1:".to_string()
            }
        );
    }
}
