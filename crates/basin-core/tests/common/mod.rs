// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for basin-core integration tests.
//!
//! Provides a mock provisioning driver with controllable failures and a
//! TestContext wiring orchestrator, scheduler, and an in-memory registry.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use basin_core::compiler::ArtifactSet;
use basin_core::driver::ProvisioningDriver;
use basin_core::orchestrator::Orchestrator;
use basin_core::registry::{MemoryRegistry, NodeEndpoint, Registry};
use basin_core::scheduler::{PlanLimits, Scheduler, Topology};
use basin_core::spec::{
    ClusterTopologySpec, DatabaseSpec, DeploymentMode, EngineSpec, Environment, InstanceClass,
    PostgresEngineSpec, RedisEngineSpec,
};

/// Driver that fabricates endpoints and fails on demand.
pub struct MockDriver {
    pub fail_apply: AtomicBool,
    pub fail_scale: AtomicBool,
    pub fail_backup: AtomicBool,
    pub fail_teardown: AtomicBool,
    /// Artificial latency per driver call, in milliseconds.
    pub delay_ms: AtomicU64,
    pub apply_calls: AtomicUsize,
    pub scale_calls: AtomicUsize,
    pub backup_calls: AtomicUsize,
    pub teardown_calls: AtomicUsize,
    pub last_backup_script: Mutex<Option<String>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self {
            fail_apply: AtomicBool::new(false),
            fail_scale: AtomicBool::new(false),
            fail_backup: AtomicBool::new(false),
            fail_teardown: AtomicBool::new(false),
            delay_ms: AtomicU64::new(0),
            apply_calls: AtomicUsize::new(0),
            scale_calls: AtomicUsize::new(0),
            backup_calls: AtomicUsize::new(0),
            teardown_calls: AtomicUsize::new(0),
            last_backup_script: Mutex::new(None),
        }
    }

    async fn pause(&self) {
        let millis = self.delay_ms.load(Ordering::SeqCst);
        if millis > 0 {
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
    }

    fn endpoints(&self, topology: &Topology) -> Vec<NodeEndpoint> {
        (0..topology.total_nodes)
            .map(|i| NodeEndpoint {
                node: format!("node-{}", i),
                host: format!("10.0.0.{}", i + 1),
                port: 5432,
            })
            .collect()
    }
}

#[async_trait]
impl ProvisioningDriver for MockDriver {
    async fn apply(
        &self,
        _deployment_id: Uuid,
        _artifacts: &ArtifactSet,
        topology: &Topology,
    ) -> anyhow::Result<Vec<NodeEndpoint>> {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.fail_apply.load(Ordering::SeqCst) {
            anyhow::bail!("image pull failed");
        }
        Ok(self.endpoints(topology))
    }

    async fn scale(
        &self,
        _deployment_id: Uuid,
        _artifacts: &ArtifactSet,
        topology: &Topology,
    ) -> anyhow::Result<Vec<NodeEndpoint>> {
        self.scale_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.fail_scale.load(Ordering::SeqCst) {
            anyhow::bail!("node join timed out");
        }
        Ok(self.endpoints(topology))
    }

    async fn run_backup(&self, _deployment_id: Uuid, script: &str) -> anyhow::Result<()> {
        self.backup_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_backup_script.lock().unwrap() = Some(script.to_string());
        self.pause().await;
        if self.fail_backup.load(Ordering::SeqCst) {
            anyhow::bail!("backup volume full");
        }
        Ok(())
    }

    async fn teardown(&self, _deployment_id: Uuid) -> anyhow::Result<()> {
        self.teardown_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.fail_teardown.load(Ordering::SeqCst) {
            anyhow::bail!("volume detach failed");
        }
        Ok(())
    }

    async fn health_check(&self, _deployment_id: Uuid) -> anyhow::Result<bool> {
        Ok(true)
    }
}

/// Orchestrator over an in-memory registry and a mock driver.
pub struct TestContext {
    pub orchestrator: Orchestrator,
    pub registry: Arc<MemoryRegistry>,
    pub driver: Arc<MockDriver>,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_limits(PlanLimits::default())
    }

    pub fn with_limits(limits: PlanLimits) -> Self {
        let registry = Arc::new(MemoryRegistry::new());
        let driver = Arc::new(MockDriver::new());
        let scheduler = Arc::new(Scheduler::new(limits));
        let orchestrator = Orchestrator::new(
            registry.clone() as Arc<dyn Registry>,
            scheduler,
            driver.clone() as Arc<dyn ProvisioningDriver>,
        );
        Self {
            orchestrator,
            registry,
            driver,
        }
    }
}

/// A valid standalone PostgreSQL spec.
pub fn postgres_spec(name: &str) -> DatabaseSpec {
    DatabaseSpec {
        name: name.to_string(),
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
        tenancy: Default::default(),
    }
}

/// A valid 3x1 Redis cluster spec.
pub fn redis_cluster_spec(name: &str) -> DatabaseSpec {
    DatabaseSpec {
        name: name.to_string(),
        version: "7".to_string(),
        environment: Environment::Staging,
        instance_class: InstanceClass::Large,
        mode: DeploymentMode::Cluster,
        cluster: Some(ClusterTopologySpec {
            shards: 3,
            replicas_per_shard: 1,
        }),
        engine: EngineSpec::Redis(RedisEngineSpec {
            memory_mb: 4096,
            databases: 1,
            maxmemory_policy: "allkeys-lru".to_string(),
            append_only: true,
            acl: Default::default(),
            rename_commands: Default::default(),
        }),
        security: Default::default(),
        features: Default::default(),
        tenancy: basin_core::spec::TenancySpec {
            isolation: basin_core::spec::IsolationStrategy::KeyPrefix,
            max_tenants: 8,
            naming_pattern: None,
            schema_prefix: "tenant_".to_string(),
        },
    }
}

/// A valid standalone Redis spec using numbered-database isolation.
pub fn redis_standalone_spec(name: &str) -> DatabaseSpec {
    DatabaseSpec {
        name: name.to_string(),
        version: "7".to_string(),
        environment: Environment::Development,
        instance_class: InstanceClass::Small,
        mode: DeploymentMode::Standalone,
        cluster: None,
        engine: EngineSpec::Redis(RedisEngineSpec {
            memory_mb: 1024,
            databases: 16,
            maxmemory_policy: "noeviction".to_string(),
            append_only: false,
            acl: Default::default(),
            rename_commands: Default::default(),
        }),
        security: Default::default(),
        features: Default::default(),
        tenancy: basin_core::spec::TenancySpec {
            isolation: basin_core::spec::IsolationStrategy::NumberedDatabase,
            max_tenants: 64,
            naming_pattern: None,
            schema_prefix: "tenant_".to_string(),
        },
    }
}
