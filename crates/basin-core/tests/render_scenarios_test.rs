// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end rendering scenarios: exact artifact content, determinism, and
//! tenant isolation behavior across both engines.

mod common;

use std::sync::Arc;

use common::*;

use basin_core::compiler::TemplateCompiler;
use basin_core::registry::Registry;
use basin_core::spec::{EngineSpec, IsolationStrategy};
use basin_core::tenant::{IsolationHandle, ResourceLimits, TenantManager};

#[test]
fn test_postgres_conf_carries_tuning_values() {
    let mut spec = postgres_spec("orders-db");
    if let EngineSpec::Postgresql(pg) = &mut spec.engine {
        pg.performance.max_connections = 300;
        pg.performance.shared_buffers = "512MB".to_string();
    }

    let compiler = TemplateCompiler::new();
    let report = compiler.validate(&spec);
    assert!(report.is_valid(), "unexpected errors: {:?}", report.errors);

    let artifacts = compiler.render(&spec, &[]);
    let conf = artifacts.get("postgresql.conf").expect("postgresql.conf");
    assert!(conf.contains("max_connections = 300"));
    assert!(conf.contains("shared_buffers = 512MB"));
}

#[test]
fn test_redis_cluster_renders_one_conf_per_node() {
    let spec = redis_cluster_spec("cache");

    let compiler = TemplateCompiler::new();
    assert!(compiler.validate(&spec).is_valid());

    let artifacts = compiler.render(&spec, &[]);

    // 3 shards x (1 primary + 1 replica) = 6 node configs.
    for i in 0..6 {
        assert!(
            artifacts.get(&format!("redis-node-{}.conf", i)).is_some(),
            "missing conf for node {}",
            i
        );
    }
    assert!(artifacts.get("redis-node-6.conf").is_none());

    let init = artifacts.get("cluster-init.sh").expect("cluster init script");
    assert!(init.contains("--cluster-replicas 1"));
}

#[test]
fn test_rendering_is_deterministic() {
    let compiler = TemplateCompiler::new();

    for spec in [postgres_spec("orders-db"), redis_cluster_spec("cache")] {
        let first = compiler.render(&spec, &[]);
        let second = compiler.render(&spec, &[]);

        assert_eq!(first.digest(), second.digest());
        for (name, content) in first.files() {
            assert_eq!(
                Some(content),
                second.get(name),
                "artifact {} differs between renders",
                name
            );
        }
    }
}

#[test]
fn test_negative_storage_is_reported_per_field() {
    let mut spec = postgres_spec("orders-db");
    if let EngineSpec::Postgresql(pg) = &mut spec.engine {
        pg.storage_gb = -10;
    }

    let report = TemplateCompiler::new().validate(&spec);
    assert!(!report.is_valid());
    assert!(report.has_error_on("storage_gb"));
}

#[tokio::test]
async fn test_key_prefix_tenants_follow_the_naming_pattern() {
    let ctx = TestContext::new();

    let mut spec = redis_cluster_spec("cache");
    spec.tenancy.naming_pattern = Some("{tenantId}:app:".to_string());

    let handle = ctx.orchestrator.deploy("acme", spec).await.unwrap();
    let deployment_id = handle.deployment_id();
    handle.wait().await.unwrap();

    let manager = TenantManager::new(ctx.registry.clone() as Arc<dyn Registry>);
    let tenant = manager
        .add_tenant(deployment_id, "client-1", ResourceLimits::default())
        .await
        .expect("tenant added");

    assert_eq!(
        tenant.isolation,
        IsolationHandle::KeyPrefix {
            prefix: "client-1:app:".to_string()
        }
    );

    let conn = manager
        .connection_descriptor(deployment_id, "client-1")
        .await
        .expect("descriptor");
    assert_eq!(conn.host, "cache");
    assert_eq!(conn.port, 6379);
}

#[tokio::test]
async fn test_numbered_database_capacity_is_sixteen() {
    let ctx = TestContext::new();

    let handle = ctx
        .orchestrator
        .deploy("acme", redis_standalone_spec("cache"))
        .await
        .unwrap();
    let deployment_id = handle.deployment_id();
    handle.wait().await.unwrap();

    let manager = TenantManager::new(ctx.registry.clone() as Arc<dyn Registry>);

    for i in 0..16 {
        let tenant = manager
            .add_tenant(
                deployment_id,
                &format!("client-{}", i),
                ResourceLimits::default(),
            )
            .await
            .expect("slot available");
        assert_eq!(
            tenant.isolation,
            IsolationHandle::DatabaseIndex { index: i as i64 }
        );
    }

    // All 16 logical databases are taken.
    let err = manager
        .add_tenant(deployment_id, "client-16", ResourceLimits::default())
        .await
        .expect_err("no free database index");
    assert_eq!(err.error_code(), "CAPACITY_EXHAUSTED");

    // Freeing an index makes it the next assignment.
    assert!(manager.remove_tenant(deployment_id, "client-3").await.unwrap());
    let tenant = manager
        .add_tenant(deployment_id, "client-16", ResourceLimits::default())
        .await
        .expect("freed slot reused");
    assert_eq!(tenant.isolation, IsolationHandle::DatabaseIndex { index: 3 });
}

#[tokio::test]
async fn test_schema_tenants_appear_in_rendered_init_sql() {
    let ctx = TestContext::new();

    let mut spec = postgres_spec("orders-db");
    spec.tenancy.isolation = IsolationStrategy::Schema;
    spec.tenancy.max_tenants = 8;

    let handle = ctx.orchestrator.deploy("acme", spec).await.unwrap();
    let deployment_id = handle.deployment_id();
    handle.wait().await.unwrap();

    let manager = TenantManager::new(ctx.registry.clone() as Arc<dyn Registry>);
    manager
        .add_tenant(deployment_id, "client-1", ResourceLimits::default())
        .await
        .unwrap();

    // Re-render with the current tenant set; the tenant's schema shows up.
    let record = ctx
        .orchestrator
        .deployment("acme", deployment_id)
        .await
        .unwrap();
    let artifacts = TemplateCompiler::new().render(&record.spec, &record.tenants);
    let init = artifacts.get("init.sql").expect("init.sql");
    assert!(init.contains("CREATE SCHEMA IF NOT EXISTS \"tenant_client-1\""));
}
