// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL template engine.
//!
//! Renders postgresql.conf, pg_hba.conf, bootstrap SQL, compose and
//! Kubernetes manifests, and backup tooling for a validated spec. Tuning
//! knobs map 1:1 onto postgresql.conf keys; environment drives the logging
//! profile.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use super::backup::{BackupScriptParams, render_backup_script, render_restore_script};
use super::manifests::{
    ServiceDef, WorkloadParams, render_autoscaler, render_compose, render_configmap,
    render_init_job, render_secret, render_service, render_workload,
};
use super::{
    ArtifactSet, CostEstimate, EngineTemplates, HOURS_PER_MONTH, ValidationReport,
    bootstrap_credential, major_version, parse_mem_size,
};
use crate::scheduler::Topology;
use crate::spec::{
    DatabaseKind, DatabaseSpec, DeploymentMode, EngineSpec, Environment, PostgresEngineSpec,
};
use crate::tenant::{IsolationHandle, Tenant};

const SUPPORTED_MAJORS: [&str; 5] = ["13", "14", "15", "16", "17"];
const EXPORTER_IMAGE: &str = "quay.io/prometheuscommunity/postgres-exporter:v0.15.0";
const CONFIG_DIR: &str = "/etc/postgresql";
const DATA_DIR: &str = "/var/lib/postgresql/data";
const PORT: i64 = 5432;

/// PostgreSQL implementation of [`EngineTemplates`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresTemplates;

impl EngineTemplates for PostgresTemplates {
    fn validate(&self, spec: &DatabaseSpec, report: &mut ValidationReport) {
        let EngineSpec::Postgresql(pg) = &spec.engine else {
            return;
        };

        if !SUPPORTED_MAJORS.contains(&major_version(&spec.version)) {
            report.add_error(
                "version",
                format!(
                    "unsupported postgresql version '{}' (supported majors: 13-17)",
                    spec.version
                ),
            );
        }

        if pg.storage_gb <= 0 {
            report.add_error("storage_gb", "must be positive");
        }

        if pg.performance.max_connections <= 0 {
            report.add_error("performance.max_connections", "must be positive");
        } else if pg.performance.max_connections > 1_000 {
            report.add_warning(
                "max_connections above 1000 usually needs a connection pooler in front",
            );
        }

        let mem_fields = [
            ("performance.shared_buffers", &pg.performance.shared_buffers),
            ("performance.work_mem", &pg.performance.work_mem),
            (
                "performance.maintenance_work_mem",
                &pg.performance.maintenance_work_mem,
            ),
            (
                "performance.effective_cache_size",
                &pg.performance.effective_cache_size,
            ),
        ];
        for (field, value) in mem_fields {
            if parse_mem_size(value).is_none() {
                report.add_error(field, format!("'{}' is not a memory size like '256MB'", value));
            }
        }

        if pg.replication.enabled && pg.replication.replicas < 1 {
            report.add_error(
                "replication.replicas",
                "must be at least 1 when replication is enabled",
            );
        }
        if !pg.replication.enabled && pg.replication.replicas > 0 {
            report.add_warning("replication.replicas is ignored while replication is disabled");
        }
        if pg.replication.enabled && spec.mode == DeploymentMode::Cluster {
            report.add_warning(
                "streaming replication settings are ignored in cluster mode; use replicas_per_shard",
            );
        }

        if pg.row_level_security
            && spec.tenancy.isolation == crate::spec::IsolationStrategy::Database
        {
            report.add_recommendation(
                "row-level security adds little on top of database isolation; consider schema isolation instead",
            );
        }
    }

    fn render(&self, spec: &DatabaseSpec, tenants: &[Tenant]) -> ArtifactSet {
        let EngineSpec::Postgresql(pg) = &spec.engine else {
            return ArtifactSet::new();
        };
        let topology = Topology::for_spec(spec);
        let credential = bootstrap_credential(&spec.name);

        let mut artifacts = ArtifactSet::new();
        artifacts.insert("postgresql.conf", render_postgresql_conf(spec, pg, &topology));
        artifacts.insert("pg_hba.conf", render_pg_hba(spec));
        artifacts.insert("init.sql", render_init_sql(spec, pg, tenants, &credential));

        let backup = &spec.features.backup;
        let primary_host = primary_service_name(&spec.name, spec.mode);
        if backup.enabled {
            let params = BackupScriptParams {
                name: &spec.name,
                host: &primary_host,
                port: PORT,
                kind: DatabaseKind::Postgresql,
                backup,
            };
            artifacts.insert("backup.sh", render_backup_script(&params));
            artifacts.insert("restore.sh", render_restore_script(&params));
        }

        artifacts.insert(
            "docker-compose.yml",
            render_compose(&compose_services(spec, pg, &topology, &credential)),
        );

        let image = format!("postgres:{}", spec.version);
        let cluster_init = if spec.mode == DeploymentMode::Cluster {
            Some(render_cluster_init(spec, &topology))
        } else {
            None
        };
        let configmap = {
            let mut files: Vec<(&str, &str)> = vec![
                ("postgresql.conf", artifacts.get("postgresql.conf").unwrap_or("")),
                ("pg_hba.conf", artifacts.get("pg_hba.conf").unwrap_or("")),
                ("init.sql", artifacts.get("init.sql").unwrap_or("")),
            ];
            if let Some(script) = artifacts.get("backup.sh") {
                files.push(("backup.sh", script));
            }
            if let Some(script) = &cluster_init {
                files.push(("cluster-init.sh", script.as_str()));
            }
            render_configmap(&spec.name, &files)
        };
        artifacts.insert("k8s/configmap.yaml", configmap);
        artifacts.insert(
            "k8s/secret.yaml",
            render_secret(&spec.name, &[("password", credential.as_str())]),
        );
        artifacts.insert(
            "k8s/workload.yaml",
            render_workload(&WorkloadParams {
                name: &spec.name,
                image: &image,
                replicas: topology.total_nodes,
                port: PORT,
                command: Some(vec![
                    "postgres".to_string(),
                    "-c".to_string(),
                    format!("config_file={}/postgresql.conf", CONFIG_DIR),
                    "-c".to_string(),
                    format!("hba_file={}/pg_hba.conf", CONFIG_DIR),
                ]),
                env: vec![("PGDATA".to_string(), format!("{}/pgdata", DATA_DIR))],
                secret_env: vec![("POSTGRES_PASSWORD".to_string(), "password".to_string())],
                config_mount_path: CONFIG_DIR,
                data_mount_path: DATA_DIR,
                storage_gb: pg.storage_gb,
                probe_command: "pg_isready -U postgres",
                encrypted_storage: spec.security.encryption_at_rest,
            }),
        );
        artifacts.insert("k8s/service.yaml", render_service(&spec.name, PORT));
        if spec.mode == DeploymentMode::Cluster {
            if let Some(script) = cluster_init {
                artifacts.insert("cluster-init.sh", script);
            }
            artifacts.insert(
                "k8s/cluster-init-job.yaml",
                render_init_job(&spec.name, &image, "cluster-init.sh", &[]),
            );
        }
        if spec.features.autoscaling.enabled && spec.mode == DeploymentMode::Cluster {
            artifacts.insert(
                "k8s/autoscaler.yaml",
                render_autoscaler(
                    &spec.name,
                    topology.total_nodes,
                    spec.features.autoscaling.max_capacity,
                ),
            );
        }

        let estimate = self.estimate_cost(spec);
        artifacts.insert(
            "cost-estimate.json",
            serde_json::to_string_pretty(&estimate).unwrap_or_default(),
        );

        artifacts
    }

    fn estimate_cost(&self, spec: &DatabaseSpec) -> CostEstimate {
        let EngineSpec::Postgresql(pg) = &spec.engine else {
            return CostEstimate::from_breakdown(BTreeMap::new());
        };
        let nodes = Topology::for_spec(spec).total_nodes as f64;

        let mut breakdown = BTreeMap::new();
        breakdown.insert(
            "compute".to_string(),
            spec.instance_class.hourly_usd() * HOURS_PER_MONTH * nodes,
        );
        breakdown.insert(
            "storage".to_string(),
            pg.storage_gb as f64 * 0.115 * nodes,
        );
        if spec.features.backup.enabled {
            breakdown.insert("backup".to_string(), pg.storage_gb as f64 * 0.05);
        }
        if spec.features.monitoring.enabled {
            breakdown.insert("monitoring".to_string(), 4.50);
        }
        CostEstimate::from_breakdown(breakdown)
    }
}

fn primary_service_name(name: &str, mode: DeploymentMode) -> String {
    match mode {
        DeploymentMode::Standalone => format!("{}-0", name),
        DeploymentMode::Cluster => format!("{}-s0", name),
    }
}

fn render_postgresql_conf(
    spec: &DatabaseSpec,
    pg: &PostgresEngineSpec,
    topology: &Topology,
) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "# postgresql.conf for {} (postgresql {}, {})",
        spec.name,
        spec.version,
        spec.environment.as_str()
    );
    out.push_str("listen_addresses = '*'\n");
    let _ = writeln!(out, "port = {}", PORT);
    out.push('\n');
    let _ = writeln!(out, "max_connections = {}", pg.performance.max_connections);
    let _ = writeln!(out, "shared_buffers = {}", pg.performance.shared_buffers);
    let _ = writeln!(out, "work_mem = {}", pg.performance.work_mem);
    let _ = writeln!(
        out,
        "maintenance_work_mem = {}",
        pg.performance.maintenance_work_mem
    );
    let _ = writeln!(
        out,
        "effective_cache_size = {}",
        pg.performance.effective_cache_size
    );

    out.push('\n');
    match spec.environment {
        Environment::Development => {
            out.push_str("log_statement = 'all'\n");
            out.push_str("log_min_duration_statement = 0\n");
            out.push_str("log_min_messages = info\n");
        }
        Environment::Staging => {
            out.push_str("log_statement = 'ddl'\n");
            out.push_str("log_min_duration_statement = 500\n");
            out.push_str("log_min_messages = notice\n");
        }
        Environment::Production => {
            out.push_str("log_statement = 'none'\n");
            out.push_str("log_min_duration_statement = 1000\n");
            out.push_str("log_min_messages = warning\n");
        }
    }

    let replicated = topology.replicas_per_shard > 0;
    if replicated {
        let senders = topology.replicas_per_shard + 2;
        out.push('\n');
        out.push_str("wal_level = replica\n");
        let _ = writeln!(out, "max_wal_senders = {}", senders);
        let _ = writeln!(out, "max_replication_slots = {}", senders);
        out.push_str("hot_standby = on\n");
    }

    if spec.features.monitoring.enabled {
        out.push('\n');
        out.push_str("shared_preload_libraries = 'pg_stat_statements'\n");
        out.push_str("pg_stat_statements.track = all\n");
        let _ = writeln!(
            out,
            "log_min_duration_statement = {}",
            spec.features.monitoring.slow_query_ms
        );
    }

    if spec.security.tls.enabled {
        out.push('\n');
        out.push_str("ssl = on\n");
        let _ = writeln!(out, "ssl_cert_file = '{}/tls/server.crt'", CONFIG_DIR);
        let _ = writeln!(out, "ssl_key_file = '{}/tls/server.key'", CONFIG_DIR);
    }

    out
}

fn render_pg_hba(spec: &DatabaseSpec) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# pg_hba.conf for {}", spec.name);
    out.push_str("local   all         all                       trust\n");

    let method = if spec.security.password_auth {
        "scram-sha-256"
    } else {
        "trust"
    };
    if spec.security.tls.enabled {
        let _ = writeln!(out, "hostssl all         all   0.0.0.0/0   {}", method);
        out.push_str("hostnossl all       all   0.0.0.0/0   reject\n");
    } else {
        let _ = writeln!(out, "host    all         all   0.0.0.0/0   {}", method);
    }
    if replicated(spec) {
        let _ = writeln!(
            out,
            "host    replication replicator 0.0.0.0/0 {}",
            method
        );
    }
    out
}

fn replicated(spec: &DatabaseSpec) -> bool {
    Topology::for_spec(spec).replicas_per_shard > 0
}

fn render_init_sql(
    spec: &DatabaseSpec,
    pg: &PostgresEngineSpec,
    tenants: &[Tenant],
    credential: &str,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "-- Bootstrap SQL for {}", spec.name);
    out.push_str("-- Idempotent: safe to re-run on every provisioning pass.\n\n");

    if spec.features.monitoring.enabled {
        out.push_str("CREATE EXTENSION IF NOT EXISTS pg_stat_statements;\n\n");
    }

    out.push_str("DO $$\n");
    out.push_str("BEGIN\n");
    out.push_str("  IF NOT EXISTS (SELECT FROM pg_roles WHERE rolname = 'basin_app') THEN\n");
    let _ = writeln!(
        out,
        "    CREATE ROLE basin_app LOGIN PASSWORD '{}';",
        credential
    );
    out.push_str("  END IF;\n");
    out.push_str("END\n");
    out.push_str("$$;\n");

    if replicated(spec) {
        out.push('\n');
        out.push_str("DO $$\n");
        out.push_str("BEGIN\n");
        out.push_str("  IF NOT EXISTS (SELECT FROM pg_roles WHERE rolname = 'replicator') THEN\n");
        let _ = writeln!(
            out,
            "    CREATE ROLE replicator REPLICATION LOGIN PASSWORD '{}';",
            credential
        );
        out.push_str("  END IF;\n");
        out.push_str("END\n");
        out.push_str("$$;\n");
    }

    for tenant in tenants {
        match &tenant.isolation {
            IsolationHandle::Schema { name } => {
                out.push('\n');
                let _ = writeln!(
                    out,
                    "CREATE SCHEMA IF NOT EXISTS \"{}\" AUTHORIZATION basin_app;",
                    name
                );
            }
            IsolationHandle::Database { name } => {
                out.push('\n');
                let _ = writeln!(
                    out,
                    "SELECT 'CREATE DATABASE \"{}\" OWNER basin_app'",
                    name
                );
                let _ = writeln!(
                    out,
                    "WHERE NOT EXISTS (SELECT FROM pg_database WHERE datname = '{}')\\gexec",
                    name
                );
            }
            // Redis handles never reach the PostgreSQL renderer.
            IsolationHandle::KeyPrefix { .. } | IsolationHandle::DatabaseIndex { .. } => {}
        }
    }

    if pg.row_level_security {
        out.push('\n');
        out.push_str("CREATE OR REPLACE FUNCTION current_tenant() RETURNS text\n");
        out.push_str("LANGUAGE sql STABLE AS $$\n");
        out.push_str("  SELECT current_setting('app.current_tenant', true)\n");
        out.push_str("$$;\n");
        out.push('\n');
        out.push_str(
            "CREATE OR REPLACE FUNCTION enable_tenant_isolation(target regclass) RETURNS void\n",
        );
        out.push_str("LANGUAGE plpgsql AS $$\n");
        out.push_str("BEGIN\n");
        out.push_str("  EXECUTE format('ALTER TABLE %s ENABLE ROW LEVEL SECURITY', target);\n");
        out.push_str("  EXECUTE format(\n");
        out.push_str(
            "    'CREATE POLICY tenant_isolation ON %s USING (tenant_id = current_tenant())',\n",
        );
        out.push_str("    target\n");
        out.push_str("  );\n");
        out.push_str("END\n");
        out.push_str("$$;\n");
    }

    if spec.features.monitoring.enabled {
        out.push('\n');
        out.push_str("CREATE SCHEMA IF NOT EXISTS monitoring;\n");
        out.push_str("CREATE OR REPLACE VIEW monitoring.slow_queries AS\n");
        out.push_str("SELECT query, calls, mean_exec_time, total_exec_time\n");
        out.push_str("FROM pg_stat_statements\n");
        let _ = writeln!(
            out,
            "WHERE mean_exec_time > {}",
            spec.features.monitoring.slow_query_ms
        );
        out.push_str("ORDER BY mean_exec_time DESC;\n");
    }

    out
}

fn compose_services(
    spec: &DatabaseSpec,
    pg: &PostgresEngineSpec,
    topology: &Topology,
    credential: &str,
) -> Vec<ServiceDef> {
    let image = format!("postgres:{}", spec.version);
    let command = format!(
        "postgres -c config_file={}/postgresql.conf -c hba_file={}/pg_hba.conf",
        CONFIG_DIR, CONFIG_DIR
    );
    let config_volumes = vec![
        format!("./postgresql.conf:{}/postgresql.conf:ro", CONFIG_DIR),
        format!("./pg_hba.conf:{}/pg_hba.conf:ro", CONFIG_DIR),
    ];

    let mut services = Vec::new();
    let shard_primaries: Vec<String> = (0..topology.shards)
        .map(|shard| match spec.mode {
            DeploymentMode::Standalone => format!("{}-0", spec.name),
            DeploymentMode::Cluster => format!("{}-s{}", spec.name, shard),
        })
        .collect();

    for (shard, primary) in shard_primaries.iter().enumerate() {
        let mut volumes = config_volumes.clone();
        volumes.push("./init.sql:/docker-entrypoint-initdb.d/init.sql:ro".to_string());
        volumes.push(format!("{}-data:{}", primary, DATA_DIR));
        services.push(ServiceDef {
            name: primary.clone(),
            image: image.clone(),
            command: Some(command.clone()),
            environment: vec![("POSTGRES_PASSWORD".to_string(), credential.to_string())],
            // Host port only for the first primary; others stay internal.
            ports: if shard == 0 {
                vec![(PORT, PORT)]
            } else {
                vec![]
            },
            volumes,
            healthcheck: Some("pg_isready -U postgres".to_string()),
            depends_on: vec![],
        });

        for replica in 1..=topology.replicas_per_shard {
            let replica_name = match spec.mode {
                DeploymentMode::Standalone => format!("{}-replica-{}", spec.name, replica),
                DeploymentMode::Cluster => format!("{}-s{}-r{}", spec.name, shard, replica),
            };
            let mut volumes = config_volumes.clone();
            volumes.push(format!("{}-data:{}", replica_name, DATA_DIR));
            let replica_command = format!(
                "/bin/sh -c \"until pg_basebackup -h {} -p {} -U replicator -D {} -R; do sleep 2; done && {}\"",
                primary, PORT, DATA_DIR, command
            );
            services.push(ServiceDef {
                name: replica_name,
                image: image.clone(),
                command: Some(replica_command),
                environment: vec![("PGPASSWORD".to_string(), credential.to_string())],
                ports: vec![],
                volumes,
                healthcheck: Some("pg_isready -U postgres".to_string()),
                depends_on: vec![primary.clone()],
            });
        }
    }

    let first_primary = shard_primaries[0].clone();
    if spec.features.monitoring.enabled {
        services.push(ServiceDef {
            name: format!("{}-metrics", spec.name),
            image: EXPORTER_IMAGE.to_string(),
            command: None,
            environment: vec![(
                "DATA_SOURCE_NAME".to_string(),
                format!(
                    "postgresql://postgres:{}@{}:{}/postgres?sslmode=disable",
                    credential, first_primary, PORT
                ),
            )],
            ports: vec![(9187, 9187)],
            volumes: vec![],
            healthcheck: None,
            depends_on: vec![first_primary.clone()],
        });
    }

    if spec.features.backup.enabled {
        services.push(ServiceDef {
            name: format!("{}-backup", spec.name),
            image,
            // The compose rendition approximates the cron schedule with a
            // daily loop; Kubernetes deployments use a CronJob instead.
            command: Some(
                "/bin/sh -c \"while true; do /scripts/backup.sh; sleep 86400; done\"".to_string(),
            ),
            environment: vec![("PGPASSWORD".to_string(), credential.to_string())],
            ports: vec![],
            volumes: vec![
                "./backup.sh:/scripts/backup.sh:ro".to_string(),
                format!("{}-backups:/backups", spec.name),
            ],
            healthcheck: None,
            depends_on: vec![first_primary],
        });
    }

    services
}

fn render_cluster_init(spec: &DatabaseSpec, topology: &Topology) -> String {
    let mut out = String::new();
    out.push_str("#!/bin/sh\n");
    let _ = writeln!(out, "# Apply bootstrap SQL to every shard primary of {}", spec.name);
    out.push_str("set -eu\n\n");
    let nodes_per_shard = 1 + topology.replicas_per_shard;
    let _ = writeln!(out, "SHARDS={}", topology.shards);
    let _ = writeln!(out, "NODES_PER_SHARD={}", nodes_per_shard);
    out.push_str("i=0\n");
    out.push_str("while [ \"$i\" -lt \"$SHARDS\" ]; do\n");
    let _ = writeln!(
        out,
        "  node=\"{}-$(( i * NODES_PER_SHARD )).{}\"",
        spec.name, spec.name
    );
    let _ = writeln!(out, "  until pg_isready -h \"$node\" -p {}; do sleep 2; done", PORT);
    let _ = writeln!(
        out,
        "  psql -h \"$node\" -p {} -U postgres -f /config/init.sql",
        PORT
    );
    out.push_str("  i=$(( i + 1 ))\n");
    out.push_str("done\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::TemplateCompiler;
    use crate::spec::{InstanceClass, PostgresTuning, ReplicationSpec};

    fn tuned_spec() -> DatabaseSpec {
        DatabaseSpec {
            name: "orders-db".to_string(),
            version: "16".to_string(),
            environment: Environment::Production,
            instance_class: InstanceClass::Medium,
            mode: DeploymentMode::Standalone,
            cluster: None,
            engine: EngineSpec::Postgresql(PostgresEngineSpec {
                storage_gb: 50,
                performance: PostgresTuning {
                    max_connections: 300,
                    shared_buffers: "512MB".to_string(),
                    work_mem: "8MB".to_string(),
                    maintenance_work_mem: "128MB".to_string(),
                    effective_cache_size: "2GB".to_string(),
                },
                replication: ReplicationSpec {
                    enabled: true,
                    replicas: 2,
                },
                row_level_security: false,
            }),
            security: Default::default(),
            features: Default::default(),
            tenancy: Default::default(),
        }
    }

    #[test]
    fn test_conf_carries_tuning_and_replication() {
        let spec = tuned_spec();
        let artifacts = PostgresTemplates.render(&spec, &[]);
        let conf = artifacts.get("postgresql.conf").expect("postgresql.conf");

        assert!(conf.contains("max_connections = 300"));
        assert!(conf.contains("shared_buffers = 512MB"));
        assert!(conf.contains("wal_level = replica"));
        assert!(conf.contains("max_wal_senders = 4"));
        assert!(conf.contains("max_replication_slots = 4"));
        assert!(conf.contains("hot_standby = on"));
    }

    #[test]
    fn test_production_logging_profile() {
        let spec = tuned_spec();
        let artifacts = PostgresTemplates.render(&spec, &[]);
        let conf = artifacts.get("postgresql.conf").expect("postgresql.conf");

        assert!(conf.contains("log_statement = 'none'"));
        assert!(conf.contains("log_min_messages = warning"));
    }

    #[test]
    fn test_development_logging_profile() {
        let mut spec = tuned_spec();
        spec.environment = Environment::Development;
        let artifacts = PostgresTemplates.render(&spec, &[]);
        let conf = artifacts.get("postgresql.conf").expect("postgresql.conf");

        assert!(conf.contains("log_statement = 'all'"));
        assert!(conf.contains("log_min_duration_statement = 0"));
    }

    #[test]
    fn test_tls_hba_rejects_plaintext() {
        let mut spec = tuned_spec();
        spec.security.tls.enabled = true;
        let artifacts = PostgresTemplates.render(&spec, &[]);
        let hba = artifacts.get("pg_hba.conf").expect("pg_hba.conf");
        let conf = artifacts.get("postgresql.conf").expect("postgresql.conf");

        assert!(hba.contains("hostssl"));
        assert!(hba.contains("hostnossl all       all   0.0.0.0/0   reject"));
        assert!(conf.contains("ssl = on"));
    }

    #[test]
    fn test_compose_has_one_service_per_node() {
        let spec = tuned_spec();
        let artifacts = PostgresTemplates.render(&spec, &[]);
        let compose = artifacts.get("docker-compose.yml").expect("compose");

        assert!(compose.contains("  orders-db-0:\n"));
        assert!(compose.contains("  orders-db-replica-1:\n"));
        assert!(compose.contains("  orders-db-replica-2:\n"));
        assert!(compose.contains("pg_basebackup -h orders-db-0"));
    }

    #[test]
    fn test_init_sql_creates_tenant_schemas() {
        let spec = tuned_spec();
        let tenants = vec![
            Tenant {
                tenant_id: "client-1".to_string(),
                isolation: IsolationHandle::Schema {
                    name: "tenant_client-1".to_string(),
                },
                limits: Default::default(),
                created_at: chrono::Utc::now(),
            },
            Tenant {
                tenant_id: "client-2".to_string(),
                isolation: IsolationHandle::Database {
                    name: "orders-db_client-2".to_string(),
                },
                limits: Default::default(),
                created_at: chrono::Utc::now(),
            },
        ];
        let artifacts = PostgresTemplates.render(&spec, &tenants);
        let init = artifacts.get("init.sql").expect("init.sql");

        assert!(init.contains(
            "CREATE SCHEMA IF NOT EXISTS \"tenant_client-1\" AUTHORIZATION basin_app;"
        ));
        assert!(init.contains("SELECT 'CREATE DATABASE \"orders-db_client-2\" OWNER basin_app'"));
        assert!(init.contains("\\gexec"));
    }

    #[test]
    fn test_rls_definitions_rendered_when_enabled() {
        let mut spec = tuned_spec();
        if let EngineSpec::Postgresql(pg) = &mut spec.engine {
            pg.row_level_security = true;
        }
        let artifacts = PostgresTemplates.render(&spec, &[]);
        let init = artifacts.get("init.sql").expect("init.sql");

        assert!(init.contains("current_setting('app.current_tenant', true)"));
        assert!(init.contains("enable_tenant_isolation"));
        assert!(init.contains("ENABLE ROW LEVEL SECURITY"));
    }

    #[test]
    fn test_monitoring_renders_exporter_and_views() {
        let mut spec = tuned_spec();
        spec.features.monitoring.enabled = true;
        spec.features.monitoring.slow_query_ms = 250;
        let artifacts = PostgresTemplates.render(&spec, &[]);

        let conf = artifacts.get("postgresql.conf").expect("conf");
        assert!(conf.contains("shared_preload_libraries = 'pg_stat_statements'"));
        assert!(conf.contains("log_min_duration_statement = 250"));

        let init = artifacts.get("init.sql").expect("init.sql");
        assert!(init.contains("monitoring.slow_queries"));
        assert!(init.contains("mean_exec_time > 250"));

        let compose = artifacts.get("docker-compose.yml").expect("compose");
        assert!(compose.contains("orders-db-metrics"));
        assert!(compose.contains("postgres-exporter"));
    }

    #[test]
    fn test_backup_artifacts_only_when_enabled() {
        let mut spec = tuned_spec();
        assert!(PostgresTemplates.render(&spec, &[]).get("backup.sh").is_none());

        spec.features.backup.enabled = true;
        let artifacts = PostgresTemplates.render(&spec, &[]);
        assert!(artifacts.get("backup.sh").is_some());
        assert!(artifacts.get("restore.sh").is_some());
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let mut spec = tuned_spec();
        spec.version = "9.6".to_string();
        let report = TemplateCompiler::new().validate(&spec);
        assert!(report.has_error_on("version"));
    }

    #[test]
    fn test_bad_memory_size_rejected() {
        let mut spec = tuned_spec();
        if let EngineSpec::Postgresql(pg) = &mut spec.engine {
            pg.performance.shared_buffers = "lots".to_string();
        }
        let report = TemplateCompiler::new().validate(&spec);
        assert!(report.has_error_on("performance.shared_buffers"));
    }

    #[test]
    fn test_cost_estimate_scales_with_nodes() {
        let spec = tuned_spec(); // 3 nodes, medium class
        let estimate = PostgresTemplates.estimate_cost(&spec);
        // compute: 0.068 * 730 * 3; storage: 50 * 0.115 * 3
        assert_eq!(estimate.breakdown["compute"], 148.92);
        assert_eq!(estimate.breakdown["storage"], 17.25);
        assert_eq!(estimate.monthly_usd, 166.17);
    }
}
