// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Redis template engine.
//!
//! Renders redis.conf (or one per-node config in cluster mode), the ACL
//! file, the cluster bootstrap script, compose and Kubernetes manifests, and
//! backup tooling. Cluster mode forces a single logical database; enabling
//! TLS disables the plaintext port entirely.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use super::backup::{BackupScriptParams, render_backup_script, render_restore_script};
use super::manifests::{
    ServiceDef, WorkloadParams, render_autoscaler, render_compose, render_configmap,
    render_init_job, render_secret, render_service, render_workload,
};
use super::{
    ArtifactSet, CostEstimate, EngineTemplates, HOURS_PER_MONTH, ValidationReport,
    bootstrap_credential, major_version,
};
use crate::scheduler::Topology;
use crate::spec::{
    DatabaseKind, DatabaseSpec, DeploymentMode, EngineSpec, Environment, RedisEngineSpec,
};
use crate::tenant::{IsolationHandle, Tenant};

const SUPPORTED_MAJORS: [&str; 2] = ["6", "7"];
const EXPORTER_IMAGE: &str = "oliver006/redis_exporter:v1.62.0";
const CONFIG_DIR: &str = "/etc/redis";
const DATA_DIR: &str = "/data";
const PORT: i64 = 6379;
const DEFAULT_TLS_PORT: i64 = 6380;

const KNOWN_POLICIES: [&str; 8] = [
    "noeviction",
    "allkeys-lru",
    "volatile-lru",
    "allkeys-lfu",
    "volatile-lfu",
    "allkeys-random",
    "volatile-random",
    "volatile-ttl",
];

/// Redis implementation of [`EngineTemplates`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RedisTemplates;

impl EngineTemplates for RedisTemplates {
    fn validate(&self, spec: &DatabaseSpec, report: &mut ValidationReport) {
        let EngineSpec::Redis(redis) = &spec.engine else {
            return;
        };

        if !SUPPORTED_MAJORS.contains(&major_version(&spec.version)) {
            report.add_error(
                "version",
                format!(
                    "unsupported redis version '{}' (supported majors: 6-7)",
                    spec.version
                ),
            );
        }

        if redis.memory_mb <= 0 {
            report.add_error("memory_mb", "must be positive");
        }

        if !(1..=64).contains(&redis.databases) {
            report.add_error("databases", "must be between 1 and 64");
        } else if spec.mode == DeploymentMode::Cluster && redis.databases != 1 {
            report.add_warning(
                "cluster mode only exposes logical database 0; 'databases' is forced to 1",
            );
        }

        if !KNOWN_POLICIES.contains(&redis.maxmemory_policy.as_str()) {
            report.add_error(
                "maxmemory_policy",
                format!("unknown eviction policy '{}'", redis.maxmemory_policy),
            );
        }

        if redis.acl.enabled {
            if redis.acl.accounts.is_empty() {
                report.add_error("acl.accounts", "must declare at least one account");
            }
            let mut seen = BTreeSet::new();
            for account in &redis.acl.accounts {
                if account.name.is_empty() {
                    report.add_error("acl.accounts", "account name must not be empty");
                    continue;
                }
                if !seen.insert(account.name.as_str()) {
                    report.add_error(
                        "acl.accounts",
                        format!("duplicate account name '{}'", account.name),
                    );
                }
                if account.key_patterns.is_empty() {
                    report.add_error(
                        "acl.accounts",
                        format!("account '{}' must declare key patterns", account.name),
                    );
                }
                if account.commands.is_empty() {
                    report.add_error(
                        "acl.accounts",
                        format!("account '{}' must declare allowed commands", account.name),
                    );
                }
            }
        }

        for source in redis.rename_commands.keys() {
            if source.is_empty() {
                report.add_error("rename_commands", "source command must not be empty");
            }
        }

        if spec.environment == Environment::Production && !redis.append_only {
            report.add_recommendation(
                "enable append-only persistence for production deployments",
            );
        }
    }

    fn render(&self, spec: &DatabaseSpec, tenants: &[Tenant]) -> ArtifactSet {
        let EngineSpec::Redis(redis) = &spec.engine else {
            return ArtifactSet::new();
        };
        let topology = Topology::for_spec(spec);
        let credential = bootstrap_credential(&spec.name);

        let mut artifacts = ArtifactSet::new();
        match spec.mode {
            DeploymentMode::Standalone => {
                artifacts.insert("redis.conf", render_conf(spec, redis, None, &credential));
            }
            DeploymentMode::Cluster => {
                for node in 0..topology.total_nodes {
                    artifacts.insert(
                        format!("redis-node-{}.conf", node),
                        render_conf(spec, redis, Some(node), &credential),
                    );
                }
                artifacts.insert("cluster-init.sh", render_cluster_init(spec, &topology));
            }
        }

        if redis.acl.enabled {
            artifacts.insert("users.acl", render_acl(spec, redis, tenants, &credential));
        }

        let backup = &spec.features.backup;
        let first_node = format!("{}-0", spec.name);
        if backup.enabled {
            let params = BackupScriptParams {
                name: &spec.name,
                host: &first_node,
                port: client_port(spec),
                kind: DatabaseKind::Redis,
                backup,
            };
            artifacts.insert("backup.sh", render_backup_script(&params));
            artifacts.insert("restore.sh", render_restore_script(&params));
        }

        artifacts.insert(
            "docker-compose.yml",
            render_compose(&compose_services(spec, redis, &topology, &credential)),
        );

        let image = format!("redis:{}", spec.version);
        // Configs, the ACL file, and scripts all land in the ConfigMap;
        // files() iterates in name order so the output is stable.
        let configmap = {
            let files: Vec<(&str, &str)> = artifacts
                .files()
                .filter(|(name, _)| {
                    name.ends_with(".conf") || name.ends_with(".acl") || name.ends_with(".sh")
                })
                .collect();
            render_configmap(&spec.name, &files)
        };
        artifacts.insert("k8s/configmap.yaml", configmap);
        artifacts.insert(
            "k8s/secret.yaml",
            render_secret(&spec.name, &[("password", credential.as_str())]),
        );

        let command = match spec.mode {
            DeploymentMode::Standalone => vec![
                "redis-server".to_string(),
                format!("{}/redis.conf", CONFIG_DIR),
            ],
            // Each pod picks its own config by StatefulSet ordinal.
            DeploymentMode::Cluster => vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                format!(
                    "exec redis-server {}/redis-node-${{HOSTNAME##*-}}.conf",
                    CONFIG_DIR
                ),
            ],
        };
        artifacts.insert(
            "k8s/workload.yaml",
            render_workload(&WorkloadParams {
                name: &spec.name,
                image: &image,
                replicas: topology.total_nodes,
                port: client_port(spec),
                command: Some(command),
                env: vec![],
                secret_env: vec![("REDIS_PASSWORD".to_string(), "password".to_string())],
                config_mount_path: CONFIG_DIR,
                data_mount_path: DATA_DIR,
                storage_gb: data_volume_gb(redis),
                probe_command: &probe_command(spec),
                encrypted_storage: spec.security.encryption_at_rest,
            }),
        );
        artifacts.insert(
            "k8s/service.yaml",
            render_service(&spec.name, client_port(spec)),
        );
        if spec.mode == DeploymentMode::Cluster {
            // Pods resolve through the headless service; the script defaults
            // to bare names elsewhere.
            let node_domain = format!(".{}", spec.name);
            let mut env: Vec<(&str, &str)> = vec![("NODE_DOMAIN", node_domain.as_str())];
            if redis.acl.enabled || spec.security.password_auth {
                env.push(("REDISCLI_AUTH", credential.as_str()));
            }
            artifacts.insert(
                "k8s/cluster-init-job.yaml",
                render_init_job(&spec.name, &image, "cluster-init.sh", &env),
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
        let EngineSpec::Redis(redis) = &spec.engine else {
            return CostEstimate::from_breakdown(BTreeMap::new());
        };
        let nodes = Topology::for_spec(spec).total_nodes as f64;

        let mut breakdown = BTreeMap::new();
        breakdown.insert(
            "compute".to_string(),
            spec.instance_class.hourly_usd() * HOURS_PER_MONTH * nodes,
        );
        breakdown.insert(
            "memory".to_string(),
            redis.memory_mb as f64 * 0.0105 * nodes,
        );
        if spec.features.backup.enabled {
            breakdown.insert(
                "backup".to_string(),
                redis.memory_mb as f64 / 1024.0 * 0.8,
            );
        }
        if spec.features.monitoring.enabled {
            breakdown.insert("monitoring".to_string(), 4.50);
        }
        CostEstimate::from_breakdown(breakdown)
    }
}

fn client_port(spec: &DatabaseSpec) -> i64 {
    if spec.security.tls.enabled {
        spec.security.tls.port.unwrap_or(DEFAULT_TLS_PORT)
    } else {
        PORT
    }
}

fn bus_port(spec: &DatabaseSpec) -> i64 {
    client_port(spec) + 10_000
}

fn data_volume_gb(redis: &RedisEngineSpec) -> i64 {
    // Twice the memory budget for RDB/AOF headroom, at least 1 GiB.
    ((redis.memory_mb * 2) / 1024).max(1)
}

fn probe_command(spec: &DatabaseSpec) -> String {
    if spec.security.tls.enabled {
        format!("redis-cli --tls --insecure -p {} ping", client_port(spec))
    } else {
        format!("redis-cli -p {} ping", PORT)
    }
}

fn render_conf(
    spec: &DatabaseSpec,
    redis: &RedisEngineSpec,
    node: Option<i64>,
    credential: &str,
) -> String {
    let mut out = String::new();
    match node {
        None => {
            let _ = writeln!(
                out,
                "# redis.conf for {} (redis {}, {})",
                spec.name,
                spec.version,
                spec.environment.as_str()
            );
        }
        Some(node) => {
            let _ = writeln!(
                out,
                "# redis-node-{}.conf for {} (redis {}, {})",
                node,
                spec.name,
                spec.version,
                spec.environment.as_str()
            );
        }
    }

    if spec.security.tls.enabled {
        out.push_str("port 0\n");
        let _ = writeln!(out, "tls-port {}", client_port(spec));
        let _ = writeln!(out, "tls-cert-file {}/tls/redis.crt", CONFIG_DIR);
        let _ = writeln!(out, "tls-key-file {}/tls/redis.key", CONFIG_DIR);
        let _ = writeln!(out, "tls-ca-cert-file {}/tls/ca.crt", CONFIG_DIR);
        if spec.mode == DeploymentMode::Cluster {
            out.push_str("tls-cluster yes\n");
        }
    } else {
        let _ = writeln!(out, "port {}", PORT);
    }
    out.push_str("bind 0.0.0.0\n");
    let _ = writeln!(out, "dir {}", DATA_DIR);

    out.push('\n');
    let _ = writeln!(out, "maxmemory {}mb", redis.memory_mb);
    let _ = writeln!(out, "maxmemory-policy {}", redis.maxmemory_policy);
    let databases = if spec.mode == DeploymentMode::Cluster {
        1
    } else {
        redis.databases
    };
    let _ = writeln!(out, "databases {}", databases);
    let _ = writeln!(
        out,
        "appendonly {}",
        if redis.append_only { "yes" } else { "no" }
    );

    let loglevel = match spec.environment {
        Environment::Development => "debug",
        Environment::Staging => "notice",
        Environment::Production => "warning",
    };
    let _ = writeln!(out, "loglevel {}", loglevel);

    if spec.mode == DeploymentMode::Cluster {
        out.push('\n');
        out.push_str("cluster-enabled yes\n");
        out.push_str("cluster-config-file nodes.conf\n");
        out.push_str("cluster-node-timeout 5000\n");
        // Explicit bus port: the client-port + 10000 default cannot be
        // derived when TLS zeroes the plaintext port.
        let _ = writeln!(out, "cluster-port {}", bus_port(spec));
    }

    if spec.features.monitoring.enabled {
        let slow = spec.features.monitoring.slow_query_ms;
        out.push('\n');
        // slowlog threshold is in microseconds
        let _ = writeln!(out, "slowlog-log-slower-than {}", slow * 1_000);
        out.push_str("slowlog-max-len 128\n");
        let _ = writeln!(out, "latency-monitor-threshold {}", slow);
    }

    out.push('\n');
    if redis.acl.enabled {
        let _ = writeln!(out, "aclfile {}/users.acl", CONFIG_DIR);
    } else if spec.security.password_auth {
        let _ = writeln!(out, "requirepass {}", credential);
        if spec.mode == DeploymentMode::Cluster {
            let _ = writeln!(out, "masterauth {}", credential);
        }
    }

    for (source, target) in &redis.rename_commands {
        let _ = writeln!(out, "rename-command {} \"{}\"", source, target);
    }

    out
}

fn render_acl(
    spec: &DatabaseSpec,
    redis: &RedisEngineSpec,
    tenants: &[Tenant],
    credential: &str,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# users.acl for {}", spec.name);
    let _ = writeln!(out, "user default on >{} ~* +@all", credential);

    for account in &redis.acl.accounts {
        let secret = bootstrap_credential(&format!("{}/acl/{}", spec.name, account.name));
        let patterns: Vec<String> = account
            .key_patterns
            .iter()
            .map(|p| format!("~{}", p))
            .collect();
        let _ = writeln!(
            out,
            "user {} on >{} {} {}",
            account.name,
            secret,
            patterns.join(" "),
            account.commands.join(" ")
        );
    }

    // Key-prefix tenants get a scoped account restricted to their prefix.
    for tenant in tenants {
        if let IsolationHandle::KeyPrefix { prefix } = &tenant.isolation {
            let secret =
                bootstrap_credential(&format!("{}/acl/tenant_{}", spec.name, tenant.tenant_id));
            let _ = writeln!(
                out,
                "user tenant_{} on >{} ~{}* +@all -@admin",
                tenant.tenant_id, secret, prefix
            );
        }
    }

    out
}

fn render_cluster_init(spec: &DatabaseSpec, topology: &Topology) -> String {
    let mut out = String::new();
    out.push_str("#!/bin/sh\n");
    let _ = writeln!(out, "# Form the {}-node cluster for {}", topology.total_nodes, spec.name);
    out.push_str("set -eu\n\n");
    let port = client_port(spec);
    // NODE_DOMAIN is the DNS suffix of the stateful nodes. The Kubernetes
    // init Job sets it to the headless service; on a compose network the
    // bare service names resolve, so it stays empty.
    out.push_str("NODE_DOMAIN=\"${NODE_DOMAIN:-}\"\n");
    let _ = writeln!(out, "TOTAL={}", topology.total_nodes);
    out.push_str("NODES=\"\"\n");
    out.push_str("i=0\n");
    out.push_str("while [ \"$i\" -lt \"$TOTAL\" ]; do\n");
    let _ = writeln!(
        out,
        "  NODES=\"$NODES {}-$i${{NODE_DOMAIN}}:{}\"",
        spec.name, port
    );
    out.push_str("  i=$(( i + 1 ))\n");
    out.push_str("done\n\n");
    let _ = writeln!(
        out,
        "until redis-cli -h {}-0${{NODE_DOMAIN}} -p {} ping; do sleep 2; done",
        spec.name, port
    );
    let _ = writeln!(
        out,
        "redis-cli --cluster create $NODES --cluster-replicas {} --cluster-yes",
        topology.replicas_per_shard
    );
    out
}

fn compose_services(
    spec: &DatabaseSpec,
    redis: &RedisEngineSpec,
    topology: &Topology,
    credential: &str,
) -> Vec<ServiceDef> {
    let image = format!("redis:{}", spec.version);
    let port = client_port(spec);
    let node_count = match spec.mode {
        DeploymentMode::Standalone => 1,
        DeploymentMode::Cluster => topology.total_nodes,
    };

    let mut services = Vec::new();
    for node in 0..node_count {
        let name = format!("{}-{}", spec.name, node);
        let conf_source = match spec.mode {
            DeploymentMode::Standalone => "./redis.conf".to_string(),
            DeploymentMode::Cluster => format!("./redis-node-{}.conf", node),
        };
        let mut volumes = vec![format!("{}:{}/redis.conf:ro", conf_source, CONFIG_DIR)];
        if redis.acl.enabled {
            volumes.push(format!("./users.acl:{}/users.acl:ro", CONFIG_DIR));
        }
        volumes.push(format!("{}-data:{}", name, DATA_DIR));

        services.push(ServiceDef {
            name,
            image: image.clone(),
            command: Some(format!("redis-server {}/redis.conf", CONFIG_DIR)),
            environment: vec![],
            ports: if node == 0 { vec![(port, port)] } else { vec![] },
            volumes,
            healthcheck: Some(probe_command(spec)),
            depends_on: vec![],
        });
    }

    // A one-shot companion forms the cluster once all nodes answer pings,
    // mirroring the Kubernetes init Job.
    if spec.mode == DeploymentMode::Cluster {
        let mut environment = Vec::new();
        if redis.acl.enabled || spec.security.password_auth {
            environment.push(("REDISCLI_AUTH".to_string(), credential.to_string()));
        }
        services.push(ServiceDef {
            name: format!("{}-cluster-init", spec.name),
            image: image.clone(),
            command: Some("/bin/sh /scripts/cluster-init.sh".to_string()),
            environment,
            ports: vec![],
            volumes: vec!["./cluster-init.sh:/scripts/cluster-init.sh:ro".to_string()],
            healthcheck: None,
            depends_on: (0..node_count)
                .map(|node| format!("{}-{}", spec.name, node))
                .collect(),
        });
    }

    let first_node = format!("{}-0", spec.name);
    if spec.features.monitoring.enabled {
        services.push(ServiceDef {
            name: format!("{}-metrics", spec.name),
            image: EXPORTER_IMAGE.to_string(),
            command: None,
            environment: vec![
                (
                    "REDIS_ADDR".to_string(),
                    format!("redis://{}:{}", first_node, port),
                ),
                ("REDIS_PASSWORD".to_string(), credential.to_string()),
            ],
            ports: vec![(9121, 9121)],
            volumes: vec![],
            healthcheck: None,
            depends_on: vec![first_node.clone()],
        });
    }

    if spec.features.backup.enabled {
        services.push(ServiceDef {
            name: format!("{}-backup", spec.name),
            image,
            command: Some(
                "/bin/sh -c \"while true; do /scripts/backup.sh; sleep 86400; done\"".to_string(),
            ),
            environment: vec![("REDISCLI_AUTH".to_string(), credential.to_string())],
            ports: vec![],
            volumes: vec![
                "./backup.sh:/scripts/backup.sh:ro".to_string(),
                format!("{}-backups:/backups", spec.name),
            ],
            healthcheck: None,
            depends_on: vec![first_node],
        });
    }

    services
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::TemplateCompiler;
    use crate::spec::{AclAccount, AclSpec, ClusterTopologySpec, InstanceClass, TenancySpec};

    fn standalone_spec() -> DatabaseSpec {
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
                isolation: crate::spec::IsolationStrategy::KeyPrefix,
                max_tenants: 8,
                naming_pattern: None,
                schema_prefix: "tenant_".to_string(),
            },
        }
    }

    fn cluster_spec(shards: i64, replicas_per_shard: i64) -> DatabaseSpec {
        let mut spec = standalone_spec();
        spec.instance_class = InstanceClass::Large;
        spec.mode = DeploymentMode::Cluster;
        spec.cluster = Some(ClusterTopologySpec {
            shards,
            replicas_per_shard,
        });
        spec
    }

    #[test]
    fn test_standalone_conf_basics() {
        let spec = standalone_spec();
        let artifacts = RedisTemplates.render(&spec, &[]);
        let conf = artifacts.get("redis.conf").expect("redis.conf");

        assert!(conf.contains("port 6379"));
        assert!(conf.contains("maxmemory 512mb"));
        assert!(conf.contains("maxmemory-policy noeviction"));
        assert!(conf.contains("databases 16"));
        assert!(conf.contains("appendonly no"));
        // password_auth defaults on, no ACL file
        assert!(conf.contains("requirepass "));
    }

    #[test]
    fn test_cluster_renders_one_conf_per_node() {
        let spec = cluster_spec(3, 1);
        let artifacts = RedisTemplates.render(&spec, &[]);

        let node_confs: Vec<&str> = artifacts
            .files()
            .map(|(name, _)| name)
            .filter(|name| name.starts_with("redis-node-") && name.ends_with(".conf"))
            .collect();
        assert_eq!(node_confs.len(), 6, "3 shards x (1 + 1 replica) = 6 nodes");

        let conf = artifacts.get("redis-node-0.conf").expect("node conf");
        assert!(conf.contains("cluster-enabled yes"));
        assert!(conf.contains("cluster-config-file nodes.conf"));
        assert!(conf.contains("cluster-port 16379"), "explicit bus port");
        assert!(conf.contains("databases 1"), "cluster forces one database");
    }

    #[test]
    fn test_tls_cluster_bus_port_follows_tls_port() {
        let mut spec = cluster_spec(3, 0);
        spec.security.tls.enabled = true;
        let artifacts = RedisTemplates.render(&spec, &[]);
        let conf = artifacts.get("redis-node-0.conf").expect("node conf");

        // Plaintext port is 0, so the bus port must be stated explicitly.
        assert!(conf.contains("port 0\n"));
        assert!(conf.contains("tls-port 6380"));
        assert!(conf.contains("tls-cluster yes"));
        assert!(conf.contains("cluster-port 16380"));
    }

    #[test]
    fn test_cluster_init_script() {
        let spec = cluster_spec(3, 1);
        let artifacts = RedisTemplates.render(&spec, &[]);
        let script = artifacts.get("cluster-init.sh").expect("cluster-init.sh");

        assert!(script.contains("--cluster-replicas 1"));
        assert!(script.contains("--cluster-yes"));
        assert!(script.contains("TOTAL=6"));
        // Node addresses take an optional DNS suffix so the same script
        // works against compose service names and StatefulSet pods.
        assert!(script.contains("NODE_DOMAIN=\"${NODE_DOMAIN:-}\""));
        assert!(script.contains("NODES=\"$NODES cache-$i${NODE_DOMAIN}:6379\""));
        assert!(script.contains("redis-cli -h cache-0${NODE_DOMAIN}"));
    }

    #[test]
    fn test_cluster_compose_has_init_companion() {
        let spec = cluster_spec(3, 1);
        let artifacts = RedisTemplates.render(&spec, &[]);
        let compose = artifacts.get("docker-compose.yml").expect("compose");

        assert!(compose.contains("  cache-cluster-init:\n"));
        assert!(compose.contains("./cluster-init.sh:/scripts/cluster-init.sh:ro"));
        assert!(compose.contains("/bin/sh /scripts/cluster-init.sh"));
        // The companion waits for every node.
        for node in 0..6 {
            assert!(
                compose.contains(&format!("- cache-{}", node)),
                "init must depend on node {}",
                node
            );
        }
        // requirepass is on by default, so cluster create must authenticate.
        assert!(compose.contains("REDISCLI_AUTH"));

        // The Kubernetes Job points the script at the headless service.
        let job = artifacts
            .get("k8s/cluster-init-job.yaml")
            .expect("init job");
        assert!(job.contains("- name: NODE_DOMAIN"));
        assert!(job.contains("value: \".cache\""));
        assert!(job.contains("- name: REDISCLI_AUTH"));
    }

    #[test]
    fn test_tls_disables_plaintext_port() {
        let mut spec = standalone_spec();
        spec.security.tls.enabled = true;
        let artifacts = RedisTemplates.render(&spec, &[]);
        let conf = artifacts.get("redis.conf").expect("redis.conf");

        assert!(conf.contains("port 0\n"));
        assert!(conf.contains("tls-port 6380"));
        assert!(conf.contains("tls-cert-file"));
    }

    #[test]
    fn test_acl_file_with_accounts_and_tenants() {
        let mut spec = standalone_spec();
        if let EngineSpec::Redis(redis) = &mut spec.engine {
            redis.acl = AclSpec {
                enabled: true,
                accounts: vec![AclAccount {
                    name: "reporting".to_string(),
                    key_patterns: vec!["reports:*".to_string()],
                    commands: vec!["+@read".to_string()],
                }],
            };
        }
        let tenants = vec![Tenant {
            tenant_id: "client-1".to_string(),
            isolation: IsolationHandle::KeyPrefix {
                prefix: "client-1:".to_string(),
            },
            limits: Default::default(),
            created_at: chrono::Utc::now(),
        }];

        let artifacts = RedisTemplates.render(&spec, &tenants);
        let acl = artifacts.get("users.acl").expect("users.acl");

        assert!(acl.contains("user default on >"));
        assert!(acl.contains("user reporting on >"));
        assert!(acl.contains("~reports:* +@read"));
        assert!(acl.contains("user tenant_client-1 on >"));
        assert!(acl.contains("~client-1:* +@all -@admin"));

        let conf = artifacts.get("redis.conf").expect("redis.conf");
        assert!(conf.contains("aclfile /etc/redis/users.acl"));
        assert!(!conf.contains("requirepass"), "aclfile replaces requirepass");
    }

    #[test]
    fn test_rename_commands_rendered_sorted() {
        let mut spec = standalone_spec();
        if let EngineSpec::Redis(redis) = &mut spec.engine {
            redis.rename_commands.insert("FLUSHALL".to_string(), String::new());
            redis.rename_commands.insert("CONFIG".to_string(), "ADMIN_CONFIG".to_string());
        }
        let artifacts = RedisTemplates.render(&spec, &[]);
        let conf = artifacts.get("redis.conf").expect("redis.conf");

        assert!(conf.contains("rename-command CONFIG \"ADMIN_CONFIG\""));
        assert!(conf.contains("rename-command FLUSHALL \"\""));
        let config_at = conf.find("rename-command CONFIG").expect("CONFIG line");
        let flush_at = conf.find("rename-command FLUSHALL").expect("FLUSHALL line");
        assert!(config_at < flush_at);
    }

    #[test]
    fn test_unknown_eviction_policy_rejected() {
        let mut spec = standalone_spec();
        if let EngineSpec::Redis(redis) = &mut spec.engine {
            redis.maxmemory_policy = "sometimes-lru".to_string();
        }
        let report = TemplateCompiler::new().validate(&spec);
        assert!(report.has_error_on("maxmemory_policy"));
    }

    #[test]
    fn test_acl_accounts_must_be_complete() {
        let mut spec = standalone_spec();
        if let EngineSpec::Redis(redis) = &mut spec.engine {
            redis.acl = AclSpec {
                enabled: true,
                accounts: vec![AclAccount {
                    name: "reporting".to_string(),
                    key_patterns: vec![],
                    commands: vec!["+@read".to_string()],
                }],
            };
        }
        let report = TemplateCompiler::new().validate(&spec);
        assert!(report.has_error_on("acl.accounts"));
    }

    #[test]
    fn test_monitoring_slowlog_threshold_in_micros() {
        let mut spec = standalone_spec();
        spec.features.monitoring.enabled = true;
        spec.features.monitoring.slow_query_ms = 50;
        let artifacts = RedisTemplates.render(&spec, &[]);
        let conf = artifacts.get("redis.conf").expect("redis.conf");

        assert!(conf.contains("slowlog-log-slower-than 50000"));
        assert!(conf.contains("latency-monitor-threshold 50"));
    }

    #[test]
    fn test_cost_estimate_for_cluster() {
        let spec = cluster_spec(3, 1); // 6 nodes, large class, 512 MB
        let estimate = RedisTemplates.estimate_cost(&spec);
        // compute: 0.136 * 730 * 6 = 595.68; memory: 512 * 0.0105 * 6 = 32.256
        assert_eq!(estimate.breakdown["compute"], 595.68);
        assert_eq!(estimate.breakdown["memory"], 32.26);
        assert_eq!(estimate.monthly_usd, 627.94);
    }
}
