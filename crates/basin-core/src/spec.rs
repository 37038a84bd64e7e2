// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Declarative database specification.
//!
//! A [`DatabaseSpec`] is the immutable input of the control plane: it names
//! the engine, instance sizing, deployment mode, security posture, feature
//! set, and tenancy configuration. Unknown fields are rejected at
//! deserialization time; value-level constraints are checked by the
//! template compiler's `validate`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Database engine kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    /// PostgreSQL relational database.
    Postgresql,
    /// Redis in-memory store.
    Redis,
}

impl DatabaseKind {
    /// Stable lowercase name, used in logs and artifact headers.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgresql => "postgresql",
            Self::Redis => "redis",
        }
    }
}

/// Target environment; drives log verbosity and validation strictness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Local/iteration environment, verbose logging.
    Development,
    /// Pre-production environment.
    Staging,
    /// Production environment, quiet logging, strict recommendations.
    Production,
}

impl Environment {
    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }
}

/// Deployment mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    /// Single primary node (plus optional streaming replicas for PostgreSQL).
    Standalone,
    /// Sharded cluster; requires a [`ClusterTopologySpec`].
    Cluster,
}

/// Instance size class with plan-level ceilings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceClass {
    /// Smallest class, development only.
    Micro,
    /// Small workloads.
    Small,
    /// Default class.
    Medium,
    /// Heavy workloads.
    Large,
    /// Largest class offered.
    Xlarge,
}

impl InstanceClass {
    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Micro => "micro",
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
            Self::Xlarge => "xlarge",
        }
    }

    /// Maximum number of nodes (shards x replicas) this class may run.
    pub fn max_nodes(&self) -> i64 {
        match self {
            Self::Micro => 1,
            Self::Small => 3,
            Self::Medium => 6,
            Self::Large => 12,
            Self::Xlarge => 24,
        }
    }

    /// Maximum PostgreSQL storage in GB.
    pub fn max_storage_gb(&self) -> i64 {
        match self {
            Self::Micro => 10,
            Self::Small => 100,
            Self::Medium => 500,
            Self::Large => 2_000,
            Self::Xlarge => 8_000,
        }
    }

    /// Maximum Redis memory in MB.
    pub fn max_memory_mb(&self) -> i64 {
        match self {
            Self::Micro => 256,
            Self::Small => 2_048,
            Self::Medium => 8_192,
            Self::Large => 32_768,
            Self::Xlarge => 131_072,
        }
    }

    /// Per-node compute rate in USD per hour, used by cost estimation.
    pub fn hourly_usd(&self) -> f64 {
        match self {
            Self::Micro => 0.016,
            Self::Small => 0.034,
            Self::Medium => 0.068,
            Self::Large => 0.136,
            Self::Xlarge => 0.272,
        }
    }
}

/// Shard/replica layout requested for cluster mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterTopologySpec {
    /// Number of shards; must be >= 1.
    pub shards: i64,
    /// Replicas per shard; must be >= 0.
    pub replicas_per_shard: i64,
}

/// Declarative database specification, immutable once accepted.
///
/// Scaling updates only the topology portion of the snapshot (cluster
/// shards/replicas, PostgreSQL replication replicas); everything else is
/// fixed at deploy time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseSpec {
    /// Deployment name, unique per owner.
    pub name: String,
    /// Engine version, e.g. "16" or "7.2".
    pub version: String,
    /// Target environment.
    pub environment: Environment,
    /// Instance size class.
    pub instance_class: InstanceClass,
    /// Standalone or cluster.
    pub mode: DeploymentMode,
    /// Cluster topology; required when `mode` is `cluster`.
    #[serde(default)]
    pub cluster: Option<ClusterTopologySpec>,
    /// Engine-specific configuration, tagged by `kind`.
    pub engine: EngineSpec,
    /// Security posture.
    #[serde(default)]
    pub security: SecuritySpec,
    /// Optional features (monitoring, backup, autoscaling).
    #[serde(default)]
    pub features: FeatureSpec,
    /// Multi-tenancy configuration.
    #[serde(default)]
    pub tenancy: TenancySpec,
}

impl DatabaseSpec {
    /// The engine kind this spec targets.
    pub fn kind(&self) -> DatabaseKind {
        match self.engine {
            EngineSpec::Postgresql(_) => DatabaseKind::Postgresql,
            EngineSpec::Redis(_) => DatabaseKind::Redis,
        }
    }
}

/// Engine-specific configuration, a closed variant tagged by `kind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EngineSpec {
    /// PostgreSQL engine configuration.
    Postgresql(PostgresEngineSpec),
    /// Redis engine configuration.
    Redis(RedisEngineSpec),
}

/// PostgreSQL engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PostgresEngineSpec {
    /// Provisioned storage in GB; must be positive.
    pub storage_gb: i64,
    /// Performance tuning knobs, mapped 1:1 onto postgresql.conf keys.
    #[serde(default)]
    pub performance: PostgresTuning,
    /// Streaming replication settings.
    #[serde(default)]
    pub replication: ReplicationSpec,
    /// Emit tenant-scoped row-level-security definitions in init.sql.
    #[serde(default)]
    pub row_level_security: bool,
}

/// PostgreSQL tuning knobs. Memory sizes use the native "256MB" syntax.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PostgresTuning {
    /// `max_connections`; must be positive.
    pub max_connections: i64,
    /// `shared_buffers`, e.g. "256MB".
    pub shared_buffers: String,
    /// `work_mem`, e.g. "4MB".
    pub work_mem: String,
    /// `maintenance_work_mem`, e.g. "64MB".
    pub maintenance_work_mem: String,
    /// `effective_cache_size`, e.g. "1GB".
    pub effective_cache_size: String,
}

impl Default for PostgresTuning {
    fn default() -> Self {
        Self {
            max_connections: 100,
            shared_buffers: "256MB".to_string(),
            work_mem: "4MB".to_string(),
            maintenance_work_mem: "64MB".to_string(),
            effective_cache_size: "1GB".to_string(),
        }
    }
}

/// Streaming replication settings for standalone PostgreSQL.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplicationSpec {
    /// Enable streaming replication.
    #[serde(default)]
    pub enabled: bool,
    /// Number of replicas; must be >= 1 when enabled.
    #[serde(default)]
    pub replicas: i64,
}

/// Redis engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisEngineSpec {
    /// Memory budget in MB; drives `maxmemory`. Must be positive.
    pub memory_mb: i64,
    /// Number of logical databases (`databases`); also the capacity of the
    /// numbered-database isolation strategy. Cluster mode forces 1.
    #[serde(default = "default_redis_databases")]
    pub databases: i64,
    /// Eviction policy (`maxmemory-policy`).
    #[serde(default = "default_eviction_policy")]
    pub maxmemory_policy: String,
    /// Enable append-only persistence.
    #[serde(default)]
    pub append_only: bool,
    /// ACL configuration.
    #[serde(default)]
    pub acl: AclSpec,
    /// Dangerous-command renames; an empty target disables the command.
    #[serde(default)]
    pub rename_commands: BTreeMap<String, String>,
}

fn default_redis_databases() -> i64 {
    16
}

fn default_eviction_policy() -> String {
    "noeviction".to_string()
}

/// Redis ACL configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AclSpec {
    /// Emit a users.acl file and wire it into redis.conf.
    #[serde(default)]
    pub enabled: bool,
    /// Declared accounts, one `user` rule each.
    #[serde(default)]
    pub accounts: Vec<AclAccount>,
}

/// One declared ACL account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AclAccount {
    /// Account name.
    pub name: String,
    /// Allowed key patterns, e.g. "orders:*".
    pub key_patterns: Vec<String>,
    /// Allowed commands or command categories, e.g. "+get" or "+@read".
    pub commands: Vec<String>,
}

/// Security posture.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecuritySpec {
    /// TLS settings.
    #[serde(default)]
    pub tls: TlsSpec,
    /// Require password authentication.
    #[serde(default = "default_true")]
    pub password_auth: bool,
    /// Encrypt data at rest (volume-level; surfaced in manifests).
    #[serde(default)]
    pub encryption_at_rest: bool,
}

impl Default for SecuritySpec {
    fn default() -> Self {
        Self {
            tls: TlsSpec::default(),
            password_auth: true,
            encryption_at_rest: false,
        }
    }
}

fn default_true() -> bool {
    true
}

/// TLS settings. For Redis, enabling TLS disables the plaintext port and
/// moves traffic to `port` (default 6380).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsSpec {
    /// Enable TLS.
    #[serde(default)]
    pub enabled: bool,
    /// TLS port override; engine default when absent.
    #[serde(default)]
    pub port: Option<i64>,
}

/// Optional feature set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeatureSpec {
    /// Monitoring (slow-query capture, exporter sidecars).
    #[serde(default)]
    pub monitoring: MonitoringSpec,
    /// Scheduled backups.
    #[serde(default)]
    pub backup: BackupSpec,
    /// Horizontal autoscaling for clustered deployments.
    #[serde(default)]
    pub autoscaling: AutoscalingSpec,
}

/// Monitoring feature settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitoringSpec {
    /// Enable monitoring.
    #[serde(default)]
    pub enabled: bool,
    /// Slow-query threshold in milliseconds.
    #[serde(default = "default_slow_query_ms")]
    pub slow_query_ms: i64,
}

impl Default for MonitoringSpec {
    fn default() -> Self {
        Self {
            enabled: false,
            slow_query_ms: default_slow_query_ms(),
        }
    }
}

fn default_slow_query_ms() -> i64 {
    1_000
}

/// Backup feature settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackupSpec {
    /// Enable scheduled backups.
    #[serde(default)]
    pub enabled: bool,
    /// Cron schedule (5 fields).
    #[serde(default = "default_backup_schedule")]
    pub schedule: String,
    /// Days to keep local backups; drives pruning in the backup script.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    /// Full dump or incremental base backup.
    #[serde(default)]
    pub kind: BackupKind,
    /// Compress backups with gzip.
    #[serde(default)]
    pub compression: bool,
    /// Encrypt backups (symmetric, passphrase-derived).
    #[serde(default)]
    pub encryption: bool,
    /// Optional remote object-storage target, embedded as a copy step.
    #[serde(default)]
    pub remote: Option<RemoteStorageSpec>,
}

impl Default for BackupSpec {
    fn default() -> Self {
        Self {
            enabled: false,
            schedule: default_backup_schedule(),
            retention_days: default_retention_days(),
            kind: BackupKind::default(),
            compression: false,
            encryption: false,
            remote: None,
        }
    }
}

fn default_backup_schedule() -> String {
    "0 3 * * *".to_string()
}

fn default_retention_days() -> i64 {
    7
}

/// Backup mechanism.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    /// Full logical dump.
    #[default]
    Full,
    /// Incremental base backup.
    Incremental,
}

/// Remote object-storage target for backups.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteStorageSpec {
    /// Bucket name.
    pub bucket: String,
    /// Key prefix inside the bucket.
    #[serde(default)]
    pub prefix: String,
}

/// Autoscaling feature settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AutoscalingSpec {
    /// Enable the horizontal-scaling resource in the cluster bundle.
    #[serde(default)]
    pub enabled: bool,
    /// Upper bound for the scaling resource; must be >= the planned node count.
    #[serde(default = "default_max_capacity")]
    pub max_capacity: i64,
}

impl Default for AutoscalingSpec {
    fn default() -> Self {
        Self {
            enabled: false,
            max_capacity: default_max_capacity(),
        }
    }
}

fn default_max_capacity() -> i64 {
    3
}

/// Multi-tenancy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TenancySpec {
    /// How tenants sharing the instance are kept apart.
    #[serde(default)]
    pub isolation: IsolationStrategy,
    /// Maximum number of tenants; must be positive.
    #[serde(default = "default_max_tenants")]
    pub max_tenants: i64,
    /// Key-prefix pattern; `{tenantId}` is substituted. Defaults to
    /// `"{tenantId}:"` for the key-prefix strategy.
    #[serde(default)]
    pub naming_pattern: Option<String>,
    /// Prefix for schema-isolation handles.
    #[serde(default = "default_schema_prefix")]
    pub schema_prefix: String,
}

impl Default for TenancySpec {
    fn default() -> Self {
        Self {
            isolation: IsolationStrategy::default(),
            max_tenants: default_max_tenants(),
            naming_pattern: None,
            schema_prefix: default_schema_prefix(),
        }
    }
}

fn default_max_tenants() -> i64 {
    1
}

fn default_schema_prefix() -> String {
    "tenant_".to_string()
}

/// Tenant isolation strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationStrategy {
    /// One schema per tenant (PostgreSQL).
    #[default]
    Schema,
    /// One dedicated database per tenant (PostgreSQL).
    Database,
    /// One key prefix per tenant (Redis).
    KeyPrefix,
    /// One numbered logical database per tenant (Redis, capacity-bounded).
    NumberedDatabase,
}

impl IsolationStrategy {
    /// Stable snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Schema => "schema",
            Self::Database => "database",
            Self::KeyPrefix => "key_prefix",
            Self::NumberedDatabase => "numbered_database",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postgres_spec_roundtrip() {
        let json = r#"{
            "name": "orders-db",
            "version": "16",
            "environment": "production",
            "instance_class": "medium",
            "mode": "standalone",
            "engine": {
                "kind": "postgresql",
                "storage_gb": 50,
                "performance": {
                    "max_connections": 300,
                    "shared_buffers": "512MB",
                    "work_mem": "8MB",
                    "maintenance_work_mem": "128MB",
                    "effective_cache_size": "2GB"
                },
                "replication": { "enabled": true, "replicas": 2 }
            }
        }"#;

        let spec: DatabaseSpec = serde_json::from_str(json).expect("spec should parse");
        assert_eq!(spec.kind(), DatabaseKind::Postgresql);
        assert_eq!(spec.environment, Environment::Production);
        let EngineSpec::Postgresql(pg) = &spec.engine else {
            panic!("expected postgresql engine");
        };
        assert_eq!(pg.storage_gb, 50);
        assert_eq!(pg.performance.max_connections, 300);
        assert!(pg.replication.enabled);

        let serialized = serde_json::to_string(&spec).expect("spec should serialize");
        let reparsed: DatabaseSpec = serde_json::from_str(&serialized).expect("roundtrip");
        assert_eq!(reparsed.name, "orders-db");
    }

    #[test]
    fn test_redis_cluster_spec_parses() {
        let json = r#"{
            "name": "cache",
            "version": "7.2",
            "environment": "staging",
            "instance_class": "large",
            "mode": "cluster",
            "cluster": { "shards": 3, "replicas_per_shard": 1 },
            "engine": { "kind": "redis", "memory_mb": 2048 },
            "tenancy": { "isolation": "key_prefix", "max_tenants": 10 }
        }"#;

        let spec: DatabaseSpec = serde_json::from_str(json).expect("spec should parse");
        assert_eq!(spec.kind(), DatabaseKind::Redis);
        assert_eq!(spec.mode, DeploymentMode::Cluster);
        assert_eq!(
            spec.cluster,
            Some(ClusterTopologySpec {
                shards: 3,
                replicas_per_shard: 1
            })
        );
        let EngineSpec::Redis(redis) = &spec.engine else {
            panic!("expected redis engine");
        };
        assert_eq!(redis.databases, 16);
        assert_eq!(redis.maxmemory_policy, "noeviction");
        assert_eq!(spec.tenancy.isolation, IsolationStrategy::KeyPrefix);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let json = r#"{
            "name": "cache",
            "version": "7.2",
            "environment": "development",
            "instance_class": "micro",
            "mode": "standalone",
            "engine": { "kind": "redis", "memory_mb": 128, "bogus_knob": true }
        }"#;

        let result = serde_json::from_str::<DatabaseSpec>(json);
        assert!(result.is_err(), "unknown engine field should be rejected");
    }

    #[test]
    fn test_negative_numbers_parse_for_validation() {
        // Out-of-range numbers must survive deserialization so validate()
        // can report them per field instead of a parse failure.
        let json = r#"{
            "name": "orders-db",
            "version": "16",
            "environment": "development",
            "instance_class": "micro",
            "mode": "standalone",
            "engine": { "kind": "postgresql", "storage_gb": -10 }
        }"#;

        let spec: DatabaseSpec = serde_json::from_str(json).expect("spec should parse");
        let EngineSpec::Postgresql(pg) = &spec.engine else {
            panic!("expected postgresql engine");
        };
        assert_eq!(pg.storage_gb, -10);
    }

    #[test]
    fn test_instance_class_ceilings_monotonic() {
        let classes = [
            InstanceClass::Micro,
            InstanceClass::Small,
            InstanceClass::Medium,
            InstanceClass::Large,
            InstanceClass::Xlarge,
        ];
        for pair in classes.windows(2) {
            assert!(pair[0].max_nodes() < pair[1].max_nodes());
            assert!(pair[0].max_storage_gb() < pair[1].max_storage_gb());
            assert!(pair[0].max_memory_mb() < pair[1].max_memory_mb());
            assert!(pair[0].hourly_usd() < pair[1].hourly_usd());
        }
    }
}
