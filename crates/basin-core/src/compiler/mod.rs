// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Template compiler: spec validation, artifact rendering, cost estimation.
//!
//! The compiler is a pure function of its input. `render` is deterministic:
//! identical `(spec, tenants)` always yields byte-identical artifacts, which
//! lets the registry compare digests and skip re-provisioning when nothing
//! changed. Engine-specific behavior lives behind [`EngineTemplates`] with
//! one implementation per engine kind, selected once per operation.

pub mod postgres;
pub mod redis;

mod backup;
mod manifests;

pub use self::postgres::PostgresTemplates;
pub use self::redis::RedisTemplates;

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::spec::{
    DatabaseKind, DatabaseSpec, DeploymentMode, EngineSpec, Environment, IsolationStrategy,
};
use crate::tenant::Tenant;

/// The complete bundle of rendered files for one deployment: logical
/// filename to content, ordered for deterministic digesting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactSet {
    files: BTreeMap<String, String>,
}

impl ArtifactSet {
    /// Create an empty artifact set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a rendered file under a logical name.
    pub fn insert(&mut self, name: impl Into<String>, content: impl Into<String>) {
        self.files.insert(name.into(), content.into());
    }

    /// Look up a rendered file by logical name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.files.get(name).map(String::as_str)
    }

    /// Iterate files in name order.
    pub fn files(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of files in the set.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// SHA-256 over the ordered (name, content) pairs, hex-encoded.
    ///
    /// Used by the registry as the idempotence key: an unchanged digest means
    /// re-provisioning can be skipped.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for (name, content) in &self.files {
            hasher.update(name.as_bytes());
            hasher.update([0u8]);
            hasher.update(content.as_bytes());
            hasher.update([0u8]);
        }
        let digest = hasher.finalize();
        let mut out = String::with_capacity(64);
        for byte in digest {
            let _ = write!(out, "{:02x}", byte);
        }
        out
    }
}

/// Result of validating a spec: per-field errors plus advisory output.
///
/// A failing report blocks the operation and never mutates the registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    /// Field path to error messages.
    pub errors: BTreeMap<String, Vec<String>>,
    /// Non-blocking warnings.
    pub warnings: Vec<String>,
    /// Suggestions for a better configuration.
    pub recommendations: Vec<String>,
}

impl ValidationReport {
    /// Whether the spec passed validation.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Total number of field errors.
    pub fn error_count(&self) -> usize {
        self.errors.values().map(Vec::len).sum()
    }

    /// Whether a specific field has at least one error.
    pub fn has_error_on(&self, field: &str) -> bool {
        self.errors.contains_key(field)
    }

    /// Record an error against a field.
    pub fn add_error(&mut self, field: &str, message: impl Into<String>) {
        self.errors
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    /// Record a non-blocking warning.
    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Record a configuration recommendation.
    pub fn add_recommendation(&mut self, message: impl Into<String>) {
        self.recommendations.push(message.into());
    }
}

/// Estimated monthly cost in USD with a per-component breakdown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostEstimate {
    /// Total monthly cost.
    pub monthly_usd: f64,
    /// Component name to monthly cost.
    pub breakdown: BTreeMap<String, f64>,
}

impl CostEstimate {
    /// Build an estimate from a breakdown, rounding to cents.
    pub fn from_breakdown(breakdown: BTreeMap<String, f64>) -> Self {
        let breakdown: BTreeMap<String, f64> =
            breakdown.into_iter().map(|(k, v)| (k, round_cents(v))).collect();
        let monthly_usd = round_cents(breakdown.values().sum());
        Self {
            monthly_usd,
            breakdown,
        }
    }
}

/// Round to whole cents.
pub(crate) fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Hours billed per month.
pub(crate) const HOURS_PER_MONTH: f64 = 730.0;

/// Engine-specific template capabilities: one implementation per
/// [`DatabaseKind`].
pub trait EngineTemplates: Send + Sync {
    /// Engine-specific validation; appends to the shared report.
    fn validate(&self, spec: &DatabaseSpec, report: &mut ValidationReport);

    /// Render the full artifact set for a validated spec. Pure and
    /// deterministic; callers must not pass an unvalidated spec.
    fn render(&self, spec: &DatabaseSpec, tenants: &[Tenant]) -> ArtifactSet;

    /// Estimate the monthly cost of running the spec.
    fn estimate_cost(&self, spec: &DatabaseSpec) -> CostEstimate;
}

static POSTGRES_TEMPLATES: PostgresTemplates = PostgresTemplates;
static REDIS_TEMPLATES: RedisTemplates = RedisTemplates;

/// Front door of the template compiler. Stateless; selects the engine
/// implementation once per operation.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateCompiler;

impl TemplateCompiler {
    /// Create a compiler.
    pub fn new() -> Self {
        Self
    }

    /// Validate a spec: shared structural checks plus engine-specific rules.
    pub fn validate(&self, spec: &DatabaseSpec) -> ValidationReport {
        let mut report = ValidationReport::default();
        validate_common(spec, &mut report);
        self.engine(spec.kind()).validate(spec, &mut report);
        debug!(
            name = %spec.name,
            kind = spec.kind().as_str(),
            errors = report.error_count(),
            warnings = report.warnings.len(),
            "spec validated"
        );
        report
    }

    /// Render the artifact set for a validated spec.
    ///
    /// Caller contract: the spec has passed [`validate`](Self::validate).
    /// Rendering an invalid spec is a bug in the caller and is not
    /// re-checked here.
    pub fn render(&self, spec: &DatabaseSpec, tenants: &[Tenant]) -> ArtifactSet {
        self.engine(spec.kind()).render(spec, tenants)
    }

    /// Estimate the monthly cost of a spec.
    pub fn estimate_cost(&self, spec: &DatabaseSpec) -> CostEstimate {
        self.engine(spec.kind()).estimate_cost(spec)
    }

    fn engine(&self, kind: DatabaseKind) -> &'static dyn EngineTemplates {
        match kind {
            DatabaseKind::Postgresql => &POSTGRES_TEMPLATES,
            DatabaseKind::Redis => &REDIS_TEMPLATES,
        }
    }
}

/// Structural validation shared by both engines.
fn validate_common(spec: &DatabaseSpec, report: &mut ValidationReport) {
    // Name: DNS-label-ish, also used in schema/database handles.
    if spec.name.is_empty() {
        report.add_error("name", "must not be empty");
    } else {
        if spec.name.len() > 63 {
            report.add_error("name", "must be at most 63 characters");
        }
        if !spec.name.chars().next().is_some_and(|c| c.is_ascii_lowercase()) {
            report.add_error("name", "must start with a lowercase letter");
        }
        if !spec
            .name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        {
            report.add_error(
                "name",
                "may only contain lowercase letters, digits, '-' and '_'",
            );
        }
    }

    if spec.version.is_empty() {
        report.add_error("version", "must not be empty");
    }

    match spec.mode {
        DeploymentMode::Cluster => match spec.cluster {
            None => report.add_error("cluster", "cluster mode requires a cluster topology"),
            Some(cluster) => {
                if cluster.shards < 1 {
                    report.add_error("cluster.shards", "must be at least 1");
                }
                if cluster.replicas_per_shard < 0 {
                    report.add_error("cluster.replicas_per_shard", "must not be negative");
                }
            }
        },
        DeploymentMode::Standalone => {
            if spec.cluster.is_some() {
                report.add_error("cluster", "cluster topology is only valid for cluster mode");
            }
        }
    }

    validate_tenancy(spec, report);
    validate_features(spec, report);

    if spec.environment == Environment::Production && !spec.security.tls.enabled {
        report.add_warning("TLS is disabled for a production deployment");
    }
    if spec.environment == Environment::Production && !spec.features.backup.enabled {
        report.add_recommendation("enable scheduled backups for production deployments");
    }
}

fn validate_tenancy(spec: &DatabaseSpec, report: &mut ValidationReport) {
    let tenancy = &spec.tenancy;

    if tenancy.max_tenants <= 0 {
        report.add_error("tenancy.max_tenants", "must be positive");
    }

    let supported = match spec.kind() {
        DatabaseKind::Postgresql => matches!(
            tenancy.isolation,
            IsolationStrategy::Schema | IsolationStrategy::Database
        ),
        DatabaseKind::Redis => matches!(
            tenancy.isolation,
            IsolationStrategy::KeyPrefix | IsolationStrategy::NumberedDatabase
        ),
    };
    if !supported {
        report.add_error(
            "tenancy.isolation",
            format!(
                "strategy '{}' is not supported by {}",
                tenancy.isolation.as_str(),
                spec.kind().as_str()
            ),
        );
    }

    if tenancy.isolation == IsolationStrategy::NumberedDatabase
        && spec.mode == DeploymentMode::Cluster
    {
        report.add_error(
            "tenancy.isolation",
            "numbered-database isolation is unavailable in cluster mode (only logical database 0 exists)",
        );
    }

    if tenancy.isolation == IsolationStrategy::KeyPrefix {
        if let Some(pattern) = &tenancy.naming_pattern {
            if !pattern.contains("{tenantId}") {
                report.add_error(
                    "tenancy.naming_pattern",
                    "must contain the '{tenantId}' placeholder",
                );
            }
        }
    }

    if tenancy.isolation == IsolationStrategy::Schema && tenancy.schema_prefix.is_empty() {
        report.add_error("tenancy.schema_prefix", "must not be empty");
    }
}

fn validate_features(spec: &DatabaseSpec, report: &mut ValidationReport) {
    let features = &spec.features;

    if features.monitoring.enabled && features.monitoring.slow_query_ms <= 0 {
        report.add_error("features.monitoring.slow_query_ms", "must be positive");
    }

    if features.backup.enabled {
        if features.backup.retention_days <= 0 {
            report.add_error("features.backup.retention_days", "must be positive");
        }
        if features.backup.schedule.split_whitespace().count() != 5 {
            report.add_error(
                "features.backup.schedule",
                "must be a 5-field cron expression",
            );
        }
        if let Some(remote) = &features.backup.remote {
            if remote.bucket.is_empty() {
                report.add_error("features.backup.remote.bucket", "must not be empty");
            }
        }
    }

    if features.autoscaling.enabled {
        if features.autoscaling.max_capacity <= 0 {
            report.add_error("features.autoscaling.max_capacity", "must be positive");
        }
        match spec.mode {
            DeploymentMode::Standalone => {
                report.add_warning("autoscaling has no effect for standalone deployments");
            }
            DeploymentMode::Cluster => {
                let planned = crate::scheduler::Topology::for_spec(spec).total_nodes;
                if features.autoscaling.max_capacity < planned {
                    report.add_error(
                        "features.autoscaling.max_capacity",
                        format!("must be at least the planned node count of {}", planned),
                    );
                }
            }
        }
    }
}

/// Deterministic bootstrap credential derived from the deployment name.
///
/// The rendered secret is a placeholder the provisioning driver rotates on
/// first start; deriving it keeps `render` a pure function.
pub(crate) fn bootstrap_credential(name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"basin-bootstrap:");
    hasher.update(name.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(24);
    for byte in digest.iter().take(12) {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

/// Parse a PostgreSQL memory size like "512MB" or "64kB" into bytes.
pub(crate) fn parse_mem_size(value: &str) -> Option<i64> {
    let value = value.trim();
    let split = value.find(|c: char| !c.is_ascii_digit())?;
    let (digits, unit) = value.split_at(split);
    let number: i64 = digits.parse().ok()?;
    let multiplier: i64 = match unit {
        "kB" | "KB" => 1 << 10,
        "MB" => 1 << 20,
        "GB" => 1 << 30,
        "TB" => 1 << 40,
        _ => return None,
    };
    number.checked_mul(multiplier)
}

/// Engine major version, i.e. everything before the first '.'.
pub(crate) fn major_version(version: &str) -> &str {
    version.split('.').next().unwrap_or(version)
}
