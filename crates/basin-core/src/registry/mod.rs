// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deployment registry: durable records with status tracking.
//!
//! The registry is the single source of truth for deployment state. Updates
//! are whole-record last-writer-wins; the per-deployment operation lease in
//! the scheduler is what prevents two mutating operations from interleaving.
//! Deleted deployments stay behind as tombstones so repeated deletes are
//! idempotent and names can be reused.
//!
//! Three backends share one trait: PostgreSQL for production, SQLite for
//! single-node setups, and an in-memory map for tests.

mod memory;
mod postgres;
mod sqlite;

pub use memory::MemoryRegistry;
pub use postgres::PostgresRegistry;
pub use sqlite::SqliteRegistry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::scheduler::Topology;
use crate::spec::{BackupKind, DatabaseSpec};
use crate::tenant::Tenant;

/// Deployment lifecycle status.
///
/// ```text
/// PENDING -> VALIDATING -> PROVISIONING -> RUNNING
///                                |            |------ SCALING ----> RUNNING
///                                |            |------ BACKING_UP -> RUNNING
///                                |            `------ DELETING ---> DELETED
///                                `-> FAILED  (any transitional step)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStatus {
    /// Accepted, not yet validated.
    Pending,
    /// Spec validation in progress.
    Validating,
    /// Infrastructure being applied.
    Provisioning,
    /// Serving traffic.
    Running,
    /// Topology change in progress.
    Scaling,
    /// Backup run in progress.
    BackingUp,
    /// Teardown in progress.
    Deleting,
    /// Torn down; record kept as a tombstone.
    Deleted,
    /// A transitional operation failed; only deletion leaves this state.
    Failed,
}

impl DeploymentStatus {
    /// Stable name, as stored in the registry.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Validating => "VALIDATING",
            Self::Provisioning => "PROVISIONING",
            Self::Running => "RUNNING",
            Self::Scaling => "SCALING",
            Self::BackingUp => "BACKING_UP",
            Self::Deleting => "DELETING",
            Self::Deleted => "DELETED",
            Self::Failed => "FAILED",
        }
    }

    /// Parse a stored status name.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(Self::Pending),
            "VALIDATING" => Some(Self::Validating),
            "PROVISIONING" => Some(Self::Provisioning),
            "RUNNING" => Some(Self::Running),
            "SCALING" => Some(Self::Scaling),
            "BACKING_UP" => Some(Self::BackingUp),
            "DELETING" => Some(Self::Deleting),
            "DELETED" => Some(Self::Deleted),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether the deployment is out of service. `FAILED` still accepts a
    /// delete; `DELETED` accepts nothing.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Deleted | Self::Failed)
    }

    /// Whether a transition to `next` is legal.
    pub fn can_transition(&self, next: DeploymentStatus) -> bool {
        use DeploymentStatus::*;
        matches!(
            (self, next),
            (Pending, Validating)
                | (Pending, Failed)
                | (Validating, Provisioning)
                | (Validating, Failed)
                | (Provisioning, Running)
                | (Provisioning, Failed)
                | (Running, Scaling)
                | (Running, BackingUp)
                | (Running, Deleting)
                | (Running, Failed)
                | (Scaling, Running)
                | (Scaling, Failed)
                | (BackingUp, Running)
                | (BackingUp, Failed)
                | (Deleting, Deleted)
                | (Deleting, Failed)
                | (Failed, Deleting)
        )
    }
}

/// One provisioned node and where to reach it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEndpoint {
    /// Node name, e.g. `orders-db-0`.
    pub node: String,
    /// Hostname or address.
    pub host: String,
    /// Client port.
    pub port: i64,
}

/// Outcome of one backup run, appended to the record's backup history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupOutcome {
    /// Backup mechanism used for this run.
    pub kind: BackupKind,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
    /// Whether the run succeeded.
    pub success: bool,
    /// Driver-reported error for failed runs.
    pub error: Option<String>,
}

/// Durable record of one deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRecord {
    /// Unique deployment ID.
    pub id: Uuid,
    /// Owning tenant of the control plane (customer/org).
    pub owner_id: String,
    /// The accepted spec snapshot. Scaling replaces the topology portion;
    /// everything else is immutable after deploy.
    pub spec: DatabaseSpec,
    /// Current lifecycle status.
    pub status: DeploymentStatus,
    /// Why the deployment is `FAILED`, when it is.
    pub failure_reason: Option<String>,
    /// Provisioned tenants, in creation order.
    pub tenants: Vec<Tenant>,
    /// Digest of the last rendered artifact set.
    pub artifact_digest: Option<String>,
    /// Node count of the current topology.
    pub replica_count: i64,
    /// Node endpoints reported by the provisioning driver.
    pub endpoints: Vec<NodeEndpoint>,
    /// Backup history, oldest first.
    pub backups: Vec<BackupOutcome>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

impl DeploymentRecord {
    /// Create a fresh `PENDING` record for a spec.
    pub fn new(owner_id: impl Into<String>, spec: DatabaseSpec) -> Self {
        let now = Utc::now();
        let replica_count = Topology::for_spec(&spec).total_nodes;
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            spec,
            status: DeploymentStatus::Pending,
            failure_reason: None,
            tenants: Vec::new(),
            artifact_digest: None,
            replica_count,
            endpoints: Vec::new(),
            backups: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The deployment name (unique per owner among live deployments).
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Bump the modification timestamp.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Filters for [`Registry::list`].
#[derive(Debug, Clone, Copy)]
pub struct ListQuery<'a> {
    /// Restrict to one owner.
    pub owner_id: Option<&'a str>,
    /// Restrict to one status.
    pub status: Option<DeploymentStatus>,
    /// Page size.
    pub limit: i64,
    /// Page offset.
    pub offset: i64,
}

impl Default for ListQuery<'_> {
    fn default() -> Self {
        Self {
            owner_id: None,
            status: None,
            limit: 100,
            offset: 0,
        }
    }
}

/// Storage backend for deployment records.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Insert a new record. Fails with `DeploymentAlreadyExists` when a live
    /// (non-deleted) record with the same owner and name exists.
    async fn create(&self, record: DeploymentRecord) -> Result<()>;

    /// Fetch a record by ID, tombstones included.
    async fn get(&self, id: Uuid) -> Result<Option<DeploymentRecord>>;

    /// Fetch the live (non-deleted) record with this owner and name.
    async fn find_by_name(&self, owner_id: &str, name: &str) -> Result<Option<DeploymentRecord>>;

    /// Replace a record wholesale (last-writer-wins). Fails with
    /// `DeploymentNotFound` when the record does not exist.
    async fn update(&self, record: DeploymentRecord) -> Result<()>;

    /// Hard-delete a record. Returns `false` when it did not exist. Normal
    /// teardown keeps a `DELETED` tombstone instead; this is for purging.
    async fn delete(&self, id: Uuid) -> Result<bool>;

    /// List records in creation order, filtered and paged.
    async fn list(&self, query: ListQuery<'_>) -> Result<Vec<DeploymentRecord>>;

    /// Count an owner's live deployments (everything but `DELETED` and
    /// `FAILED`). This is what the deploy quota is checked against.
    async fn count_active(&self, owner_id: &str) -> Result<i64>;

    /// Verify the backend is reachable.
    async fn health_check(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        let all = [
            DeploymentStatus::Pending,
            DeploymentStatus::Validating,
            DeploymentStatus::Provisioning,
            DeploymentStatus::Running,
            DeploymentStatus::Scaling,
            DeploymentStatus::BackingUp,
            DeploymentStatus::Deleting,
            DeploymentStatus::Deleted,
            DeploymentStatus::Failed,
        ];
        for status in all {
            assert_eq!(DeploymentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(DeploymentStatus::parse("RESTARTING"), None);
    }

    #[test]
    fn test_legal_transitions() {
        use DeploymentStatus::*;
        assert!(Pending.can_transition(Validating));
        assert!(Validating.can_transition(Provisioning));
        assert!(Provisioning.can_transition(Running));
        assert!(Running.can_transition(Scaling));
        assert!(Scaling.can_transition(Running));
        assert!(Running.can_transition(BackingUp));
        assert!(BackingUp.can_transition(Running));
        assert!(Running.can_transition(Deleting));
        assert!(Deleting.can_transition(Deleted));
        assert!(Failed.can_transition(Deleting));
    }

    #[test]
    fn test_illegal_transitions() {
        use DeploymentStatus::*;
        assert!(!Deleted.can_transition(Running));
        assert!(!Deleted.can_transition(Deleting));
        assert!(!Pending.can_transition(Running));
        assert!(!Scaling.can_transition(BackingUp));
        assert!(!Failed.can_transition(Running));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(DeploymentStatus::Deleted.is_terminal());
        assert!(DeploymentStatus::Failed.is_terminal());
        assert!(!DeploymentStatus::Running.is_terminal());
        assert!(!DeploymentStatus::Deleting.is_terminal());
    }

    #[test]
    fn test_new_record_defaults() {
        let spec: DatabaseSpec = serde_json::from_str(
            r#"{
                "name": "orders-db",
                "version": "16",
                "environment": "development",
                "instance_class": "medium",
                "mode": "standalone",
                "engine": {
                    "kind": "postgresql",
                    "storage_gb": 50,
                    "replication": { "enabled": true, "replicas": 2 }
                }
            }"#,
        )
        .expect("spec");

        let record = DeploymentRecord::new("acme", spec);
        assert_eq!(record.status, DeploymentStatus::Pending);
        assert_eq!(record.name(), "orders-db");
        assert_eq!(record.replica_count, 3);
        assert!(record.tenants.is_empty());
        assert!(record.artifact_digest.is_none());
    }
}
