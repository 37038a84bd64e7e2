// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deployment orchestration: drives the lifecycle state machine.
//!
//! Every mutating operation follows the same shape: admission (quota +
//! lease), artifact rendering, a persisted transitional status, then an async
//! task that calls the provisioning driver and records the outcome. The
//! returned [`OperationHandle`] resolves to the final status; callers that
//! fire-and-forget still get a consistent registry because the task owns the
//! lease for its whole run.
//!
//! The orchestrator is the only component that sets `FAILED`. Backup runs
//! are the one exception to failure handling: a failed backup is recorded on
//! the deployment's backup history and the deployment returns to `RUNNING`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::compiler::{CostEstimate, TemplateCompiler, ValidationReport};
use crate::driver::ProvisioningDriver;
use crate::error::{CoreError, Result};
use crate::registry::{
    BackupOutcome, DeploymentRecord, DeploymentStatus, ListQuery, Registry,
};
use crate::scheduler::{Lease, OperationKind, Scheduler};
use crate::spec::{BackupKind, DatabaseSpec, DeploymentMode, EngineSpec};

/// A status change on a deployment, broadcast to subscribers.
#[derive(Debug, Clone)]
pub struct DeploymentEvent {
    /// The deployment that changed.
    pub deployment_id: Uuid,
    /// The status it changed to.
    pub status: DeploymentStatus,
    /// When the change was persisted.
    pub at: DateTime<Utc>,
}

/// Requested topology change. Fields left `None` keep their current value.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScaleRequest {
    /// New shard count (cluster mode only).
    pub shards: Option<i64>,
    /// New replicas per shard; maps to streaming replicas for standalone
    /// PostgreSQL.
    pub replicas_per_shard: Option<i64>,
}

/// Options for an on-demand backup run.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackupOptions {
    /// Override the backup mechanism for this run.
    pub kind: Option<BackupKind>,
}

/// Handle on an in-flight operation. The underlying task keeps running if
/// the handle is dropped.
pub struct OperationHandle {
    deployment_id: Uuid,
    task: JoinHandle<DeploymentStatus>,
    registry: Arc<dyn Registry>,
}

impl std::fmt::Debug for OperationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationHandle")
            .field("deployment_id", &self.deployment_id)
            .finish_non_exhaustive()
    }
}

impl OperationHandle {
    fn new(
        deployment_id: Uuid,
        task: JoinHandle<DeploymentStatus>,
        registry: Arc<dyn Registry>,
    ) -> Self {
        Self {
            deployment_id,
            task,
            registry,
        }
    }

    /// Handle for an operation that finished during admission (no-op scale,
    /// delete of an already-deleted deployment).
    fn completed(
        deployment_id: Uuid,
        status: DeploymentStatus,
        registry: Arc<dyn Registry>,
    ) -> Self {
        Self {
            deployment_id,
            task: tokio::spawn(async move { status }),
            registry,
        }
    }

    /// The deployment this operation runs against.
    pub fn deployment_id(&self) -> Uuid {
        self.deployment_id
    }

    /// Whether the operation task has finished.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the operation to finish and return the deployment's status.
    pub async fn wait(self) -> Result<DeploymentStatus> {
        match self.task.await {
            Ok(status) => Ok(status),
            Err(err) if err.is_cancelled() => {
                // Cancelled via `cancel()`; the registry holds the outcome.
                let record = self.registry.get(self.deployment_id).await?;
                Ok(record
                    .map(|r| r.status)
                    .unwrap_or(DeploymentStatus::Failed))
            }
            Err(err) => Err(CoreError::ProvisioningFailure {
                deployment_id: self.deployment_id,
                reason: format!("operation task panicked: {}", err),
            }),
        }
    }

    /// Abort the operation. The lease is released by the aborted task; a
    /// deployment caught in a transitional status is marked `FAILED` so it
    /// never appears stuck.
    pub async fn cancel(&self) -> Result<()> {
        self.task.abort();
        // Aborting is asynchronous; give the task a scheduling turn so the
        // lease drop runs before we rewrite the record.
        tokio::task::yield_now().await;

        if let Some(mut record) = self.registry.get(self.deployment_id).await? {
            let transitional = matches!(
                record.status,
                DeploymentStatus::Pending
                    | DeploymentStatus::Validating
                    | DeploymentStatus::Provisioning
                    | DeploymentStatus::Scaling
                    | DeploymentStatus::BackingUp
                    | DeploymentStatus::Deleting
            );
            if transitional {
                record.status = DeploymentStatus::Failed;
                record.failure_reason = Some("operation cancelled".to_string());
                self.registry.update(record).await?;
                warn!(deployment_id = %self.deployment_id, "operation cancelled");
            }
        }
        Ok(())
    }
}

/// Coordinates compiler, scheduler, registry, and driver.
pub struct Orchestrator {
    registry: Arc<dyn Registry>,
    scheduler: Arc<Scheduler>,
    compiler: TemplateCompiler,
    driver: Arc<dyn ProvisioningDriver>,
    events: broadcast::Sender<DeploymentEvent>,
}

impl Orchestrator {
    /// Create an orchestrator over the given backends.
    pub fn new(
        registry: Arc<dyn Registry>,
        scheduler: Arc<Scheduler>,
        driver: Arc<dyn ProvisioningDriver>,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            registry,
            scheduler,
            compiler: TemplateCompiler::new(),
            driver,
            events,
        }
    }

    /// Subscribe to deployment status changes.
    pub fn subscribe(&self) -> broadcast::Receiver<DeploymentEvent> {
        self.events.subscribe()
    }

    /// Validate a spec without touching the registry.
    pub fn validate(&self, spec: &DatabaseSpec) -> ValidationReport {
        self.compiler.validate(spec)
    }

    /// Estimate the monthly cost of a spec.
    pub fn estimate_cost(&self, spec: &DatabaseSpec) -> CostEstimate {
        self.compiler.estimate_cost(spec)
    }

    /// Fetch one of the owner's deployments.
    pub async fn deployment(
        &self,
        owner_id: &str,
        deployment_id: Uuid,
    ) -> Result<DeploymentRecord> {
        self.owned_record(owner_id, deployment_id).await
    }

    /// Probe a running deployment's nodes through the driver.
    pub async fn healthy(&self, owner_id: &str, deployment_id: Uuid) -> Result<bool> {
        let record = self.owned_record(owner_id, deployment_id).await?;
        if record.status != DeploymentStatus::Running {
            return Ok(false);
        }
        self.driver
            .health_check(deployment_id)
            .await
            .map_err(|err| CoreError::ProvisioningFailure {
                deployment_id,
                reason: err.to_string(),
            })
    }

    /// List the owner's deployments in creation order.
    pub async fn list(&self, owner_id: &str) -> Result<Vec<DeploymentRecord>> {
        self.registry
            .list(ListQuery {
                owner_id: Some(owner_id),
                ..Default::default()
            })
            .await
    }

    /// Deploy a new database instance.
    ///
    /// Validation and quota failures reject the request without creating a
    /// record. On success the record is persisted in `PROVISIONING` before
    /// the handle is returned, so a crashed process never loses track of an
    /// in-flight deployment.
    #[instrument(skip(self, spec), fields(owner_id = owner_id, name = %spec.name))]
    pub async fn deploy(&self, owner_id: &str, spec: DatabaseSpec) -> Result<OperationHandle> {
        // 1. Validate. Failure never mutates the registry.
        let report = self.compiler.validate(&spec);
        if !report.is_valid() {
            return Err(CoreError::InvalidSpec { report });
        }

        // 2. Name uniqueness among the owner's live deployments.
        if self
            .registry
            .find_by_name(owner_id, &spec.name)
            .await?
            .is_some()
        {
            return Err(CoreError::DeploymentAlreadyExists {
                name: spec.name.clone(),
            });
        }

        // 3. Admission: deploy quota, spec quotas, operation lease.
        let mut record = DeploymentRecord::new(owner_id, spec);
        let active = self.registry.count_active(owner_id).await?;
        let lease = self.scheduler.admit(
            owner_id,
            record.id,
            OperationKind::Deploy,
            &record.spec,
            active,
        )?;
        let topology = self.scheduler.plan_topology(owner_id, &record.spec)?;

        // 4. Render and persist the transitional record.
        let artifacts = self.compiler.render(&record.spec, &record.tenants);
        record.artifact_digest = Some(artifacts.digest());
        record.replica_count = topology.total_nodes;
        record.status = DeploymentStatus::Provisioning;
        self.registry.create(record.clone()).await?;
        self.emit(record.id, DeploymentStatus::Provisioning);

        info!(deployment_id = %record.id, nodes = topology.total_nodes, "deployment admitted");

        // 5. The spawned task owns the lease for the driver call.
        let registry = Arc::clone(&self.registry);
        let driver = Arc::clone(&self.driver);
        let events = self.events.clone();
        let deployment_id = record.id;
        let task = tokio::spawn(async move {
            let _lease: Lease = lease;
            match driver.apply(deployment_id, &artifacts, &topology).await {
                Ok(endpoints) => {
                    record.endpoints = endpoints;
                    record.status = DeploymentStatus::Running;
                    record.failure_reason = None;
                    persist(&registry, &events, record).await
                }
                Err(err) => {
                    record.status = DeploymentStatus::Failed;
                    record.failure_reason = Some(err.to_string());
                    persist(&registry, &events, record).await
                }
            }
        });

        Ok(OperationHandle::new(
            deployment_id,
            task,
            Arc::clone(&self.registry),
        ))
    }

    /// Change a running deployment's topology.
    ///
    /// Only the topology portion of the spec snapshot changes; everything
    /// else is immutable after deploy. When the rendered artifacts are
    /// byte-identical to the current ones the operation completes
    /// immediately without touching the driver.
    #[instrument(skip(self), fields(owner_id = owner_id, deployment_id = %deployment_id))]
    pub async fn scale(
        &self,
        owner_id: &str,
        deployment_id: Uuid,
        request: ScaleRequest,
    ) -> Result<OperationHandle> {
        let mut record = self.owned_record(owner_id, deployment_id).await?;
        require_status(&record, DeploymentStatus::Running)?;

        let new_spec = apply_scale(&record.spec, request)?;
        let report = self.compiler.validate(&new_spec);
        if !report.is_valid() {
            return Err(CoreError::InvalidSpec { report });
        }

        let lease = self.scheduler.admit(
            owner_id,
            deployment_id,
            OperationKind::Scale,
            &new_spec,
            0,
        )?;
        let topology = self.scheduler.plan_topology(owner_id, &new_spec)?;

        let artifacts = self.compiler.render(&new_spec, &record.tenants);
        let digest = artifacts.digest();
        if record.artifact_digest.as_deref() == Some(digest.as_str()) {
            // Nothing would change; the lease drops here.
            info!(deployment_id = %deployment_id, "scale is a no-op");
            return Ok(OperationHandle::completed(
                deployment_id,
                record.status,
                Arc::clone(&self.registry),
            ));
        }

        record.status = DeploymentStatus::Scaling;
        self.registry.update(record.clone()).await?;
        self.emit(deployment_id, DeploymentStatus::Scaling);

        let registry = Arc::clone(&self.registry);
        let driver = Arc::clone(&self.driver);
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            let _lease: Lease = lease;
            match driver.scale(deployment_id, &artifacts, &topology).await {
                Ok(endpoints) => {
                    record.spec = new_spec;
                    record.artifact_digest = Some(digest);
                    record.replica_count = topology.total_nodes;
                    record.endpoints = endpoints;
                    record.status = DeploymentStatus::Running;
                    record.failure_reason = None;
                    persist(&registry, &events, record).await
                }
                Err(err) => {
                    record.status = DeploymentStatus::Failed;
                    record.failure_reason = Some(err.to_string());
                    persist(&registry, &events, record).await
                }
            }
        });

        Ok(OperationHandle::new(
            deployment_id,
            task,
            Arc::clone(&self.registry),
        ))
    }

    /// Run an on-demand backup.
    ///
    /// Works whether or not scheduled backups are enabled. A failed run is
    /// recorded on the backup history and the deployment returns to
    /// `RUNNING`; backups never fail a deployment.
    #[instrument(skip(self), fields(owner_id = owner_id, deployment_id = %deployment_id))]
    pub async fn backup(
        &self,
        owner_id: &str,
        deployment_id: Uuid,
        options: BackupOptions,
    ) -> Result<OperationHandle> {
        let mut record = self.owned_record(owner_id, deployment_id).await?;
        require_status(&record, DeploymentStatus::Running)?;

        let lease = self.scheduler.admit(
            owner_id,
            deployment_id,
            OperationKind::Backup,
            &record.spec,
            0,
        )?;

        // Render the script from a spec snapshot with backups forced on and
        // the requested mechanism applied.
        let mut backup_spec = record.spec.clone();
        backup_spec.features.backup.enabled = true;
        if let Some(kind) = options.kind {
            backup_spec.features.backup.kind = kind;
        }
        let kind = backup_spec.features.backup.kind;
        let artifacts = self.compiler.render(&backup_spec, &record.tenants);
        let script = artifacts.get("backup.sh").unwrap_or_default().to_string();

        record.status = DeploymentStatus::BackingUp;
        self.registry.update(record.clone()).await?;
        self.emit(deployment_id, DeploymentStatus::BackingUp);

        let registry = Arc::clone(&self.registry);
        let driver = Arc::clone(&self.driver);
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            let _lease: Lease = lease;
            let started_at = Utc::now();
            let outcome = driver.run_backup(deployment_id, &script).await;
            let finished_at = Utc::now();

            if let Err(err) = &outcome {
                warn!(
                    deployment_id = %deployment_id,
                    error = %err,
                    "backup run failed"
                );
            }
            record.backups.push(BackupOutcome {
                kind,
                started_at,
                finished_at,
                success: outcome.is_ok(),
                error: outcome.err().map(|e| e.to_string()),
            });
            record.status = DeploymentStatus::Running;
            persist(&registry, &events, record).await
        });

        Ok(OperationHandle::new(
            deployment_id,
            task,
            Arc::clone(&self.registry),
        ))
    }

    /// Tear a deployment down, keeping a `DELETED` tombstone.
    ///
    /// Idempotent: deleting an absent or already-deleted deployment returns
    /// a handle that resolves to `DELETED` without touching the driver.
    #[instrument(skip(self), fields(owner_id = owner_id, deployment_id = %deployment_id))]
    pub async fn delete(
        &self,
        owner_id: &str,
        deployment_id: Uuid,
    ) -> Result<OperationHandle> {
        let record = match self.registry.get(deployment_id).await? {
            Some(record) if record.owner_id == owner_id => record,
            _ => {
                return Ok(OperationHandle::completed(
                    deployment_id,
                    DeploymentStatus::Deleted,
                    Arc::clone(&self.registry),
                ));
            }
        };
        if record.status == DeploymentStatus::Deleted {
            return Ok(OperationHandle::completed(
                deployment_id,
                DeploymentStatus::Deleted,
                Arc::clone(&self.registry),
            ));
        }

        let lease = self.scheduler.admit(
            owner_id,
            deployment_id,
            OperationKind::Delete,
            &record.spec,
            0,
        )?;

        let mut record = record;
        record.status = DeploymentStatus::Deleting;
        self.registry.update(record.clone()).await?;
        self.emit(deployment_id, DeploymentStatus::Deleting);

        let registry = Arc::clone(&self.registry);
        let driver = Arc::clone(&self.driver);
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            let _lease: Lease = lease;
            match driver.teardown(deployment_id).await {
                Ok(()) => {
                    record.status = DeploymentStatus::Deleted;
                    record.failure_reason = None;
                    record.endpoints.clear();
                    persist(&registry, &events, record).await
                }
                Err(err) => {
                    record.status = DeploymentStatus::Failed;
                    record.failure_reason = Some(err.to_string());
                    persist(&registry, &events, record).await
                }
            }
        });

        Ok(OperationHandle::new(
            deployment_id,
            task,
            Arc::clone(&self.registry),
        ))
    }

    async fn owned_record(
        &self,
        owner_id: &str,
        deployment_id: Uuid,
    ) -> Result<DeploymentRecord> {
        match self.registry.get(deployment_id).await? {
            Some(record) if record.owner_id == owner_id => Ok(record),
            // Other owners' deployments are indistinguishable from absent.
            _ => Err(CoreError::DeploymentNotFound { deployment_id }),
        }
    }

    fn emit(&self, deployment_id: Uuid, status: DeploymentStatus) {
        let _ = self.events.send(DeploymentEvent {
            deployment_id,
            status,
            at: Utc::now(),
        });
    }
}

/// Persist a record and broadcast its status; returns the persisted status.
async fn persist(
    registry: &Arc<dyn Registry>,
    events: &broadcast::Sender<DeploymentEvent>,
    record: DeploymentRecord,
) -> DeploymentStatus {
    let deployment_id = record.id;
    let status = record.status;
    if let Err(err) = registry.update(record).await {
        error!(
            deployment_id = %deployment_id,
            error = %err,
            "failed to persist deployment status"
        );
        return status;
    }
    let _ = events.send(DeploymentEvent {
        deployment_id,
        status,
        at: Utc::now(),
    });
    status
}

fn require_status(record: &DeploymentRecord, expected: DeploymentStatus) -> Result<()> {
    if record.status != expected {
        return Err(CoreError::InvalidDeploymentState {
            deployment_id: record.id,
            expected: expected.as_str().to_string(),
            actual: record.status.as_str().to_string(),
        });
    }
    Ok(())
}

/// Apply a scale request to a spec snapshot, returning the new spec.
fn apply_scale(spec: &DatabaseSpec, request: ScaleRequest) -> Result<DatabaseSpec> {
    let mut new_spec = spec.clone();
    match new_spec.mode {
        DeploymentMode::Cluster => {
            let mut cluster = new_spec.cluster.unwrap_or(crate::spec::ClusterTopologySpec {
                shards: 1,
                replicas_per_shard: 0,
            });
            if let Some(shards) = request.shards {
                cluster.shards = shards;
            }
            if let Some(replicas) = request.replicas_per_shard {
                cluster.replicas_per_shard = replicas;
            }
            new_spec.cluster = Some(cluster);
        }
        DeploymentMode::Standalone => {
            if request.shards.is_some_and(|shards| shards != 1) {
                return Err(CoreError::ValidationError {
                    field: "shards".to_string(),
                    message: "standalone deployments cannot be sharded; redeploy in cluster mode"
                        .to_string(),
                });
            }
            if let Some(replicas) = request.replicas_per_shard {
                match &mut new_spec.engine {
                    EngineSpec::Postgresql(pg) => {
                        pg.replication.replicas = replicas;
                        pg.replication.enabled = replicas > 0;
                    }
                    EngineSpec::Redis(_) => {
                        return Err(CoreError::ValidationError {
                            field: "replicas_per_shard".to_string(),
                            message: "standalone redis cannot scale horizontally; redeploy in cluster mode"
                                .to_string(),
                        });
                    }
                }
            }
        }
    }
    Ok(new_spec)
}
