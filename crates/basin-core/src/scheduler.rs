// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Admission control and per-deployment operation serialization.
//!
//! The scheduler enforces plan-level quotas (concurrent deployments, tenant
//! caps, instance-class ceilings) and hands out at most one [`Lease`] per
//! deployment. A lease is the exclusive right to mutate that deployment; it
//! is released when dropped, so success, failure, and task cancellation all
//! release it the same way. There is no queueing: a second mutating
//! operation on the same deployment is rejected immediately with
//! `OperationInProgress`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::spec::{DatabaseSpec, DeploymentMode, EngineSpec};

/// The mutating operations that require a lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Initial provisioning.
    Deploy,
    /// Topology change.
    Scale,
    /// On-demand backup run.
    Backup,
    /// Teardown.
    Delete,
}

impl OperationKind {
    /// Stable lowercase name, used in logs and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deploy => "deploy",
            Self::Scale => "scale",
            Self::Backup => "backup",
            Self::Delete => "delete",
        }
    }
}

/// Shard/replica layout planned for a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Topology {
    /// Number of shards (1 for standalone).
    pub shards: i64,
    /// Replicas per shard.
    pub replicas_per_shard: i64,
    /// Total node count: `shards * (1 + replicas_per_shard)`.
    pub total_nodes: i64,
}

impl Topology {
    /// Derive the topology a spec asks for. Pure; ceilings are checked by
    /// [`Scheduler::plan_topology`].
    ///
    /// Standalone PostgreSQL with streaming replication counts its replicas
    /// as replicas of a single shard, so the node total stays
    /// `shards * (1 + replicas_per_shard)` in every mode.
    pub fn for_spec(spec: &DatabaseSpec) -> Self {
        let (shards, replicas_per_shard) = match spec.mode {
            DeploymentMode::Cluster => {
                let cluster = spec.cluster.unwrap_or(crate::spec::ClusterTopologySpec {
                    shards: 1,
                    replicas_per_shard: 0,
                });
                (cluster.shards, cluster.replicas_per_shard)
            }
            DeploymentMode::Standalone => {
                let replicas = match &spec.engine {
                    EngineSpec::Postgresql(pg) if pg.replication.enabled => {
                        pg.replication.replicas
                    }
                    _ => 0,
                };
                (1, replicas)
            }
        };

        Self {
            shards,
            replicas_per_shard,
            total_nodes: shards * (1 + replicas_per_shard),
        }
    }
}

/// Plan-level quotas enforced at admission time.
#[derive(Debug, Clone, Copy)]
pub struct PlanLimits {
    /// Maximum concurrent (non-deleted) deployments per owner.
    pub max_concurrent_deployments: i64,
    /// Maximum tenant cap a spec may declare.
    pub max_tenants_per_deployment: i64,
}

impl Default for PlanLimits {
    fn default() -> Self {
        Self {
            max_concurrent_deployments: 8,
            max_tenants_per_deployment: 64,
        }
    }
}

/// Admission controller and lease issuer.
pub struct Scheduler {
    limits: PlanLimits,
    inflight: Arc<Mutex<HashMap<Uuid, OperationKind>>>,
}

impl Scheduler {
    /// Create a scheduler with the given plan limits.
    pub fn new(limits: PlanLimits) -> Self {
        Self {
            limits,
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The configured plan limits.
    pub fn limits(&self) -> PlanLimits {
        self.limits
    }

    /// Admit a mutating operation, or reject it with `QuotaExceeded` /
    /// `OperationInProgress`. Rejection never leaves partial state behind.
    ///
    /// `owner_active` is the owner's current count of live deployments as
    /// reported by the registry; it is only consulted for `Deploy`.
    pub fn admit(
        &self,
        owner_id: &str,
        deployment_id: Uuid,
        operation: OperationKind,
        spec: &DatabaseSpec,
        owner_active: i64,
    ) -> Result<Lease> {
        match operation {
            OperationKind::Deploy => {
                if owner_active >= self.limits.max_concurrent_deployments {
                    return Err(CoreError::QuotaExceeded {
                        owner_id: owner_id.to_string(),
                        reason: format!(
                            "concurrent deployment limit of {} reached",
                            self.limits.max_concurrent_deployments
                        ),
                    });
                }
                self.check_spec_quotas(owner_id, spec)?;
            }
            OperationKind::Scale => {
                self.check_spec_quotas(owner_id, spec)?;
            }
            // Backups and deletes never grow the footprint.
            OperationKind::Backup | OperationKind::Delete => {}
        }

        let mut inflight = self.inflight.lock().expect("scheduler lock poisoned");
        if let Some(existing) = inflight.get(&deployment_id) {
            return Err(CoreError::OperationInProgress {
                deployment_id,
                operation: existing.as_str().to_string(),
            });
        }
        inflight.insert(deployment_id, operation);

        debug!(
            deployment_id = %deployment_id,
            operation = operation.as_str(),
            "lease granted"
        );

        Ok(Lease {
            deployment_id,
            operation,
            inflight: Arc::clone(&self.inflight),
        })
    }

    /// Compute the topology for a spec and validate it against the
    /// instance-class node ceiling.
    pub fn plan_topology(&self, owner_id: &str, spec: &DatabaseSpec) -> Result<Topology> {
        let topology = Topology::for_spec(spec);
        let ceiling = spec.instance_class.max_nodes();
        if topology.total_nodes > ceiling {
            return Err(CoreError::QuotaExceeded {
                owner_id: owner_id.to_string(),
                reason: format!(
                    "topology of {} nodes exceeds the {} node ceiling of instance class '{}'",
                    topology.total_nodes,
                    ceiling,
                    spec.instance_class.as_str()
                ),
            });
        }
        Ok(topology)
    }

    /// The operation currently holding a deployment's lease, if any.
    pub fn inflight_operation(&self, deployment_id: Uuid) -> Option<OperationKind> {
        self.inflight
            .lock()
            .expect("scheduler lock poisoned")
            .get(&deployment_id)
            .copied()
    }

    fn check_spec_quotas(&self, owner_id: &str, spec: &DatabaseSpec) -> Result<()> {
        if spec.tenancy.max_tenants > self.limits.max_tenants_per_deployment {
            return Err(CoreError::QuotaExceeded {
                owner_id: owner_id.to_string(),
                reason: format!(
                    "tenant cap {} exceeds the plan limit of {}",
                    spec.tenancy.max_tenants, self.limits.max_tenants_per_deployment
                ),
            });
        }

        match &spec.engine {
            EngineSpec::Postgresql(pg) => {
                let ceiling = spec.instance_class.max_storage_gb();
                if pg.storage_gb > ceiling {
                    return Err(CoreError::QuotaExceeded {
                        owner_id: owner_id.to_string(),
                        reason: format!(
                            "{} GB storage exceeds the {} GB ceiling of instance class '{}'",
                            pg.storage_gb,
                            ceiling,
                            spec.instance_class.as_str()
                        ),
                    });
                }
            }
            EngineSpec::Redis(redis) => {
                let ceiling = spec.instance_class.max_memory_mb();
                if redis.memory_mb > ceiling {
                    return Err(CoreError::QuotaExceeded {
                        owner_id: owner_id.to_string(),
                        reason: format!(
                            "{} MB memory exceeds the {} MB ceiling of instance class '{}'",
                            redis.memory_mb,
                            ceiling,
                            spec.instance_class.as_str()
                        ),
                    });
                }
            }
        }

        self.plan_topology(owner_id, spec)?;
        Ok(())
    }
}

/// Exclusive right to mutate one deployment. Released on drop.
#[derive(Debug)]
pub struct Lease {
    deployment_id: Uuid,
    operation: OperationKind,
    inflight: Arc<Mutex<HashMap<Uuid, OperationKind>>>,
}

impl Lease {
    /// The deployment this lease covers.
    pub fn deployment_id(&self) -> Uuid {
        self.deployment_id
    }

    /// The operation the lease was granted for.
    pub fn operation(&self) -> OperationKind {
        self.operation
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Ok(mut inflight) = self.inflight.lock() {
            inflight.remove(&self.deployment_id);
            debug!(
                deployment_id = %self.deployment_id,
                operation = self.operation.as_str(),
                "lease released"
            );
        }
    }
}
