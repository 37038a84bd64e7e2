// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Provisioning driver boundary.
//!
//! The orchestrator never touches infrastructure directly; it hands rendered
//! artifacts to a [`ProvisioningDriver`] and records the outcome. Drivers
//! report failures as `anyhow::Error`; the orchestrator translates them into
//! deployment status and a recorded reason. Driver calls must be idempotent:
//! the orchestrator may re-apply the same artifact set after a crash.

use async_trait::async_trait;
use uuid::Uuid;

use crate::compiler::ArtifactSet;
use crate::registry::NodeEndpoint;
use crate::scheduler::Topology;

/// Applies rendered artifacts to real infrastructure.
#[async_trait]
pub trait ProvisioningDriver: Send + Sync {
    /// Provision (or re-apply) the full artifact set for a deployment.
    /// Returns the endpoints of the nodes that came up.
    async fn apply(
        &self,
        deployment_id: Uuid,
        artifacts: &ArtifactSet,
        topology: &Topology,
    ) -> anyhow::Result<Vec<NodeEndpoint>>;

    /// Resize a provisioned deployment to a new topology. Returns the
    /// endpoints after the change.
    async fn scale(
        &self,
        deployment_id: Uuid,
        artifacts: &ArtifactSet,
        topology: &Topology,
    ) -> anyhow::Result<Vec<NodeEndpoint>>;

    /// Run a backup using the rendered backup script.
    async fn run_backup(&self, deployment_id: Uuid, script: &str) -> anyhow::Result<()>;

    /// Tear down everything belonging to a deployment. Must be idempotent;
    /// tearing down an absent deployment is a success.
    async fn teardown(&self, deployment_id: Uuid) -> anyhow::Result<()>;

    /// Probe the deployment's nodes.
    async fn health_check(&self, deployment_id: Uuid) -> anyhow::Result<bool>;
}
