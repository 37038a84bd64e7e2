// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Basin Core - Managed Database Control Plane
//!
//! This crate provisions and operates managed PostgreSQL and Redis instances
//! from declarative specs. It compiles a spec into deterministic deployment
//! artifacts, admits operations against plan quotas, persists deployment
//! state to PostgreSQL (or SQLite), and drives provisioning through a
//! pluggable driver.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         External Clients                                 │
//! │                      (API gateway, CLI, console)                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           Orchestrator                                   │
//! │            deploy / scale / backup / delete / tenant ops                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//!       │                  │                   │                  │
//!       ▼                  ▼                   ▼                  ▼
//! ┌───────────┐      ┌───────────┐      ┌────────────┐     ┌──────────────┐
//! │ Template  │      │ Scheduler │      │  Registry  │     │ Provisioning │
//! │ Compiler  │      │ (quotas,  │      │ (Postgres/ │     │   Driver     │
//! │ (validate,│      │  leases,  │      │  SQLite/   │     │ (containers, │
//! │  render)  │      │ topology) │      │  memory)   │     │  k8s, ...)   │
//! └───────────┘      └───────────┘      └────────────┘     └──────────────┘
//! ```
//!
//! # Deployment Lifecycle
//!
//! ```text
//!      ┌─────────┐
//!      │ PENDING │
//!      └────┬────┘
//!           ▼
//!     ┌────────────┐
//!     │ VALIDATING │────────────┐
//!     └─────┬──────┘            │
//!           ▼                   │
//!   ┌──────────────┐            │
//!   │ PROVISIONING │────────────┤
//!   └──────┬───────┘            │
//!          ▼                    ▼
//!     ┌─────────┐          ┌────────┐
//!  ┌──│ RUNNING │─────────▶│ FAILED │
//!  │  └─────────┘          └───┬────┘
//!  │   ▲   ▲   │               │
//!  │   │   │   ▼               │
//!  │ ┌─┴───┴──────┐            │
//!  │ │  SCALING / │            │
//!  │ │ BACKING_UP │            │
//!  │ └────────────┘            │
//!  │                           │
//!  │  ┌──────────┐             │
//!  └─▶│ DELETING │◀────────────┘
//!     └────┬─────┘
//!          ▼
//!     ┌─────────┐
//!     │ DELETED │  (tombstone, name freed)
//!     └─────────┘
//! ```
//!
//! Failed backups are the one exception: the run is recorded on the backup
//! history and the deployment returns to `RUNNING`.
//!
//! # Operations
//!
//! | Operation | Description |
//! |-----------|-------------|
//! | `deploy` | Validate a spec, admit against quotas, render artifacts, provision |
//! | `scale` | Change topology of a running deployment; no-op when artifacts are unchanged |
//! | `backup` | On-demand backup run, recorded on the deployment's history |
//! | `delete` | Tear down and keep a `DELETED` tombstone; idempotent |
//! | `add_tenant` / `remove_tenant` | Manage tenants within a running deployment |
//! | `connection_descriptor` | Per-tenant connection details |
//! | `validate` / `estimate_cost` | Pure spec operations, no registry access |
//!
//! At most one mutating operation runs per deployment at a time; a second
//! request is rejected with `OPERATION_IN_PROGRESS` rather than queued.
//!
//! # Determinism
//!
//! Rendering is a pure function of the spec and the tenant set: the same
//! inputs always produce byte-identical artifacts and the same SHA-256
//! digest. The digest doubles as the idempotence key for scaling.
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `BASIN_DATABASE_URL` | Yes | - | PostgreSQL or SQLite connection string |
//! | `BASIN_MAX_CONCURRENT_DEPLOYMENTS` | No | `8` | Active deployments per owner |
//! | `BASIN_MAX_TENANTS_PER_DEPLOYMENT` | No | `64` | Hard tenant cap per deployment |
//!
//! # Modules
//!
//! - [`compiler`]: Spec validation, artifact rendering, cost estimation
//! - [`config`]: Configuration from environment variables
//! - [`driver`]: Provisioning driver boundary
//! - [`error`]: Error types with stable error codes
//! - [`orchestrator`]: Deployment lifecycle state machine
//! - [`registry`]: Deployment record persistence (PostgreSQL, SQLite, memory)
//! - [`scheduler`]: Quota admission, operation leases, topology planning
//! - [`spec`]: The declarative database spec model
//! - [`tenant`]: Tenant isolation and connection descriptors

#![deny(missing_docs)]

/// Spec validation, deterministic artifact rendering, and cost estimation.
pub mod compiler;

/// Configuration loaded from environment variables.
pub mod config;

/// Provisioning driver boundary between orchestration and infrastructure.
pub mod driver;

/// Error types with stable error codes.
pub mod error;

/// Deployment lifecycle orchestration (deploy, scale, backup, delete).
pub mod orchestrator;

/// Deployment record persistence backends.
pub mod registry;

/// Quota admission, per-deployment operation leases, topology planning.
pub mod scheduler;

/// The declarative database spec model.
pub mod spec;

/// Tenant isolation handles and connection descriptors.
pub mod tenant;
