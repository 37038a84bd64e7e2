// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for basin-core.
//!
//! Provides a unified error type with stable error codes for API responses.
//! Everything below the orchestrator returns these as typed results; the
//! orchestrator is the only component that turns a failure into a `FAILED`
//! deployment status.

use std::fmt;

use uuid::Uuid;

use crate::compiler::ValidationReport;

/// Result type using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur while operating deployments.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum CoreError {
    /// Deployment was not found in the registry.
    DeploymentNotFound {
        /// The deployment ID that was not found.
        deployment_id: Uuid,
    },

    /// A deployment with the same name already exists for this owner.
    DeploymentAlreadyExists {
        /// The conflicting deployment name.
        name: String,
    },

    /// Deployment is in an invalid state for the requested operation.
    InvalidDeploymentState {
        /// The deployment ID.
        deployment_id: Uuid,
        /// The state(s) the operation requires.
        expected: String,
        /// The actual status.
        actual: String,
    },

    /// Spec validation failed; carries the full per-field report.
    ///
    /// Validation never mutates the registry.
    InvalidSpec {
        /// The validation report with per-field errors.
        report: ValidationReport,
    },

    /// A plan-level quota would be violated by admitting the operation.
    QuotaExceeded {
        /// The owner whose quota was hit.
        owner_id: String,
        /// Which quota and by how much.
        reason: String,
    },

    /// Another mutating operation already holds the lease for this deployment.
    OperationInProgress {
        /// The deployment ID.
        deployment_id: Uuid,
        /// The operation currently holding the lease.
        operation: String,
    },

    /// The tenant already exists within the deployment.
    DuplicateTenant {
        /// The deployment ID.
        deployment_id: Uuid,
        /// The duplicate tenant ID.
        tenant_id: String,
    },

    /// Adding the tenant would exceed the deployment's tenant cap.
    TenantLimitExceeded {
        /// The deployment ID.
        deployment_id: Uuid,
        /// The configured cap.
        max_tenants: i64,
    },

    /// No isolation slot is free (e.g. all logical databases in use).
    CapacityExhausted {
        /// The deployment ID.
        deployment_id: Uuid,
        /// Total isolation capacity of the engine.
        capacity: i64,
    },

    /// The provisioning driver reported a failure; the deployment moves
    /// to `FAILED` with this reason recorded.
    ProvisioningFailure {
        /// The deployment ID.
        deployment_id: Uuid,
        /// Driver-reported reason.
        reason: String,
    },

    /// A backup run failed. Non-fatal: the deployment returns to `RUNNING`
    /// and the failure is recorded on the backup history entry.
    BackupFailure {
        /// The deployment ID.
        deployment_id: Uuid,
        /// Driver-reported reason.
        reason: String,
    },

    /// Input validation failed for a single field (tenant IDs, scale targets).
    ValidationError {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// Registry storage operation failed.
    StorageError {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl CoreError {
    /// Get the stable error code string for this error kind.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::DeploymentNotFound { .. } => "DEPLOYMENT_NOT_FOUND",
            Self::DeploymentAlreadyExists { .. } => "DEPLOYMENT_ALREADY_EXISTS",
            Self::InvalidDeploymentState { .. } => "INVALID_DEPLOYMENT_STATE",
            Self::InvalidSpec { .. } => "INVALID_SPEC",
            Self::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            Self::OperationInProgress { .. } => "OPERATION_IN_PROGRESS",
            Self::DuplicateTenant { .. } => "DUPLICATE_TENANT",
            Self::TenantLimitExceeded { .. } => "TENANT_LIMIT_EXCEEDED",
            Self::CapacityExhausted { .. } => "CAPACITY_EXHAUSTED",
            Self::ProvisioningFailure { .. } => "PROVISIONING_FAILURE",
            Self::BackupFailure { .. } => "BACKUP_FAILURE",
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::StorageError { .. } => "STORAGE_ERROR",
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeploymentNotFound { deployment_id } => {
                write!(f, "Deployment '{}' not found", deployment_id)
            }
            Self::DeploymentAlreadyExists { name } => {
                write!(f, "Deployment '{}' already exists for this owner", name)
            }
            Self::InvalidDeploymentState {
                deployment_id,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "Deployment '{}' is in invalid state: expected '{}', got '{}'",
                    deployment_id, expected, actual
                )
            }
            Self::InvalidSpec { report } => {
                write!(
                    f,
                    "Spec validation failed with {} error(s)",
                    report.error_count()
                )
            }
            Self::QuotaExceeded { owner_id, reason } => {
                write!(f, "Quota exceeded for owner '{}': {}", owner_id, reason)
            }
            Self::OperationInProgress {
                deployment_id,
                operation,
            } => {
                write!(
                    f,
                    "Operation '{}' already in progress for deployment '{}'",
                    operation, deployment_id
                )
            }
            Self::DuplicateTenant {
                deployment_id,
                tenant_id,
            } => {
                write!(
                    f,
                    "Tenant '{}' already exists in deployment '{}'",
                    tenant_id, deployment_id
                )
            }
            Self::TenantLimitExceeded {
                deployment_id,
                max_tenants,
            } => {
                write!(
                    f,
                    "Deployment '{}' is at its tenant cap of {}",
                    deployment_id, max_tenants
                )
            }
            Self::CapacityExhausted {
                deployment_id,
                capacity,
            } => {
                write!(
                    f,
                    "No free isolation slot in deployment '{}' (capacity {})",
                    deployment_id, capacity
                )
            }
            Self::ProvisioningFailure {
                deployment_id,
                reason,
            } => {
                write!(
                    f,
                    "Provisioning failed for deployment '{}': {}",
                    deployment_id, reason
                )
            }
            Self::BackupFailure {
                deployment_id,
                reason,
            } => {
                write!(
                    f,
                    "Backup failed for deployment '{}': {}",
                    deployment_id, reason
                )
            }
            Self::ValidationError { field, message } => {
                write!(f, "Validation error for '{}': {}", field, message)
            }
            Self::StorageError { operation, details } => {
                write!(f, "Storage error during '{}': {}", operation, details)
            }
        }
    }
}

impl std::error::Error for CoreError {}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::StorageError {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for CoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        CoreError::StorageError {
            operation: "migrate".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::StorageError {
            operation: "json".to_string(),
            details: err.to_string(),
        }
    }
}
