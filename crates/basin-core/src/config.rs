// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use crate::scheduler::PlanLimits;

/// Basin Core configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL or SQLite connection URL for the deployment registry
    pub database_url: String,
    /// Maximum concurrent active deployments per owner
    pub max_concurrent_deployments: i64,
    /// Hard cap on tenants per deployment, regardless of spec
    pub max_tenants_per_deployment: i64,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `BASIN_DATABASE_URL`: PostgreSQL or SQLite connection string
    ///
    /// Optional (with defaults):
    /// - `BASIN_MAX_CONCURRENT_DEPLOYMENTS`: Active deployments per owner (default: 8)
    /// - `BASIN_MAX_TENANTS_PER_DEPLOYMENT`: Tenant cap per deployment (default: 64)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("BASIN_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("BASIN_DATABASE_URL"))?;

        let max_concurrent_deployments =
            positive_int("BASIN_MAX_CONCURRENT_DEPLOYMENTS", 8)?;
        let max_tenants_per_deployment =
            positive_int("BASIN_MAX_TENANTS_PER_DEPLOYMENT", 64)?;

        Ok(Self {
            database_url,
            max_concurrent_deployments,
            max_tenants_per_deployment,
        })
    }

    /// The scheduler limits this configuration describes.
    pub fn plan_limits(&self) -> PlanLimits {
        PlanLimits {
            max_concurrent_deployments: self.max_concurrent_deployments,
            max_tenants_per_deployment: self.max_tenants_per_deployment,
        }
    }
}

fn positive_int(key: &'static str, default: i64) -> Result<i64, ConfigError> {
    let value: i64 = match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::Invalid(key, "must be a positive integer"))?,
        Err(_) => default,
    };
    if value <= 0 {
        return Err(ConfigError::Invalid(key, "must be a positive integer"));
    }
    Ok(value)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
