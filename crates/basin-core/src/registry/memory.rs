// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory registry backend for tests and ephemeral runs.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{DeploymentRecord, DeploymentStatus, ListQuery, Registry};
use crate::error::{CoreError, Result};

/// HashMap-backed [`Registry`]. Same semantics as the durable backends,
/// including tombstones and the live-name uniqueness rule.
#[derive(Default)]
pub struct MemoryRegistry {
    records: RwLock<HashMap<Uuid, DeploymentRecord>>,
}

impl MemoryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn create(&self, record: DeploymentRecord) -> Result<()> {
        let mut records = self.records.write().await;
        let live_name_taken = records.values().any(|existing| {
            existing.owner_id == record.owner_id
                && existing.name() == record.name()
                && existing.status != DeploymentStatus::Deleted
        });
        if live_name_taken || records.contains_key(&record.id) {
            return Err(CoreError::DeploymentAlreadyExists {
                name: record.name().to_string(),
            });
        }
        records.insert(record.id, record);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<DeploymentRecord>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn find_by_name(
        &self,
        owner_id: &str,
        name: &str,
    ) -> Result<Option<DeploymentRecord>> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .find(|record| {
                record.owner_id == owner_id
                    && record.name() == name
                    && record.status != DeploymentStatus::Deleted
            })
            .cloned())
    }

    async fn update(&self, mut record: DeploymentRecord) -> Result<()> {
        let mut records = self.records.write().await;
        if !records.contains_key(&record.id) {
            return Err(CoreError::DeploymentNotFound {
                deployment_id: record.id,
            });
        }
        record.touch();
        records.insert(record.id, record);
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        Ok(self.records.write().await.remove(&id).is_some())
    }

    async fn list(&self, query: ListQuery<'_>) -> Result<Vec<DeploymentRecord>> {
        let records = self.records.read().await;
        let mut matches: Vec<DeploymentRecord> = records
            .values()
            .filter(|record| {
                query
                    .owner_id
                    .map_or(true, |owner| record.owner_id == owner)
                    && query.status.map_or(true, |status| record.status == status)
            })
            .cloned()
            .collect();
        matches.sort_by_key(|record| record.created_at);
        Ok(matches
            .into_iter()
            .skip(query.offset.max(0) as usize)
            .take(query.limit.max(0) as usize)
            .collect())
    }

    async fn count_active(&self, owner_id: &str) -> Result<i64> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|record| record.owner_id == owner_id && !record.status.is_terminal())
            .count() as i64)
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
