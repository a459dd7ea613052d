// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance store façade.
//!
//! [`InstanceStore`] owns exactly one backend, selected from
//! [`StoreConfig`], and is the only entry point the engine and the RPC layer
//! use. It forwards to the backend and adds a few read-modify-write helpers
//! for the fields the engine touches most often.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::config::{BackendConfig, BackendKind, StoreConfig};
use crate::error::Result;
use crate::model::{Metadata, WorkflowInstance};
use crate::pagination::InstancePage;
use crate::repository::{InstanceRepository, IndexRepository, MemoryRepository, SqliteRepository};

/// Workflow instance store backed by one configured repository.
#[derive(Clone)]
pub struct InstanceStore {
    repository: Arc<dyn InstanceRepository>,
    kind: BackendKind,
}

impl InstanceStore {
    /// Wrap an already constructed backend.
    pub fn new(repository: Arc<dyn InstanceRepository>, kind: BackendKind) -> Self {
        Self { repository, kind }
    }

    /// Construct the backend described by `config`.
    ///
    /// The SQLite backend connects and migrates; the index backend opens or
    /// creates its directory.
    pub async fn from_config(config: &StoreConfig) -> Result<Self> {
        let page_size = config.page_size as i64;
        let repository: Arc<dyn InstanceRepository> = match &config.backend {
            BackendConfig::Sqlite {
                database_url,
                max_connections,
            } => Arc::new(SqliteRepository::connect(database_url, *max_connections, page_size).await?),
            BackendConfig::Index { path } => Arc::new(IndexRepository::open(path, page_size)?),
            BackendConfig::Memory => Arc::new(MemoryRepository::new(page_size)),
        };

        let kind = config.backend.kind();
        info!(backend = %kind, page_size = repository.page_size(), "Instance store ready");
        Ok(Self::new(repository, kind))
    }

    /// Volatile store, mostly useful in tests.
    pub fn in_memory(page_size: i64) -> Self {
        Self::new(Arc::new(MemoryRepository::new(page_size)), BackendKind::Memory)
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.kind
    }

    pub fn page_size(&self) -> usize {
        self.repository.page_size()
    }

    /// The backend behind this store.
    pub fn repository(&self) -> &Arc<dyn InstanceRepository> {
        &self.repository
    }

    // ------------------------------------------------------------------
    // Engine operations
    // ------------------------------------------------------------------

    /// Persist a new instance and write the assigned id back into it.
    #[instrument(skip(self, instance), fields(status = %instance.status))]
    pub async fn add(&self, instance: &mut WorkflowInstance) -> Result<String> {
        let id = self.repository.add(instance).await?;
        instance.id = id.clone();
        info!(instance_id = %id, "Workflow instance added");
        Ok(id)
    }

    #[instrument(skip(self, instance), fields(instance_id = %instance.id))]
    pub async fn update(&self, instance: &WorkflowInstance) -> Result<()> {
        self.repository.update(instance).await
    }

    #[instrument(skip(self, instance), fields(instance_id = %instance.id))]
    pub async fn remove(&self, instance: &WorkflowInstance) -> Result<()> {
        self.repository.remove(&instance.id).await?;
        info!("Workflow instance removed");
        Ok(())
    }

    pub async fn get_by_id(&self, instance_id: &str) -> Result<Option<WorkflowInstance>> {
        self.repository.get_by_id(instance_id).await
    }

    pub async fn get_all(&self) -> Result<Vec<WorkflowInstance>> {
        self.repository.get_all().await
    }

    pub async fn get_all_by_status(&self, status: &str) -> Result<Vec<WorkflowInstance>> {
        self.repository.get_all_by_status(status).await
    }

    pub async fn count(&self) -> Result<usize> {
        self.repository.count().await
    }

    pub async fn count_by_status(&self, status: &str) -> Result<usize> {
        self.repository.count_by_status(status).await
    }

    #[instrument(skip(self))]
    pub async fn clear_all(&self) -> Result<bool> {
        let cleared = self.repository.clear_all().await?;
        warn!(backend = %self.kind, "All workflow instances cleared");
        Ok(cleared)
    }

    // ------------------------------------------------------------------
    // Pagination
    // ------------------------------------------------------------------

    #[instrument(skip(self))]
    pub async fn get_page(&self, page_num: i64, status: Option<&str>) -> Result<InstancePage> {
        self.repository.get_page(page_num, status).await
    }

    pub async fn get_first_page(&self) -> Result<InstancePage> {
        self.repository.get_first_page().await
    }

    pub async fn get_last_page(&self) -> Result<InstancePage> {
        self.repository.get_last_page().await
    }

    pub async fn get_next_page(&self, current: Option<&InstancePage>) -> Result<InstancePage> {
        self.repository.get_next_page(current).await
    }

    pub async fn get_prev_page(&self, current: Option<&InstancePage>) -> Result<InstancePage> {
        self.repository.get_prev_page(current).await
    }

    // ------------------------------------------------------------------
    // Field helpers
    // ------------------------------------------------------------------

    /// Shared context of one instance.
    pub async fn instance_metadata(&self, instance_id: &str) -> Result<Option<Metadata>> {
        Ok(self
            .repository
            .get_by_id(instance_id)
            .await?
            .map(|instance| instance.shared_context))
    }

    /// Set the status of an instance. Returns `false` if the id is unknown.
    #[instrument(skip(self))]
    pub async fn update_status(&self, instance_id: &str, status: &str) -> Result<bool> {
        self.modify(instance_id, |instance| instance.status = status.to_string())
            .await
    }

    pub async fn set_current_task_start_time(&self, instance_id: &str, time: &str) -> Result<bool> {
        self.modify(instance_id, |instance| {
            instance.current_task_start_time = Some(time.to_string())
        })
        .await
    }

    pub async fn set_current_task_end_time(&self, instance_id: &str, time: &str) -> Result<bool> {
        self.modify(instance_id, |instance| {
            instance.current_task_end_time = Some(time.to_string())
        })
        .await
    }

    /// Read-modify-write of one instance. Concurrent writers to the same id
    /// resolve last-writer-wins.
    async fn modify(
        &self,
        instance_id: &str,
        apply: impl FnOnce(&mut WorkflowInstance) + Send,
    ) -> Result<bool> {
        let Some(mut instance) = self.repository.get_by_id(instance_id).await? else {
            debug!(instance_id, "Instance not found");
            return Ok(false);
        };
        apply(&mut instance);
        self.repository.update(&instance).await?;
        Ok(true)
    }
}
