// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory instance repository.
//!
//! Keeps full instances in a concurrent map. Nothing is persisted; this is the
//! reference backend for tests and for deployments that do not need to
//! survive a restart.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::model::WorkflowInstance;
use crate::pagination::{compare_instances, compare_start_then_id, page_offset};

use super::{InstanceRepository, effective_page_size};

/// In-memory implementation of [`InstanceRepository`].
pub struct MemoryRepository {
    instances: DashMap<String, WorkflowInstance>,
    sequence: AtomicU64,
    page_size: usize,
}

impl MemoryRepository {
    /// Create an empty repository. A non-positive `page_size` selects the
    /// default page size.
    pub fn new(page_size: i64) -> Self {
        Self {
            instances: DashMap::new(),
            sequence: AtomicU64::new(0),
            page_size: effective_page_size(page_size),
        }
    }

    /// Ids are the creation timestamp plus a process-wide sequence number, so
    /// two adds in the same microsecond still differ.
    fn next_id(&self) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ"), seq)
    }

    fn sorted_matching(&self, status: Option<&str>) -> Vec<WorkflowInstance> {
        let mut matching: Vec<WorkflowInstance> = self
            .instances
            .iter()
            .filter(|entry| status.is_none_or(|s| entry.value().status == s))
            .map(|entry| entry.value().clone())
            .collect();
        matching.sort_by(compare_instances);
        matching
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new(0)
    }
}

#[async_trait::async_trait]
impl InstanceRepository for MemoryRepository {
    async fn add(&self, instance: &WorkflowInstance) -> Result<String, StoreError> {
        let id = self.next_id();
        let mut stored = instance.clone();
        stored.id = id.clone();
        self.instances.insert(id.clone(), stored);

        debug!(instance_id = %id, status = %instance.status, "Instance added");
        Ok(id)
    }

    async fn update(&self, instance: &WorkflowInstance) -> Result<(), StoreError> {
        match self.instances.get_mut(&instance.id) {
            Some(mut entry) => {
                *entry = instance.clone();
                debug!(instance_id = %instance.id, status = %instance.status, "Instance updated");
            }
            None => {
                warn!(instance_id = %instance.id, "Attempt to update an instance that is not tracked");
            }
        }
        Ok(())
    }

    async fn remove(&self, instance_id: &str) -> Result<(), StoreError> {
        if self.instances.remove(instance_id).is_some() {
            debug!(instance_id, "Instance removed");
        }
        Ok(())
    }

    async fn get_by_id(&self, instance_id: &str) -> Result<Option<WorkflowInstance>, StoreError> {
        Ok(self
            .instances
            .get(instance_id)
            .map(|entry| entry.value().clone()))
    }

    async fn get_all(&self) -> Result<Vec<WorkflowInstance>, StoreError> {
        Ok(self.sorted_matching(None))
    }

    async fn get_all_by_status(&self, status: &str) -> Result<Vec<WorkflowInstance>, StoreError> {
        Ok(self.sorted_matching(Some(status)))
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.instances.len())
    }

    async fn count_by_status(&self, status: &str) -> Result<usize, StoreError> {
        Ok(self
            .instances
            .iter()
            .filter(|entry| entry.value().status == status)
            .count())
    }

    async fn ids_for_page(
        &self,
        page_num: usize,
        status: Option<&str>,
    ) -> Result<Vec<String>, StoreError> {
        let mut keys: Vec<(Option<String>, String)> = self
            .instances
            .iter()
            .filter(|entry| status.is_none_or(|s| entry.value().status == s))
            .map(|entry| (entry.value().start_time.clone(), entry.key().clone()))
            .collect();
        keys.sort_by(|(a_start, a_id), (b_start, b_id)| {
            compare_start_then_id(a_start.as_deref(), a_id, b_start.as_deref(), b_id)
        });

        let offset = page_offset(page_num, self.page_size, keys.len());
        Ok(keys
            .into_iter()
            .skip(offset)
            .take(self.page_size)
            .map(|(_, id)| id)
            .collect())
    }

    async fn clear_all(&self) -> Result<bool, StoreError> {
        self.instances.clear();
        debug!("All instances cleared");
        Ok(true)
    }

    fn page_size(&self) -> usize {
        self.page_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(status: &str, start: Option<&str>) -> WorkflowInstance {
        let mut inst = WorkflowInstance {
            status: status.to_string(),
            start_time: start.map(str::to_string),
            ..Default::default()
        };
        inst.shared_context.add_value("ProductType", "L2");
        inst
    }

    #[tokio::test]
    async fn test_add_assigns_unique_ids() {
        let repo = MemoryRepository::new(10);
        let a = repo.add(&instance("RUNNING", None)).await.unwrap();
        let b = repo.add(&instance("RUNNING", None)).await.unwrap();

        assert_ne!(a, b);
        assert_eq!(repo.get_by_id(&a).await.unwrap().unwrap().id, a);
    }

    #[tokio::test]
    async fn test_get_returns_full_instance() {
        let repo = MemoryRepository::new(10);
        let mut inst = instance("RUNNING", Some("2025-01-01T00:00:00Z"));
        inst.workflow.id = "wf".to_string();
        inst.workflow.name = "Workflow".to_string();

        inst.id = repo.add(&inst).await.unwrap();
        assert_eq!(repo.get_by_id(&inst.id).await.unwrap(), Some(inst));
    }

    #[tokio::test]
    async fn test_update_replaces_and_ignores_unknown() {
        let repo = MemoryRepository::new(10);
        let mut inst = instance("RUNNING", None);
        inst.id = repo.add(&inst).await.unwrap();

        inst.status = "FINISHED".to_string();
        repo.update(&inst).await.unwrap();
        assert_eq!(repo.get_by_id(&inst.id).await.unwrap().unwrap().status, "FINISHED");

        let mut ghost = instance("RUNNING", None);
        ghost.id = "ghost".to_string();
        repo.update(&ghost).await.unwrap();
        assert!(repo.get_by_id("ghost").await.unwrap().is_none());
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let repo = MemoryRepository::new(10);
        let id = repo.add(&instance("RUNNING", None)).await.unwrap();
        repo.add(&instance("FINISHED", None)).await.unwrap();

        repo.remove(&id).await.unwrap();
        repo.remove("missing").await.unwrap();
        assert_eq!(repo.count().await.unwrap(), 1);

        assert!(repo.clear_all().await.unwrap());
        assert_eq!(repo.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pages_follow_start_time_order() {
        let repo = MemoryRepository::new(10);
        let mut expected = Vec::new();
        for minute in 0..25 {
            let start = format!("2025-01-01T00:{:02}:00Z", minute);
            expected.push(repo.add(&instance("RUNNING", Some(&start))).await.unwrap());
        }
        expected.reverse();

        let first = repo.get_first_page().await.unwrap();
        assert_eq!(first.page_num, 1);
        assert_eq!(first.total_pages, 3);
        let ids: Vec<_> = first.instances.iter().map(|i| i.id.clone()).collect();
        assert_eq!(ids, expected[0..10].to_vec());

        let last = repo.get_last_page().await.unwrap();
        assert_eq!(last.page_num, 3);
        assert_eq!(last.instances.len(), 5);
        let ids: Vec<_> = last.instances.iter().map(|i| i.id.clone()).collect();
        assert_eq!(ids, expected[20..25].to_vec());
    }

    #[tokio::test]
    async fn test_undated_instances_sort_last() {
        let repo = MemoryRepository::new(10);
        let undated = repo.add(&instance("RUNNING", None)).await.unwrap();
        let dated = repo
            .add(&instance("RUNNING", Some("2025-01-01T00:00:00Z")))
            .await
            .unwrap();

        assert_eq!(repo.ids_for_page(1, None).await.unwrap(), vec![dated, undated]);
    }

    #[tokio::test]
    async fn test_status_filtered_page() {
        let repo = MemoryRepository::new(2);
        for _ in 0..3 {
            repo.add(&instance("RUNNING", Some("2025-01-01T00:00:00Z"))).await.unwrap();
        }
        repo.add(&instance("FINISHED", Some("2025-01-02T00:00:00Z"))).await.unwrap();

        let page = repo.get_page(2, Some("RUNNING")).await.unwrap();
        assert_eq!(page.total_pages, 2);
        assert_eq!(page.instances.len(), 1);
        assert_eq!(page.status.as_deref(), Some("RUNNING"));

        let prev = repo.get_prev_page(Some(&page)).await.unwrap();
        assert_eq!(prev.page_num, 1);
        assert!(prev.instances.iter().all(|i| i.status == "RUNNING"));
    }
}
