// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance repository contract and its backends.
//!
//! This module defines the persistence abstraction and the three backend
//! implementations:
//!
//! - [`SqliteRepository`]: relational tables, scalar attributes plus metadata
//! - [`IndexRepository`]: document index, fully self-contained documents
//! - [`MemoryRepository`]: concurrent map, reference implementation

pub mod index;
pub mod memory;
pub mod sqlite;

pub use self::index::IndexRepository;
pub use self::memory::MemoryRepository;
pub use self::sqlite::SqliteRepository;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::model::WorkflowInstance;
use crate::pagination::{self, InstancePage};

/// Persistence interface implemented by every backend.
///
/// Backends implement the storage primitives; the page operations are
/// provided on top of `count`/`count_by_status`, `ids_for_page` and
/// `get_by_id` and behave identically for all of them.
///
/// All methods are safe to call concurrently. Backends never retry, and a
/// failed mutation leaves the stored state as it was before the call.
#[async_trait]
pub trait InstanceRepository: Send + Sync {
    /// Persist a new instance and return the id the backend assigned to it.
    ///
    /// Any id already set on `instance` is ignored.
    async fn add(&self, instance: &WorkflowInstance) -> Result<String, StoreError>;

    /// Replace the stored instance with the same id.
    ///
    /// Updating an id the backend does not track is a logged no-op.
    async fn update(&self, instance: &WorkflowInstance) -> Result<(), StoreError>;

    /// Delete the instance with `instance_id`. Missing ids are ignored.
    async fn remove(&self, instance_id: &str) -> Result<(), StoreError>;

    /// Look up one instance. Absence is `Ok(None)`, not an error.
    async fn get_by_id(&self, instance_id: &str) -> Result<Option<WorkflowInstance>, StoreError>;

    /// All instances in page order.
    async fn get_all(&self) -> Result<Vec<WorkflowInstance>, StoreError>;

    /// All instances with `status`, in page order.
    async fn get_all_by_status(&self, status: &str) -> Result<Vec<WorkflowInstance>, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;

    async fn count_by_status(&self, status: &str) -> Result<usize, StoreError>;

    /// Ordered ids of page `page_num` (1-based) among the instances matching
    /// `status` (all instances when `None`).
    ///
    /// A page starting past the end of the result set reads from the start.
    async fn ids_for_page(
        &self,
        page_num: usize,
        status: Option<&str>,
    ) -> Result<Vec<String>, StoreError>;

    /// Delete every instance.
    async fn clear_all(&self) -> Result<bool, StoreError>;

    /// Number of instances per page.
    fn page_size(&self) -> usize;

    // ------------------------------------------------------------------
    // Pagination (shared by all backends)
    // ------------------------------------------------------------------

    /// Page `page_num` of the instances matching `status`.
    ///
    /// Out-of-range page numbers (including zero and negatives) and empty
    /// result sets yield [`InstancePage::blank`].
    async fn get_page(
        &self,
        page_num: i64,
        status: Option<&str>,
    ) -> Result<InstancePage, StoreError> {
        pagination::page(self, page_num, status).await
    }

    async fn get_first_page(&self) -> Result<InstancePage, StoreError> {
        pagination::page(self, 1, None).await
    }

    async fn get_last_page(&self) -> Result<InstancePage, StoreError> {
        pagination::last_page(self, None).await
    }

    /// The page after `current`; the last page is returned unchanged and
    /// `None` yields the first page.
    async fn get_next_page(
        &self,
        current: Option<&InstancePage>,
    ) -> Result<InstancePage, StoreError> {
        pagination::next_page(self, current).await
    }

    /// The page before `current`; the first page is returned unchanged and
    /// `None` yields the first page.
    async fn get_prev_page(
        &self,
        current: Option<&InstancePage>,
    ) -> Result<InstancePage, StoreError> {
        pagination::prev_page(self, current).await
    }
}

/// Page size to use for a configured value; non-positive means "default".
pub(crate) fn effective_page_size(page_size: i64) -> usize {
    if page_size > 0 {
        page_size as usize
    } else {
        pagination::DEFAULT_PAGE_SIZE
    }
}
