// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Backend-agnostic pagination.
//!
//! Every backend only knows how to count matching instances and how to list
//! the ids of one page. The page math, the blank-page sentinel and the
//! saturating first/last/next/prev navigation live here and are shared by all
//! backends through the provided methods of
//! [`InstanceRepository`](crate::repository::InstanceRepository).
//!
//! Ordering is identical across backends: descending start time, ties broken
//! by ascending id, instances without a start time last.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::model::WorkflowInstance;
use crate::repository::InstanceRepository;

/// Page size used when none (or a non-positive one) is configured.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// One page of workflow instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstancePage {
    /// 1-based page number; 0 for the blank page.
    pub page_num: usize,
    pub page_size: usize,
    /// 0 iff no instance matched.
    pub total_pages: usize,
    /// Status filter the page was produced with; navigation keeps it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub instances: Vec<WorkflowInstance>,
}

impl InstancePage {
    /// The canonical empty-result sentinel.
    pub fn blank(page_size: usize) -> Self {
        Self {
            page_num: 0,
            page_size,
            total_pages: 0,
            status: None,
            instances: Vec::new(),
        }
    }

    fn blank_for(page_size: usize, status: Option<&str>) -> Self {
        Self {
            status: status.map(str::to_string),
            ..Self::blank(page_size)
        }
    }

    pub fn is_blank(&self) -> bool {
        self.page_num == 0 && self.total_pages == 0
    }

    pub fn is_first_page(&self) -> bool {
        self.page_num <= 1
    }

    pub fn is_last_page(&self) -> bool {
        self.page_num == self.total_pages
    }
}

/// `ceil(count / page_size)`.
pub fn total_pages(count: usize, page_size: usize) -> usize {
    if page_size == 0 {
        return 0;
    }
    count.div_ceil(page_size)
}

/// Index of the first element of `page_num` in a result set of `len`
/// elements. Offsets past the end wrap back to the start; an offset equal to
/// `len` is kept and selects nothing.
pub fn page_offset(page_num: usize, page_size: usize, len: usize) -> usize {
    let offset = page_num.saturating_sub(1).saturating_mul(page_size);
    if offset > len { 0 } else { offset }
}

/// Total ordering shared by every backend.
pub fn compare_instances(a: &WorkflowInstance, b: &WorkflowInstance) -> Ordering {
    compare_start_then_id(a.start_time.as_deref(), &a.id, b.start_time.as_deref(), &b.id)
}

/// Ordering over `(start time, id)` pairs; see [`compare_instances`].
pub fn compare_start_then_id(
    a_start: Option<&str>,
    a_id: &str,
    b_start: Option<&str>,
    b_id: &str,
) -> Ordering {
    let by_start = match (a_start, b_start) {
        (Some(a), Some(b)) => b.cmp(a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_start.then_with(|| a_id.cmp(b_id))
}

/// Build page `page_num` of the instances matching `status`.
pub(crate) async fn page<R: InstanceRepository + ?Sized>(
    repo: &R,
    page_num: i64,
    status: Option<&str>,
) -> Result<InstancePage> {
    let page_size = repo.page_size();
    let count = match status {
        Some(status) => repo.count_by_status(status).await?,
        None => repo.count().await?,
    };
    let total = total_pages(count, page_size);

    if total == 0 || page_num <= 0 || page_num as u64 > total as u64 {
        debug!(page_num, total_pages = total, "Requested page out of range");
        return Ok(InstancePage::blank_for(page_size, status));
    }
    let page_num = page_num as usize;

    let ids = repo.ids_for_page(page_num, status).await?;
    let mut instances = Vec::with_capacity(ids.len());
    for id in ids {
        match repo.get_by_id(&id).await? {
            Some(instance) => instances.push(instance),
            None => debug!(instance_id = %id, "Instance removed while building page"),
        }
    }

    Ok(InstancePage {
        page_num,
        page_size,
        total_pages: total,
        status: status.map(str::to_string),
        instances,
    })
}

pub(crate) async fn last_page<R: InstanceRepository + ?Sized>(
    repo: &R,
    status: Option<&str>,
) -> Result<InstancePage> {
    let count = match status {
        Some(status) => repo.count_by_status(status).await?,
        None => repo.count().await?,
    };
    let total = total_pages(count, repo.page_size());
    // The count may be stale by now; a blank page is an acceptable answer.
    page(repo, total as i64, status).await
}

pub(crate) async fn next_page<R: InstanceRepository + ?Sized>(
    repo: &R,
    current: Option<&InstancePage>,
) -> Result<InstancePage> {
    match current {
        None => page(repo, 1, None).await,
        Some(current) if current.is_last_page() => Ok(current.clone()),
        Some(current) => {
            page(repo, current.page_num as i64 + 1, current.status.as_deref()).await
        }
    }
}

pub(crate) async fn prev_page<R: InstanceRepository + ?Sized>(
    repo: &R,
    current: Option<&InstancePage>,
) -> Result<InstancePage> {
    match current {
        None => page(repo, 1, None).await,
        Some(current) if current.is_first_page() => Ok(current.clone()),
        Some(current) => {
            page(repo, current.page_num as i64 - 1, current.status.as_deref()).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inst(id: &str, start: Option<&str>) -> WorkflowInstance {
        WorkflowInstance {
            id: id.to_string(),
            start_time: start.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_total_pages() {
        assert_eq!(total_pages(0, 10), 0);
        assert_eq!(total_pages(1, 10), 1);
        assert_eq!(total_pages(10, 10), 1);
        assert_eq!(total_pages(11, 10), 2);
        assert_eq!(total_pages(25, 10), 3);
        assert_eq!(total_pages(5, 0), 0);
    }

    #[test]
    fn test_page_offset_clamps_past_end() {
        assert_eq!(page_offset(1, 10, 25), 0);
        assert_eq!(page_offset(3, 10, 25), 20);
        assert_eq!(page_offset(4, 10, 25), 0);
        assert_eq!(page_offset(0, 10, 25), 0);
    }

    #[test]
    fn test_page_offset_at_end_is_kept() {
        assert_eq!(page_offset(3, 10, 20), 20);
        assert_eq!(page_offset(2, 5, 5), 5);
        assert_eq!(page_offset(3, 5, 5), 0);
    }

    #[test]
    fn test_blank_page() {
        let page = InstancePage::blank(20);
        assert!(page.is_blank());
        assert_eq!(page.page_size, 20);
        assert!(page.instances.is_empty());
        assert!(page.is_first_page());
        assert!(page.is_last_page());
    }

    #[test]
    fn test_ordering_start_desc_then_id() {
        let mut list = vec![
            inst("b", Some("2025-01-01T00:00:00Z")),
            inst("z", None),
            inst("a", Some("2025-01-01T00:00:00Z")),
            inst("c", Some("2025-02-01T00:00:00Z")),
            inst("y", None),
        ];
        list.sort_by(compare_instances);

        let ids: Vec<_> = list.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b", "y", "z"]);
    }
}
