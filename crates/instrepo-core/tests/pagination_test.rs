// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pagination behaviour shared by every backend.

mod common;

use common::{TestBackends, sample_instance, start_at};
use instrepo_core::InstancePage;

fn starts(page: &InstancePage) -> Vec<Option<String>> {
    page.instances.iter().map(|i| i.start_time.clone()).collect()
}

#[tokio::test]
async fn test_twenty_five_instances_page_size_ten() {
    let backends = TestBackends::new(10).await;

    for (kind, repo) in backends.iter() {
        for minute in 0..25 {
            repo.add(&sample_instance("RUNNING", Some(start_at(minute))))
                .await
                .unwrap();
        }

        let first = repo.get_first_page().await.unwrap();
        assert_eq!(first.page_num, 1, "{kind}");
        assert_eq!(first.total_pages, 3, "{kind}");
        assert_eq!(first.instances.len(), 10, "{kind}");
        assert_eq!(first.instances[0].start_time, Some(start_at(24)), "{kind}");

        let second = repo.get_next_page(Some(&first)).await.unwrap();
        assert_eq!(second.page_num, 2, "{kind}");
        assert_eq!(second.instances.len(), 10, "{kind}");
        assert_eq!(second.instances[0].start_time, Some(start_at(14)), "{kind}");

        let last = repo.get_last_page().await.unwrap();
        assert_eq!(last.page_num, 3, "{kind}");
        assert_eq!(last.instances.len(), 5, "{kind}");
        assert_eq!(
            starts(&last),
            (0..5).rev().map(|m| Some(start_at(m))).collect::<Vec<_>>(),
            "{kind}"
        );

        // Navigation saturates at both ends.
        let still_last = repo.get_next_page(Some(&last)).await.unwrap();
        assert_eq!(still_last, last, "{kind}");
        let still_first = repo.get_prev_page(Some(&first)).await.unwrap();
        assert_eq!(still_first, first, "{kind}");

        let back = repo.get_prev_page(Some(&last)).await.unwrap();
        assert_eq!(back.page_num, 2, "{kind}");
        assert_eq!(starts(&back), starts(&second), "{kind}");

        // Out-of-range requests yield the blank page.
        for page_num in [0, -1, 4, 1000] {
            let page = repo.get_page(page_num, None).await.unwrap();
            assert!(page.is_blank(), "{kind} page {page_num}");
            assert!(page.instances.is_empty(), "{kind} page {page_num}");
        }
    }
}

#[tokio::test]
async fn test_empty_store_yields_blank_pages() {
    let backends = TestBackends::new(10).await;

    for (kind, repo) in backends.iter() {
        assert!(repo.get_first_page().await.unwrap().is_blank(), "{kind}");
        assert!(repo.get_last_page().await.unwrap().is_blank(), "{kind}");
        assert!(repo.get_next_page(None).await.unwrap().is_blank(), "{kind}");
        assert!(repo.get_prev_page(None).await.unwrap().is_blank(), "{kind}");
        assert!(repo.get_page(1, Some("RUNNING")).await.unwrap().is_blank(), "{kind}");
    }
}

#[tokio::test]
async fn test_total_pages_is_ceiling() {
    let backends = TestBackends::new(4).await;

    for (kind, repo) in backends.iter() {
        for (n, expected_pages) in [(1, 1), (4, 1), (5, 2), (8, 2), (9, 3)] {
            repo.clear_all().await.unwrap();
            for minute in 0..n {
                repo.add(&sample_instance("RUNNING", Some(start_at(minute))))
                    .await
                    .unwrap();
            }
            let page = repo.get_first_page().await.unwrap();
            assert_eq!(page.total_pages, expected_pages, "{kind} with {n} instances");
        }
    }
}

#[tokio::test]
async fn test_ordering_is_consistent_across_backends() {
    let backends = TestBackends::new(5).await;
    // Shuffled start times, a few duplicates and some instances never started.
    let schedule: Vec<Option<u32>> = vec![
        Some(7),
        None,
        Some(3),
        Some(12),
        Some(3),
        None,
        Some(30),
        Some(1),
        Some(12),
        Some(18),
        Some(0),
    ];

    let mut orders = Vec::new();
    for (kind, repo) in backends.iter() {
        for (i, start) in schedule.iter().enumerate() {
            let status = if i % 2 == 0 { "RUNNING" } else { "FINISHED" };
            repo.add(&sample_instance(status, start.map(start_at)))
                .await
                .unwrap();
        }

        let all = repo.get_all().await.unwrap();
        let listed: Vec<Option<String>> = all.iter().map(|i| i.start_time.clone()).collect();

        let mut paged = Vec::new();
        let mut page = repo.get_first_page().await.unwrap();
        loop {
            paged.extend(starts(&page));
            if page.is_last_page() {
                break;
            }
            page = repo.get_next_page(Some(&page)).await.unwrap();
        }

        assert_eq!(listed, paged, "{kind}: listing and paging disagree");
        assert_eq!(listed.last(), Some(&None), "{kind}: undated instances sort last");
        orders.push((kind, listed));
    }

    let (reference_kind, reference) = &orders[0];
    for (kind, order) in &orders[1..] {
        assert_eq!(order, reference, "{kind} disagrees with {reference_kind}");
    }
}

#[tokio::test]
async fn test_status_filter_is_kept_while_navigating() {
    let backends = TestBackends::new(3).await;

    for (kind, repo) in backends.iter() {
        for minute in 0..10 {
            let status = if minute < 7 { "RUNNING" } else { "FINISHED" };
            repo.add(&sample_instance(status, Some(start_at(minute))))
                .await
                .unwrap();
        }

        let first = repo.get_page(1, Some("RUNNING")).await.unwrap();
        assert_eq!(first.total_pages, 3, "{kind}");
        assert_eq!(first.status.as_deref(), Some("RUNNING"), "{kind}");

        let mut page = first;
        let mut seen = page.instances.len();
        while !page.is_last_page() {
            page = repo.get_next_page(Some(&page)).await.unwrap();
            assert!(page.instances.iter().all(|i| i.status == "RUNNING"), "{kind}");
            seen += page.instances.len();
        }
        assert_eq!(seen, 7, "{kind}");
        assert_eq!(repo.count_by_status("FINISHED").await.unwrap(), 3, "{kind}");
    }
}
