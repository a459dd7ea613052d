// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Concurrent access to every backend.

mod common;

use std::sync::Arc;

use futures::future::join_all;

use common::{TestBackends, sample_instance, start_at};
use instrepo_core::InstanceRepository;

const INSTANCES: u32 = 100;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_updates_on_distinct_ids() {
    let backends = TestBackends::new(10).await;

    for (kind, repo) in backends.iter() {
        let mut instances = Vec::new();
        for n in 0..INSTANCES {
            let mut inst = sample_instance("RUNNING", Some(start_at(n)));
            inst.id = repo.add(&inst).await.unwrap();
            instances.push(inst);
        }

        let updates = instances.iter().enumerate().map(|(n, inst)| {
            let repo = Arc::clone(repo);
            let mut inst = inst.clone();
            async move {
                inst.status = format!("DONE-{n}");
                inst.times_blocked = n as u32;
                inst.shared_context.replace("Owner", vec![format!("worker-{n}")]);
                repo.update(&inst).await
            }
        });
        for result in join_all(updates).await {
            result.unwrap();
        }

        assert_eq!(repo.count().await.unwrap(), INSTANCES as usize, "{kind}");
        for (n, inst) in instances.iter().enumerate() {
            let stored = repo.get_by_id(&inst.id).await.unwrap().unwrap();
            assert_eq!(stored.status, format!("DONE-{n}"), "{kind}");
            assert_eq!(stored.times_blocked, n as u32, "{kind}");
            assert_eq!(
                stored.shared_context.get_all("Owner"),
                Some(&[format!("worker-{n}")][..]),
                "{kind}"
            );
            assert_eq!(stored.shared_context.get_first("Filename"), Some("granule.h5"), "{kind}");
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_adds_get_distinct_ids() {
    let backends = TestBackends::new(10).await;

    for (kind, repo) in backends.iter() {
        let adds = (0..50).map(|n| {
            let repo: Arc<dyn InstanceRepository> = Arc::clone(repo);
            async move {
                repo.add(&sample_instance("RUNNING", Some(start_at(n))))
                    .await
            }
        });
        let mut ids: Vec<String> = join_all(adds)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 50, "{kind}");
        assert_eq!(repo.count().await.unwrap(), 50, "{kind}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_during_writes_see_whole_instances() {
    let backends = TestBackends::new(10).await;

    for (kind, repo) in backends.iter() {
        let mut inst = sample_instance("RUNNING", Some(start_at(0)));
        inst.id = repo.add(&inst).await.unwrap();

        let writer = {
            let repo = Arc::clone(repo);
            let mut inst = inst.clone();
            tokio::spawn(async move {
                for n in 0..20u32 {
                    inst.times_blocked = n;
                    inst.status = format!("STEP-{n}");
                    repo.update(&inst).await.unwrap();
                }
            })
        };

        for _ in 0..20 {
            let seen = repo.get_by_id(&inst.id).await.unwrap().unwrap();
            // Status and counter are always written together.
            if seen.status != "RUNNING" {
                assert_eq!(seen.status, format!("STEP-{}", seen.times_blocked), "{kind}");
            }
        }
        writer.await.unwrap();
    }
}
