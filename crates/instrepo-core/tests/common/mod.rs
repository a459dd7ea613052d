// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for instrepo-core integration tests.
//!
//! Provides one instance of every backend and instance builders.

#![allow(dead_code)]

use std::sync::Arc;

use tempfile::TempDir;

use instrepo_core::model::{Workflow, WorkflowCondition, WorkflowInstance, WorkflowTask};
use instrepo_core::{
    BackendKind, IndexRepository, InstanceRepository, MemoryRepository, SqliteRepository,
};

/// Every backend, freshly created with the same page size.
pub struct TestBackends {
    pub backends: Vec<(BackendKind, Arc<dyn InstanceRepository>)>,
    // Keeps the on-disk index alive for the duration of the test.
    _dir: TempDir,
}

impl TestBackends {
    pub async fn new(page_size: i64) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");

        // Single connection: every pooled connection to :memory: is its own database.
        let sqlite = SqliteRepository::connect("sqlite::memory:", 1, page_size)
            .await
            .expect("Failed to create SQLite repository");
        let index = IndexRepository::open(dir.path().join("index"), page_size)
            .expect("Failed to open index repository");
        let memory = MemoryRepository::new(page_size);

        Self {
            backends: vec![
                (BackendKind::Sqlite, Arc::new(sqlite) as Arc<dyn InstanceRepository>),
                (BackendKind::Index, Arc::new(index) as Arc<dyn InstanceRepository>),
                (BackendKind::Memory, Arc::new(memory) as Arc<dyn InstanceRepository>),
            ],
            _dir: dir,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (BackendKind, &Arc<dyn InstanceRepository>)> {
        self.backends.iter().map(|(kind, repo)| (*kind, repo))
    }
}

/// Start time `minutes` after a fixed origin.
pub fn start_at(minutes: u32) -> String {
    format!("2025-06-01T{:02}:{:02}:00Z", minutes / 60, minutes % 60)
}

/// A running instance of a small two-task workflow.
pub fn sample_instance(status: &str, start: Option<String>) -> WorkflowInstance {
    let mut inst = WorkflowInstance {
        status: status.to_string(),
        current_task_id: "crawl".to_string(),
        start_time: start,
        workflow: Workflow {
            id: "urn:wf:ingest".to_string(),
            name: "Ingest".to_string(),
            tasks: vec![
                WorkflowTask {
                    id: "crawl".to_string(),
                    name: "Crawl".to_string(),
                    order: 1,
                    instance_class_name: "org.example.Crawl".to_string(),
                    ..Default::default()
                },
                WorkflowTask {
                    id: "archive".to_string(),
                    name: "Archive".to_string(),
                    order: 2,
                    instance_class_name: "org.example.Archive".to_string(),
                    ..Default::default()
                },
            ],
            ..Default::default()
        },
        ..Default::default()
    };
    inst.shared_context.add_value("Filename", "granule.h5");
    inst
}

/// Two tasks whose conditions share ids but differ in optionality and config.
pub fn optional_condition_instance() -> WorkflowInstance {
    let mut strict = WorkflowCondition {
        id: "urn:cond:files".to_string(),
        name: "FilesPresent".to_string(),
        order: 1,
        instance_class_name: "org.example.FilesPresent".to_string(),
        timeout_seconds: 30,
        optional: false,
        ..Default::default()
    };
    strict.config.insert("Dir".to_string(), "/data/staging".to_string());

    let mut relaxed = strict.clone();
    relaxed.optional = true;
    relaxed.timeout_seconds = -1;
    relaxed.config.clear();
    relaxed.config.insert("Dir".to_string(), "/data/archive".to_string());
    relaxed.config.insert("Pattern".to_string(), "*.h5".to_string());

    let mut inst = sample_instance("RUNNING", Some(start_at(0)));
    inst.workflow.tasks[0].conditions = vec![strict];
    inst.workflow.tasks[0].config.insert("Threads".to_string(), "4".to_string());
    inst.workflow.tasks[0].required_metadata_fields = vec!["Filename".to_string()];
    inst.workflow.tasks[1].conditions = vec![relaxed];
    inst
}
