// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instrepo Core - Workflow Instance Store
//!
//! This crate persists, retrieves and paginates workflow instances on behalf
//! of a workflow engine and the RPC layer that lists instances to operators.
//! One contract, [`InstanceRepository`], is implemented by three
//! interchangeable backends; [`InstanceStore`] picks one from configuration.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐        ┌──────────────────────┐
//! │   Workflow engine    │        │  RPC / instrepo-ctl  │
//! │ add/update/remove/get│        │  page navigation     │
//! └──────────────────────┘        └──────────────────────┘
//!             │                              │
//!             ▼                              ▼
//! ┌───────────────────────────────────────────────────────┐
//! │                    InstanceStore                      │
//! │         (backend chosen by StoreConfig)               │
//! └───────────────────────────────────────────────────────┘
//!             │                 │                 │
//!             ▼                 ▼                 ▼
//! ┌─────────────────┐ ┌──────────────────┐ ┌──────────────┐
//! │ SqliteRepository│ │ IndexRepository  │ │  Memory      │
//! │ instances +     │ │ tantivy docs via │ │  DashMap     │
//! │ instance_meta.  │ │ the field codec  │ │              │
//! └─────────────────┘ └──────────────────┘ └──────────────┘
//! ```
//!
//! # Pagination
//!
//! All backends order instances the same way: descending start time, ties
//! broken by ascending id, instances without a start time last. Pages are
//! 1-based; out-of-range requests and empty result sets produce
//! [`InstancePage::blank`]. Next/previous navigation saturates at the ends.
//!
//! # Relational backend limitation
//!
//! [`SqliteRepository`] persists only the workflow id of an instance. Reads
//! return a [`Workflow::reference`] without tasks or conditions; the index
//! and memory backends return the full snapshot.
//!
//! # Configuration
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `INSTREPO_BACKEND` | `memory` | `sqlite`, `index` or `memory` |
//! | `INSTREPO_PAGE_SIZE` | `20` | Instances per page |
//! | `INSTREPO_DATABASE_URL` | - | SQLite URL (sqlite backend) |
//! | `INSTREPO_MAX_CONNECTIONS` | `5` | SQLite pool size |
//! | `INSTREPO_INDEX_PATH` | - | Index directory (index backend) |
//!
//! # Modules
//!
//! - [`codec`]: Flat field encoding of instances for the document index
//! - [`config`]: Store configuration from environment variables
//! - [`error`]: Error types with stable error codes
//! - [`migrations`]: Embedded SQLite migrations
//! - [`model`]: Workflow, task, condition and instance types
//! - [`pagination`]: Page type and shared page math
//! - [`repository`]: The repository contract and its backends
//! - [`store`]: The façade used by callers

/// Flat field encoding of workflow instances.
pub mod codec;

/// Store configuration loaded from environment variables.
pub mod config;

/// Error types with stable machine-readable codes.
pub mod error;

/// Embedded database migrations.
pub mod migrations;

/// Domain model.
pub mod model;

/// Page type, ordering and backend-agnostic navigation.
pub mod pagination;

/// Repository contract and backend implementations.
pub mod repository;

/// Instance store façade.
pub mod store;

pub use config::{BackendConfig, BackendKind, ConfigError, StoreConfig};
pub use error::{CodecError, Result, StoreError};
pub use model::{Metadata, Workflow, WorkflowCondition, WorkflowInstance, WorkflowTask};
pub use pagination::{DEFAULT_PAGE_SIZE, InstancePage};
pub use repository::{IndexRepository, InstanceRepository, MemoryRepository, SqliteRepository};
pub use store::InstanceStore;
