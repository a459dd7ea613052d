// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::pagination::DEFAULT_PAGE_SIZE;
use crate::repository::sqlite::is_memory_url;

/// Storage backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Sqlite,
    Index,
    Memory,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Index => "index",
            Self::Memory => "memory",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "index" => Ok(Self::Index),
            "memory" => Ok(Self::Memory),
            _ => Err(ConfigError::Invalid(
                "INSTREPO_BACKEND",
                "must be one of: sqlite, index, memory",
            )),
        }
    }
}

/// Backend-specific connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    Sqlite {
        /// SQLite connection URL
        database_url: String,
        max_connections: u32,
    },
    Index {
        /// Directory holding the index files
        path: PathBuf,
    },
    Memory,
}

impl BackendConfig {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Sqlite { .. } => BackendKind::Sqlite,
            Self::Index { .. } => BackendKind::Index,
            Self::Memory => BackendKind::Memory,
        }
    }
}

/// Instance store configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub backend: BackendConfig,
    /// Instances per page (always positive)
    pub page_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::Memory,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl StoreConfig {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `INSTREPO_BACKEND`: `sqlite`, `index` or `memory` (default: memory)
    /// - `INSTREPO_PAGE_SIZE`: Instances per page; non-positive means default (default: 20)
    /// - `INSTREPO_MAX_CONNECTIONS`: SQLite pool size (default: 5, always 1 for `:memory:`)
    ///
    /// Required per backend:
    /// - `INSTREPO_DATABASE_URL`: SQLite connection string (sqlite)
    /// - `INSTREPO_INDEX_PATH`: Index directory (index)
    pub fn from_env() -> Result<Self, ConfigError> {
        let kind = match std::env::var("INSTREPO_BACKEND") {
            Ok(value) => value.parse()?,
            Err(_) => BackendKind::Memory,
        };

        let page_size: i64 = std::env::var("INSTREPO_PAGE_SIZE")
            .unwrap_or_else(|_| DEFAULT_PAGE_SIZE.to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("INSTREPO_PAGE_SIZE", "must be an integer"))?;
        let page_size = if page_size > 0 {
            page_size as usize
        } else {
            DEFAULT_PAGE_SIZE
        };

        let backend = match kind {
            BackendKind::Sqlite => {
                let database_url = std::env::var("INSTREPO_DATABASE_URL")
                    .map_err(|_| ConfigError::Missing("INSTREPO_DATABASE_URL"))?;

                let max_connections: u32 = std::env::var("INSTREPO_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or(ConfigError::Invalid(
                        "INSTREPO_MAX_CONNECTIONS",
                        "must be a positive integer",
                    ))?;
                let max_connections = if is_memory_url(&database_url) {
                    1
                } else {
                    max_connections
                };

                BackendConfig::Sqlite {
                    database_url,
                    max_connections,
                }
            }
            BackendKind::Index => {
                let path = std::env::var("INSTREPO_INDEX_PATH")
                    .map_err(|_| ConfigError::Missing("INSTREPO_INDEX_PATH"))?;
                BackendConfig::Index {
                    path: PathBuf::from(path),
                }
            }
            BackendKind::Memory => BackendConfig::Memory,
        };

        Ok(Self { backend, page_size })
    }
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
