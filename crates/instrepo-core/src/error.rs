// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for instrepo-core.
//!
//! Two kinds reach callers: [`StoreError::Repository`] when storage itself
//! failed (connection, query, filesystem), and [`StoreError::Codec`] when the
//! stored data is structurally inconsistent. A missing instance is never an
//! error; lookups return `Ok(None)`.

use thiserror::Error;

/// Result type using StoreError.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors returned by every instance repository.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Storage-layer failure.
    #[error("Repository error during '{operation}': {details}")]
    Repository {
        /// The operation that failed.
        operation: String,
        /// Underlying message.
        details: String,
    },

    /// Stored data could not be mapped back to (or onto) the domain model.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Structural problems found while encoding or decoding a document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum CodecError {
    /// A required singleton field is absent.
    #[error("missing required field '{0}'")]
    MissingField(String),

    /// A singleton field holds more than one value.
    #[error("field '{field}' holds {count} values, expected one")]
    TooManyValues {
        /// Field name.
        field: String,
        /// Number of values found.
        count: usize,
    },

    /// Parallel arrays describing one list have different lengths.
    #[error("parallel arrays for '{group}' have mismatched lengths: {lengths:?}")]
    MismatchedArrays {
        /// Field group (e.g. `task` or `<taskId>.condition`).
        group: String,
        /// Length of each array in the group.
        lengths: Vec<usize>,
    },

    /// A numeric or boolean field could not be parsed.
    #[error("field '{field}' has invalid value '{value}'")]
    InvalidValue {
        /// Field name.
        field: String,
        /// Raw stored value.
        value: String,
    },

    /// An instance id matched more than one stored document.
    #[error("instance id '{id}' matched {count} documents")]
    DuplicateId {
        /// The instance id.
        id: String,
        /// Number of matching documents.
        count: usize,
    },

    /// Two tasks share an id, so their namespaced fields would alias.
    #[error("task id '{0}' appears more than once")]
    DuplicateTaskId(String),

    /// One field namespace is nested inside another (e.g. task ids `a` and
    /// `a.condition.0`), so their fields could alias.
    #[error("field namespace '{inner}' is nested inside '{outer}'")]
    NamespaceCollision {
        /// The enclosing namespace.
        outer: String,
        /// The namespace that starts with `outer`.
        inner: String,
    },

    /// A metadata key collides with a structural field name.
    #[error("metadata key '{0}' collides with a reserved field")]
    ReservedField(String),
}

impl StoreError {
    /// Build a repository error for `operation`.
    pub fn repository(operation: impl Into<String>, details: impl ToString) -> Self {
        Self::Repository {
            operation: operation.into(),
            details: details.to_string(),
        }
    }

    /// Machine-readable code for remote callers.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Repository { .. } => "REPOSITORY_ERROR",
            Self::Codec(_) => "CODEC_ERROR",
        }
    }

    /// Whether this error reports inconsistent stored data rather than an
    /// unreachable store.
    pub fn is_codec(&self) -> bool {
        matches!(self, Self::Codec(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::repository("query", err)
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::repository("migrate", err)
    }
}

impl From<tantivy::TantivyError> for StoreError {
    fn from(err: tantivy::TantivyError) -> Self {
        StoreError::repository("index", err)
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::repository("io", err)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::repository("json", err)
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        StoreError::repository("blocking_task", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let repo = StoreError::repository("add", "disk full");
        assert_eq!(repo.error_code(), "REPOSITORY_ERROR");
        assert!(!repo.is_codec());

        let codec = StoreError::from(CodecError::MissingField("inst.id".to_string()));
        assert_eq!(codec.error_code(), "CODEC_ERROR");
        assert!(codec.is_codec());
    }

    #[test]
    fn test_error_display() {
        let repo = StoreError::repository("update", "database is locked");
        assert_eq!(
            repo.to_string(),
            "Repository error during 'update': database is locked"
        );

        let codec = StoreError::from(CodecError::MismatchedArrays {
            group: "task".to_string(),
            lengths: vec![2, 1, 2, 2],
        });
        assert_eq!(
            codec.to_string(),
            "Codec error: parallel arrays for 'task' have mismatched lengths: [2, 1, 2, 2]"
        );

        let dup = CodecError::DuplicateId {
            id: "abc".to_string(),
            count: 2,
        };
        assert_eq!(dup.to_string(), "instance id 'abc' matched 2 documents");
    }

    #[test]
    fn test_from_sqlx_error() {
        let err: StoreError = sqlx::Error::RowNotFound.into();
        assert!(matches!(
            err,
            StoreError::Repository { ref operation, .. } if operation == "query"
        ));
    }

    #[test]
    fn test_from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: StoreError = io.into();
        assert_eq!(err.error_code(), "REPOSITORY_ERROR");
        assert!(err.to_string().contains("denied"));
    }
}
