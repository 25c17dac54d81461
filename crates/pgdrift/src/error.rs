use std::time::Duration;

use thiserror::Error;

use crate::changeset::ChangesetIssue;

#[derive(Debug, Error)]
pub enum Error {
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// A query or scan failed; `operation` says which one.
    #[error("{operation}: {source}")]
    Query {
        operation: String,
        #[source]
        source: tokio_postgres::Error,
    },

    /// A statement inside a change's transaction failed.
    #[error("execute change {version}: {source}")]
    Exec {
        version: String,
        #[source]
        source: tokio_postgres::Error,
    },

    /// A change callback reported a failure of its own.
    #[error("change {version} failed: {message}")]
    Change { version: String, message: String },

    /// The changeset was rejected before any database I/O.
    #[error("invalid changeset: {} problem(s) found", issues.len())]
    InvalidChangeset { issues: Vec<ChangesetIssue> },

    #[error("{operation} timed out after {timeout:?}")]
    Timeout { operation: String, timeout: Duration },
}

impl Error {
    /// Wrap a driver error with the name of the failing operation.
    pub(crate) fn query(operation: impl Into<String>) -> impl FnOnce(tokio_postgres::Error) -> Self {
        let operation = operation.into();
        move |source| Error::Query { operation, source }
    }

    /// True for the sentinel returned when changeset validation fails.
    pub fn is_invalid_changeset(&self) -> bool {
        matches!(self, Error::InvalidChangeset { .. })
    }
}
