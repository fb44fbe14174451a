//! Error types for the tiered sequence allocator.
//!
//! Every tier classifies its failures into one of a small set of kinds. The
//! allocator never looks at payloads; it only asks for the [`ErrorKind`] to
//! decide whether to fall through to the next tier, refill, degrade the shared
//! tier, or give up.
//!
//! ## Error Cases
//! - `NotFound`: a tier (or the durable store) has nothing to hand out. Drives
//!   fallback and refills, and only surfaces when the durable store itself
//!   returns an empty batch.
//! - `Cache`: the shared tier failed to talk to its backing store.
//! - `Database`: the durable store failed. Fatal for the current request.
//! - `Timeout`: the caller's deadline expired before the operation finished.
//! - `System`: an unexpected internal failure, e.g. a malformed stored value.

use core::fmt;

/// Boxed source error carried by the I/O variants.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A result type defaulting to the allocator's [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Unified error type for every tier and the allocator itself.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Nothing is available in the tier or store that was asked.
    #[error("{op}: no id available")]
    NotFound { op: &'static str },

    /// The shared cache tier failed for a reason other than being empty.
    #[error("{op}: cache error: {source}")]
    Cache {
        op: &'static str,
        #[source]
        source: BoxError,
    },

    /// The durable store failed. No partial allocation may be assumed.
    #[error("{op}: database error: {source}")]
    Database {
        op: &'static str,
        #[source]
        source: BoxError,
    },

    /// The operation did not finish before the caller's deadline.
    #[error("{op}: deadline exceeded")]
    Timeout { op: &'static str },

    /// Unexpected internal failure.
    #[error("{op}: system error: {reason}")]
    System { op: &'static str, reason: String },
}

/// Classification of an [`Error`], independent of its payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Cache,
    Database,
    Timeout,
    System,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotFound => "not_found",
            Self::Cache => "cache_error",
            Self::Database => "database_error",
            Self::Timeout => "timeout",
            Self::System => "system_error",
        };
        f.write_str(name)
    }
}

impl Error {
    pub const fn not_found(op: &'static str) -> Self {
        Self::NotFound { op }
    }

    pub fn cache(op: &'static str, source: impl Into<BoxError>) -> Self {
        Self::Cache {
            op,
            source: source.into(),
        }
    }

    pub fn database(op: &'static str, source: impl Into<BoxError>) -> Self {
        Self::Database {
            op,
            source: source.into(),
        }
    }

    pub const fn timeout(op: &'static str) -> Self {
        Self::Timeout { op }
    }

    pub fn system(op: &'static str, reason: impl Into<String>) -> Self {
        Self::System {
            op,
            reason: reason.into(),
        }
    }

    /// Returns the classification of this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Cache { .. } => ErrorKind::Cache,
            Self::Database { .. } => ErrorKind::Database,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::System { .. } => ErrorKind::System,
        }
    }

    /// The operation that produced this error.
    pub const fn op(&self) -> &'static str {
        match self {
            Self::NotFound { op }
            | Self::Cache { op, .. }
            | Self::Database { op, .. }
            | Self::Timeout { op }
            | Self::System { op, .. } => *op,
        }
    }

    /// `true` when the tier is merely empty. This is an expected condition
    /// that drives a refill, never a tier failure.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// `true` for transient failures that a read-only operation may retry.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Cache { .. } | Self::Timeout { .. })
    }
}
