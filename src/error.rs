//! Error taxonomy for the diff core.
//!
//! Errors are classified the way the diff algorithm needs to react to them:
//! configuration problems fail fast before any query runs, schema and
//! uniqueness problems are fatal once discovered, query failures abort the
//! enclosing diff and cancel siblings, and cancellation is an expected,
//! silent outcome. Nothing here is retried — see `DiffError::is_retryable`.

use std::fmt;

/// Primary error type for the diff core.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DiffError {
    /// Bad URI, unknown driver, missing column, conflicting flags.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Declared types cannot be coerced to a common canonical form, or a
    /// required key/extra column is missing on one side.
    #[error("schema incompatibility: {0}")]
    SchemaIncompatibility(String),

    /// `COUNT(*) != COUNT(DISTINCT key_cols)` on a segment whose caller did
    /// not assert unique keys.
    #[error("uniqueness violation in {table}: {detail}")]
    UniquenessViolation { table: String, detail: String },

    /// The underlying driver reported an error executing a query.
    #[error("query failed against {db}: {source_msg}")]
    Query { db: String, source_msg: String },

    /// The caller closed the diff iterator or `limit` was reached.
    /// Not a failure — the façade drains outstanding work silently.
    #[error("diff cancelled")]
    Cancelled,

    /// A numeric value did not fit the declared/canonical range.
    #[error("overflow or precision loss: {0}")]
    Overflow(String),
}

impl DiffError {
    /// No error kind in this core is retried automatically. Databases under
    /// diff are the source of truth; a silent retry could mask a
    /// determinism problem rather than paper over a transient blip.
    pub fn is_retryable(&self) -> bool {
        false
    }

    pub fn configuration(msg: impl fmt::Display) -> Self {
        DiffError::Configuration(msg.to_string())
    }

    pub fn schema(msg: impl fmt::Display) -> Self {
        DiffError::SchemaIncompatibility(msg.to_string())
    }

    pub fn query(db: impl Into<String>, source: impl fmt::Display) -> Self {
        DiffError::Query {
            db: db.into(),
            source_msg: source.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DiffError>;
