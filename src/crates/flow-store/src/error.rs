//! Error type for state-store operations.

use thiserror::Error;

/// Result alias used throughout `flow-store`.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Failures a [`crate::StateStore`] implementation can report.
///
/// [`StoreError::Missing`] is special: the compiler and the `Loader` instruction treat it as a
/// soft condition (no prior state, not a fault) rather than propagating it as an error. Every
/// other variant is a hard failure.
#[derive(Error, Debug)]
pub enum StoreError {
    /// No blob is registered under the requested key. Callers that can tolerate "no prior
    /// state" (the `Loader` instruction) should downgrade this to `None` rather than fail.
    #[error("no state registered under key {0}")]
    Missing(String),

    /// The group identity has no assigned offset in the store's persistent ordering.
    #[error("group {0} has no registered commit offset")]
    UnknownGroup(String),

    /// A `commit` call supplied a state-id count that didn't match the store's expected arity.
    #[error("commit expected {expected} state ids, got {actual}")]
    CommitArity {
        /// Number of state ids the store's persistent ordering requires.
        expected: usize,
        /// Number of state ids actually supplied.
        actual: usize,
    },

    /// Serialization of a state blob failed.
    #[error("state serialization failed: {0}")]
    Serialization(#[from] bincode::Error),

    /// The underlying storage backend reported a failure (I/O, network, etc).
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Build a [`StoreError::Missing`] for the given key's display form.
    pub fn missing(key: impl std::fmt::Display) -> Self {
        Self::Missing(key.to_string())
    }

    /// Build a [`StoreError::UnknownGroup`] for the given group id's display form.
    pub fn unknown_group(gid: impl std::fmt::Display) -> Self {
        Self::UnknownGroup(gid.to_string())
    }
}
