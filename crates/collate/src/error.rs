//! Error types for Collate.
//!
//! Configuration problems are reported when a virtual collection is built;
//! collection errors come from mutating a [`Collection`](crate::model::Collection).
//! Lookups of absent records are not errors and return `None`.

use thiserror::Error;

use crate::model::RecordId;

/// Errors in a virtual collection configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A grouping rule has no iterator.
    #[error("grouping rule {index} has no iterator")]
    MissingIterator {
        /// Position of the rule in the grouping chain.
        index: usize,
    },

    /// An attribute key was configured with an empty name.
    #[error("empty attribute name in {context}")]
    EmptyAttributeName {
        /// Which option held the empty name.
        context: String,
    },
}

/// Errors from mutating a record collection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollectionError {
    /// A position past the end of the collection.
    #[error("index {index} is out of bounds for a collection of length {len}")]
    IndexOutOfBounds {
        /// The requested position.
        index: usize,
        /// The collection length.
        len: usize,
    },

    /// A record with this id is already in the collection.
    #[error("record {0} is already in the collection")]
    DuplicateRecord(RecordId),

    /// No record with this id is in the collection.
    #[error("record {0} is not in the collection")]
    RecordNotFound(RecordId),
}

/// Top-level error type for Collate.
#[derive(Error, Debug)]
pub enum CollateError {
    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Collection mutation failed.
    #[error("collection error: {0}")]
    Collection(#[from] CollectionError),

    /// Settings or record JSON could not be parsed.
    #[error("invalid settings: {0}")]
    Settings(#[from] serde_json::Error),
}

/// Result type alias for Collate operations.
pub type Result<T> = std::result::Result<T, CollateError>;
