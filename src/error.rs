//! Error types shared across the rack.

use crate::port::Direction;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while patching cables between ports
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    /// The referenced module is not resident in the rack
    #[error("module not found in rack")]
    InvalidModule,

    /// The referenced port does not exist on its module
    #[error("{direction:?} port {index} does not exist on module")]
    InvalidPort {
        /// Direction that was looked up.
        direction: Direction,
        /// Index that was out of range.
        index: usize,
    },

    /// Both ends of the cable have the same direction
    #[error("cannot connect two {0:?} ports")]
    SameDirection(Direction),

    /// The input port already carries a cable
    #[error("input port already carries a cable")]
    InputOccupied,
}

/// Errors raised while reading or writing rack documents
#[derive(Debug, Error)]
pub enum DocumentError {
    /// Failed to read a document from disk
    #[error("failed to read '{path}': {source}")]
    Read {
        /// Path of the document.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to write a document to disk
    #[error("failed to write '{path}': {source}")]
    Write {
        /// Path of the document.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid JSON or does not match the schema
    #[error("malformed rack document: {0}")]
    Parse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_error_display() {
        assert_eq!(
            PatchError::SameDirection(Direction::Input).to_string(),
            "cannot connect two Input ports"
        );
        assert_eq!(
            PatchError::InvalidPort {
                direction: Direction::Output,
                index: 7
            }
            .to_string(),
            "Output port 7 does not exist on module"
        );
    }

    #[test]
    fn test_document_error_from_json() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let doc: DocumentError = err.into();
        assert!(doc.to_string().starts_with("malformed rack document"));
    }
}
