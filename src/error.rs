//! Error types for building and (de)serializing BVHs.

use thiserror::Error;

/// Main error type of this crate.
///
/// Only recoverable conditions are reported here. Violated preconditions inside the hot
/// query and refit loops are checked with debug assertions instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The supplied buffer cannot hold the serialized tree.
    #[error("Buffer too small: {required} bytes required, {actual} available")]
    BufferTooSmall {
        /// Bytes needed by the serialized tree.
        required: usize,
        /// Bytes available in the supplied buffer.
        actual: usize,
    },

    /// The buffer passed to in-place deserialization is not aligned for the node arrays.
    #[error("Buffer is not aligned to {align} bytes")]
    MisalignedBuffer {
        /// Required alignment in bytes.
        align: usize,
    },

    /// The serialized header contradicts itself or the buffer.
    #[error("Invalid serialized header: {0}")]
    InvalidHeader(String),

    /// A serialized node points outside the node array.
    #[error("Corrupt node {index}: {reason}")]
    CorruptNode {
        /// Position of the node in the node array.
        index: usize,
        /// What is wrong with it.
        reason: String,
    },

    /// The mesh has more sub-parts than a quantized leaf can address.
    #[error("Mesh has {parts} parts, quantized leaves address at most {max}")]
    TooManyParts {
        /// Number of sub-parts in the mesh.
        parts: usize,
        /// Largest supported number of sub-parts.
        max: usize,
    },

    /// A triangle index does not fit into a quantized leaf.
    #[error("Triangle index {index} exceeds the quantized leaf limit of {max}")]
    TriangleIndexOverflow {
        /// The offending triangle index.
        index: usize,
        /// Largest supported triangle index.
        max: usize,
    },
}

impl Error {
    /// Create an invalid header error.
    pub fn invalid_header(msg: impl Into<String>) -> Self {
        Self::InvalidHeader(msg.into())
    }
}

/// Result type alias for fallible BVH operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = Error::BufferTooSmall {
            required: 128,
            actual: 127,
        };
        assert!(e.to_string().contains("128"));
        assert!(e.to_string().contains("127"));

        let e = Error::invalid_header("node count");
        assert!(e.to_string().contains("node count"));
    }
}
