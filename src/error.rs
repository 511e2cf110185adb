//! Error types for the runtime.

use std::sync::Arc;

use thiserror::Error;

use crate::keypath::Keypath;

/// Errors surfaced synchronously to the caller of the violating operation.
///
/// Getter faults are not represented here: they are contained inside
/// computation evaluation and read back as an absent value.
#[derive(Debug, Clone, Error)]
pub enum FlowError {
    /// A computed keypath without a setter was written to.
    #[error("computed keypath `{keypath}` has no setter and is read-only")]
    ReadOnlyComputed {
        /// The computed keypath.
        keypath: Keypath,
    },

    /// A computation was declared twice on the same keypath.
    #[error("keypath `{keypath}` is already computed")]
    AlreadyComputed {
        /// The computed keypath.
        keypath: Keypath,
    },

    /// A computation setter failed.
    #[error("setter for `{keypath}` failed: {fault}")]
    Setter {
        /// The computed keypath.
        keypath: Keypath,
        /// The fault raised by the setter.
        fault: Arc<anyhow::Error>,
    },

    /// A shuffle mapping does not partition the old positions.
    #[error("malformed shuffle mapping: {reason}")]
    MalformedShuffle {
        /// What is wrong with the mapping.
        reason: String,
    },

    /// An array mutation addressed a keypath that does not hold a list.
    #[error("keypath `{keypath}` does not hold an ordered collection")]
    NotOrdered {
        /// The addressed keypath.
        keypath: Keypath,
    },

    /// A write addressed a list position too far past its end.
    #[error("index {index} is out of reach for the list of length {len} at `{keypath}`")]
    IndexOutOfRange {
        /// The list keypath.
        keypath: Keypath,
        /// The requested position.
        index: usize,
        /// The list length at the time of the write.
        len: usize,
    },

    /// The root was replaced with something other than a mapping.
    #[error("the root keypath can only hold a mapping")]
    InvalidRoot,
}

/// Result alias with [`FlowError`] as the default error.
pub type Result<T, E = FlowError> = std::result::Result<T, E>;
