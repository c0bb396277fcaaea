//! Where the wild things are
//!

use thiserror::Error;

/// All the different kinds of problems that can occur in popeidx.
///
/// `InvariantViolation`-class bugs (a dirty internal node surviving a split, a mismatched
/// child count, a broken encoding bijection) are not represented here: those are programmer
/// errors in the tree implementation itself, and are raised as panics via [`crate::invariant`]
/// rather than returned as a `Result`, since the tree's invariants can no longer be trusted once
/// one of them has failed.
#[derive(Error, Debug)]
#[non_exhaustive]
#[allow(missing_docs, clippy::missing_docs_in_private_items)] // if the error name and description don't explain it, a one-line comment isn't going to help either
pub enum Error {
    #[error("failed to decode ciphertext: {0}")]
    BadCiphertext(String),
    #[error("haystack of size {size} exceeds the oracle bound of {max_size}")]
    BoundViolation { size: usize, max_size: usize },
    #[error("failed to encrypt value: {0}")]
    EncryptionError(String),
    #[error("failed to derive key material: {0}")]
    KeyError(String),
    #[error("could not perform requested operation: {0}")]
    OperationError(String),
    #[error("overflow detected: {0}")]
    OverflowError(String),
}
