//! # popeidx
//!
//! Server-side core of a Partial Order-Preserving Encoded (POPE) key/value index, plus its
//! companion mutable OPE (mOPE) index. Both are encrypted outsourced indexes: the server stores
//! only opaque ciphertexts, and answers point lookups and range queries by consulting a
//! [`Oracle`] that holds the decryption key.
//!
//! The primary types you'll want to use are:
//!
//! * [`PopeTree`], a buffer B-tree that lazily reveals ciphertext order only as queries demand
//!   it;
//! * [`MopeTree`], a balanced B-tree that assigns every key a mutable, order-preserving integer
//!   encoding;
//! * [`Cheater`], an unsorted reference index that decrypts eagerly, used to cross-check the
//!   other two in tests; and
//! * [`Client`], the transparent encode/call/decode facade a plaintext-speaking caller uses to
//!   talk to any of the above.
//!
//! None of the index types here are durable, concurrent, networked, or authenticated -- see the
//! crate's design notes for why that's by design, not by omission.
//!

pub mod cheater;
pub mod cipher;
pub mod client;
pub mod config;
pub mod key_provider;
pub mod mope;
pub mod oracle;
pub mod pope;

mod backend;
mod error;

#[doc(inline)]
pub use crate::{
    backend::Backend,
    cheater::Cheater,
    cipher::Cipher,
    client::Client,
    config::{BackendKind, Config},
    error::Error,
    key_provider::KeyProvider,
    mope::MopeTree,
    oracle::Oracle,
    pope::PopeTree,
};

#[doc(hidden)]
pub use crate::cipher::AES256v1;

#[cfg(test)]
#[macro_use]
extern crate quickcheck;

/// Panics with diagnostic state if `cond` is false.
///
/// This is the crate's one and only "this is a bug, not a runtime condition" escape hatch (spec
/// §7's `InvariantViolation`). It's a thin wrapper around `debug_assert!`, so these checks
/// compile away entirely in release builds (spec §9 Design Notes: "none of the asserts should
/// run in release mode") -- every call site reads the same way, and there's a single place to
/// attach more diagnostic context if we ever need it.
macro_rules! invariant {
    ($cond:expr, $($arg:tt)+) => {
        debug_assert!($cond, $($arg)+);
    };
}
pub(crate) use invariant;

#[doc = include_str!("../README.md")]
#[cfg(doctest)]
pub struct ReadmeDoctests;
