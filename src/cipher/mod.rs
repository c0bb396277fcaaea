//! The opaque ciphertext contract (spec §4.1).
//!
//! The `Cipher` itself is explicitly out of scope for the core data structures: POPE and mOPE
//! never decrypt anything of their own accord, and treat every key and value as an opaque byte
//! string. What lives here is the trait boundary, plus one concrete implementation
//! ([`AES256v1`]) so the rest of the crate (and its tests) has something real to plug in.
//!

mod aes256v1;

pub use self::aes256v1::AES256v1;

use crate::Error;

/// What a comparison oracle (and, transitively, a client facade) needs from an encryption
/// scheme.
///
/// `decode` must be the two-sided inverse of `encode` on every ciphertext `encode` itself
/// produced: `decode(encode(p))? == p` for all valid plaintexts `p`. `encode` may be
/// randomized -- the same plaintext can map to different ciphertexts on different calls -- but
/// `decode` must be a pure function of its input.
pub trait Cipher: Send + Sync {
    /// Encrypt `plaintext`, returning an opaque ciphertext.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EncryptionError`] if the underlying cryptographic operation fails.
    fn encode(&self, plaintext: &[u8]) -> Result<Vec<u8>, Error>;

    /// Decrypt `ciphertext` back to the plaintext bytes it was created from.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadCiphertext`] if `ciphertext` was corrupted, was encrypted under a
    /// different key, or is otherwise not a ciphertext this cipher produced.
    fn decode(&self, ciphertext: &[u8]) -> Result<Vec<u8>, Error>;
}
