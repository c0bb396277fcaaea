//! The server-side storage contract a [`Client`](crate::Client) talks to (spec §6).
//!

use crate::Error;

/// A key/value index keyed by opaque ciphertexts.
///
/// Implemented by [`PopeTree`](crate::PopeTree), [`MopeTree`](crate::MopeTree), and
/// [`Cheater`](crate::Cheater). All three are functionally equivalent (spec §4.5's "only
/// contract"): for the same sequence of operations, they agree on every lookup, range, and
/// traversal result, even though they differ wildly in what they reveal to an observer along
/// the way.
pub trait Backend {
    /// Insert a `(key, value)` pair. Duplicate keys are permitted: both values remain
    /// independently retrievable via [`Backend::traverse`].
    ///
    /// # Errors
    ///
    /// Returns an error if the oracle operations this requires fail.
    fn insert(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<(), Error>;

    /// Look up the value stored for `key`, or `None` if it is absent.
    ///
    /// For a key inserted more than once, which of the values comes back is
    /// implementation-defined: mOPE and the cheater return the first one inserted, POPE returns
    /// whichever one happens to still be in the leaf's buffer at the position the oracle
    /// resolves to (spec §8, scenario 5).
    ///
    /// # Errors
    ///
    /// Returns an error if the oracle operations this requires fail.
    fn lookup(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, Error>;

    /// All `(key, value)` pairs with `key1 <= key < key2` by decrypted plaintext order,
    /// left-inclusive and right-exclusive (spec §6).
    ///
    /// # Errors
    ///
    /// Returns an error if the oracle operations this requires fail.
    fn range_search(&mut self, key1: &[u8], key2: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error>;

    /// The total number of `(key, value)` pairs stored, counting duplicates.
    fn size(&self) -> usize;

    /// All `(key, value)` pairs, in implementation-defined order: unspecified for POPE
    /// (left-to-right at the leaf level, buffers interleaved), plaintext order for mOPE and the
    /// cheater.
    fn traverse(&self) -> Vec<(Vec<u8>, Vec<u8>)>;
}

impl Backend for Box<dyn Backend> {
    fn insert(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<(), Error> {
        (**self).insert(key, value)
    }

    fn lookup(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        (**self).lookup(key)
    }

    fn range_search(&mut self, key1: &[u8], key2: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error> {
        (**self).range_search(key1, key2)
    }

    fn size(&self) -> usize {
        (**self).size()
    }

    fn traverse(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        (**self).traverse()
    }
}
