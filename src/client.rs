//! The transparent encode/call/decode facade a plaintext-speaking caller uses to talk to any
//! [`Backend`] (spec §4.6).
//!
//! Everything below this module -- [`Oracle`](crate::Oracle), [`PopeTree`](crate::PopeTree),
//! [`MopeTree`](crate::MopeTree), [`Cheater`](crate::Cheater) -- only ever sees ciphertext.
//! `Client` is the one place in the crate that holds plaintext, and it holds it only for as long
//! as it takes to encode an input or decode an output.

use crate::{config::BackendKind, Backend, Cheater, Cipher, Config, Error, MopeTree, Oracle, PopeTree};

/// Wraps a [`Backend`] and a [`Cipher`] so that callers can `insert`, `lookup`, and
/// `range_search` using plaintext directly, instead of encoding and decoding by hand.
pub struct Client<B: Backend, C: Cipher> {
    backend: B,
    cipher: C,
}

impl<B: Backend, C: Cipher> Client<B, C> {
    /// Wrap `backend` so it can be driven with plaintext, encoding and decoding through `cipher`.
    pub fn new(backend: B, cipher: C) -> Client<B, C> {
        Client { backend, cipher }
    }

    /// Encrypt `key` and `value` and insert them into the backend.
    ///
    /// # Errors
    ///
    /// Returns an error if encryption fails, or if the backend's insert does.
    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<(), Error> {
        let ekey = self.cipher.encode(key)?;
        let evalue = self.cipher.encode(value)?;
        self.backend.insert(ekey, evalue)
    }

    /// Look up `key`, returning the decrypted value if present.
    ///
    /// # Errors
    ///
    /// Returns an error if encryption or decryption fails, or if the backend's lookup does.
    pub fn lookup(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        let ekey = self.cipher.encode(key)?;
        match self.backend.lookup(&ekey)? {
            Some(evalue) => Ok(Some(self.cipher.decode(&evalue)?)),
            None => Ok(None),
        }
    }

    /// All `(key, value)` pairs with `key1 <= key < key2` in plaintext order, decrypted.
    ///
    /// If `key1 > key2` (comparing the plaintexts directly, since this is the one place in the
    /// crate that can), the backend is never contacted and the result is empty -- spec §4.6's
    /// short-circuit.
    ///
    /// # Errors
    ///
    /// Returns an error if encryption or decryption fails, or if the backend's range search does.
    pub fn range_search(&mut self, key1: &[u8], key2: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error> {
        if key1 > key2 {
            return Ok(Vec::new());
        }
        let ekey1 = self.cipher.encode(key1)?;
        let ekey2 = self.cipher.encode(key2)?;
        self.backend
            .range_search(&ekey1, &ekey2)?
            .into_iter()
            .map(|(k, v)| Ok((self.cipher.decode(&k)?, self.cipher.decode(&v)?)))
            .collect()
    }

    /// The total number of `(key, value)` pairs stored in the backend, counting duplicates.
    pub fn size(&self) -> usize {
        self.backend.size()
    }

    /// All `(key, value)` pairs, decrypted, in whatever order the backend's own `traverse`
    /// produces them.
    ///
    /// # Errors
    ///
    /// Returns an error if any stored key or value fails to decrypt.
    pub fn traverse(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error> {
        self.backend
            .traverse()
            .into_iter()
            .map(|(k, v)| Ok((self.cipher.decode(&k)?, self.cipher.decode(&v)?)))
            .collect()
    }

    /// Read-only access to the wrapped backend, e.g. to call backend-specific methods like
    /// `check()` or `oracle()` that aren't part of the [`Backend`] trait.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Mutable access to the wrapped backend.
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

impl<C: Cipher + Clone + 'static> Client<Box<dyn Backend>, C> {
    /// Build a client around whichever backend `config` names (spec §6's "backend selection"),
    /// wiring up an [`Oracle`] from a clone of `cipher` along the way.
    ///
    /// POPE's pivot sampling uses the system's thread-local RNG; construct a [`PopeTree`]
    /// directly (and wrap it with [`Client::new`]) if you need a seeded, reproducible one, e.g.
    /// in tests.
    ///
    /// # Errors
    ///
    /// Returns an error if `config`'s `l` can't back a valid [`Oracle`].
    pub fn with_config(cipher: C, config: Config) -> Result<Client<Box<dyn Backend>, C>, Error> {
        let oracle = Oracle::new(cipher.clone(), config.l())?;
        let backend: Box<dyn Backend> = match config.backend() {
            BackendKind::Pope => Box::new(PopeTree::new(oracle, rand::thread_rng())),
            BackendKind::Mope => Box::new(MopeTree::new(oracle, config.maxlen())),
            BackendKind::Cheater => Box::new(Cheater::new(cipher.clone())),
        };
        Ok(Client::new(backend, cipher))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::tests::ReversingCipher;
    use rand::SeedableRng;
    use rand_chacha::ChaChaRng;

    fn cipher() -> ReversingCipher {
        ReversingCipher::new(b"|v1")
    }

    #[test]
    fn round_trips_through_cheater() {
        let mut client = Client::new(Cheater::new(cipher()), cipher());
        client.insert(b"apple", b"apple-value").unwrap();
        assert_eq!(client.lookup(b"apple").unwrap(), Some(b"apple-value".to_vec()));
        assert_eq!(client.lookup(b"missing").unwrap(), None);
    }

    #[test]
    fn round_trips_through_pope() {
        let oracle = Oracle::new(cipher(), 5).unwrap();
        let backend = PopeTree::new(oracle, ChaChaRng::seed_from_u64(1));
        let mut client = Client::new(backend, cipher());
        client.insert(b"apple", b"apple-value").unwrap();
        client.insert(b"banana", b"banana-value").unwrap();
        assert_eq!(client.lookup(b"banana").unwrap(), Some(b"banana-value".to_vec()));
    }

    #[test]
    fn round_trips_through_mope() {
        let oracle = Oracle::new(cipher(), 4).unwrap();
        let backend = MopeTree::new(oracle, 4);
        let mut client = Client::new(backend, cipher());
        client.insert(b"apple", b"apple-value").unwrap();
        client.insert(b"banana", b"banana-value").unwrap();
        assert_eq!(client.lookup(b"banana").unwrap(), Some(b"banana-value".to_vec()));
    }

    #[test]
    fn range_search_short_circuits_on_reversed_bounds() {
        let mut client = Client::new(Cheater::new(cipher()), cipher());
        client.insert(b"m", b"mv").unwrap();
        assert_eq!(client.range_search(b"z", b"a").unwrap(), Vec::new());
    }

    #[test]
    fn range_search_decrypts_plaintext_in_order() {
        let mut client = Client::new(Cheater::new(cipher()), cipher());
        for w in [&b"a"[..], b"c", b"e", b"g"] {
            client.insert(w, &[w, b"v"].concat()).unwrap();
        }
        let got = client.range_search(b"b", b"g").unwrap();
        let keys: Vec<Vec<u8>> = got.into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"c".to_vec(), b"e".to_vec()]);
    }

    #[test]
    fn with_config_selects_the_named_backend() {
        let mut pope = Client::with_config(cipher(), Config::new(5, 4, BackendKind::Pope).unwrap()).unwrap();
        pope.insert(b"apple", b"apple-value").unwrap();
        assert_eq!(pope.lookup(b"apple").unwrap(), Some(b"apple-value".to_vec()));

        let mut mope = Client::with_config(cipher(), Config::new(4, 4, BackendKind::Mope).unwrap()).unwrap();
        mope.insert(b"apple", b"apple-value").unwrap();
        assert_eq!(mope.lookup(b"apple").unwrap(), Some(b"apple-value".to_vec()));

        let mut cheater =
            Client::with_config(cipher(), Config::new(5, 4, BackendKind::Cheater).unwrap()).unwrap();
        cheater.insert(b"apple", b"apple-value").unwrap();
        assert_eq!(cheater.lookup(b"apple").unwrap(), Some(b"apple-value".to_vec()));
    }

    #[test]
    fn traverse_decrypts_everything() {
        let mut client = Client::new(Cheater::new(cipher()), cipher());
        client.insert(b"k", b"v1").unwrap();
        client.insert(b"k", b"v2").unwrap();
        let all = client.traverse().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(client.size(), 2);
    }
}
