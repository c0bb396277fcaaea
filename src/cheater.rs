//! A reference index that decrypts every key and value on the spot (spec §4.5). Used only to
//! cross-check [`PopeTree`](crate::PopeTree) and [`MopeTree`](crate::MopeTree) in tests: it is
//! functionally equivalent to both, but leaks everything to anyone who can read its memory, so
//! it is never a sensible deployment choice.

use crate::{Backend, Cipher, Error};

/// Stores every entry as `(plaintext key, ciphertext key, ciphertext value)`, split into a
/// batch of pending inserts and a sorted-by-plaintext-key batch that pending entries are folded
/// into on the next read (spec §4.5: "merge-sorted lazily on read").
pub struct Cheater<C: Cipher> {
    cipher: C,
    sorted: Vec<(Vec<u8>, Vec<u8>, Vec<u8>)>,
    pending: Vec<(Vec<u8>, Vec<u8>, Vec<u8>)>,
}

impl<C: Cipher> Cheater<C> {
    /// Create a new, empty cheater index around `cipher`.
    pub fn new(cipher: C) -> Cheater<C> {
        Cheater {
            cipher,
            sorted: Vec::new(),
            pending: Vec::new(),
        }
    }

    /// Insert `(key, value)`, decrypting `key` immediately so it can be sorted later.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadCiphertext`] if `key` doesn't decrypt.
    pub fn insert(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<(), Error> {
        let plain = self.cipher.decode(&key)?;
        self.pending.push((plain, key, value));
        Ok(())
    }

    /// Fold any pending inserts into the sorted batch. A no-op once nothing is pending.
    /// `Vec::sort_by` is stable, so entries with equal plaintext keys keep their original
    /// relative insertion order -- this is what lets `lookup` return "the first value inserted"
    /// for a duplicated key without any extra bookkeeping.
    fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        self.sorted.append(&mut self.pending);
        self.sorted.sort_by(|a, b| a.0.cmp(&b.0));
    }

    /// Look up the value stored for `key`, or `None` if absent. For a key inserted more than
    /// once, returns the first value inserted under it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadCiphertext`] if `key` doesn't decrypt.
    pub fn lookup(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        let plain = self.cipher.decode(key)?;
        self.flush();
        let ind = self.sorted.partition_point(|(k, _, _)| k < &plain);
        Ok(if ind < self.sorted.len() && self.sorted[ind].0 == plain {
            Some(self.sorted[ind].2.clone())
        } else {
            None
        })
    }

    /// All `(key, value)` pairs with `key1 <= key < key2` by decrypted plaintext order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadCiphertext`] if either endpoint doesn't decrypt.
    pub fn range_search(&mut self, key1: &[u8], key2: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error> {
        let p1 = self.cipher.decode(key1)?;
        let p2 = self.cipher.decode(key2)?;
        self.flush();
        let ind1 = self.sorted.partition_point(|(k, _, _)| k < &p1);
        let ind2 = self.sorted.partition_point(|(k, _, _)| k < &p2);
        if ind1 >= ind2 {
            return Ok(Vec::new());
        }
        Ok(self.sorted[ind1..ind2]
            .iter()
            .map(|(_, k, v)| (k.clone(), v.clone()))
            .collect())
    }

    /// The total number of `(key, value)` pairs stored, counting duplicates.
    pub fn size(&self) -> usize {
        self.sorted.len() + self.pending.len()
    }

    /// All `(key, value)` pairs, in ascending plaintext order (sorted entries first, then
    /// whatever's still pending a flush).
    pub fn traverse(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.sorted
            .iter()
            .chain(self.pending.iter())
            .map(|(_, k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl<C: Cipher> Backend for Cheater<C> {
    fn insert(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<(), Error> {
        Cheater::insert(self, key, value)
    }

    fn lookup(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        Cheater::lookup(self, key)
    }

    fn range_search(&mut self, key1: &[u8], key2: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error> {
        Cheater::range_search(self, key1, key2)
    }

    fn size(&self) -> usize {
        Cheater::size(self)
    }

    fn traverse(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        Cheater::traverse(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::tests::ReversingCipher;

    fn enc(s: &str) -> Vec<u8> {
        ReversingCipher::new(b"|v1").encode(s.as_bytes()).unwrap()
    }

    #[test]
    fn insert_then_lookup_round_trips() {
        let mut c = Cheater::new(ReversingCipher::new(b"|v1"));
        c.insert(enc("apple"), enc("apple-value")).unwrap();
        c.insert(enc("banana"), enc("banana-value")).unwrap();
        assert_eq!(c.lookup(&enc("apple")).unwrap(), Some(enc("apple-value")));
        assert_eq!(c.lookup(&enc("cherry")).unwrap(), None);
    }

    #[test]
    fn lookup_before_and_after_flush_agree() {
        let mut c = Cheater::new(ReversingCipher::new(b"|v1"));
        c.insert(enc("m"), enc("mv")).unwrap();
        assert_eq!(c.lookup(&enc("m")).unwrap(), Some(enc("mv")));
        // the first lookup already flushed; a second insert goes back into `pending`.
        c.insert(enc("z"), enc("zv")).unwrap();
        assert_eq!(c.lookup(&enc("z")).unwrap(), Some(enc("zv")));
    }

    #[test]
    fn range_search_is_left_inclusive_right_exclusive() {
        let mut c = Cheater::new(ReversingCipher::new(b"|v1"));
        for w in ["a", "c", "e", "g", "i"] {
            c.insert(enc(w), enc(&format!("{w}v"))).unwrap();
        }
        let got: Vec<String> = c
            .range_search(&enc("c"), &enc("g"))
            .unwrap()
            .into_iter()
            .map(|(k, _)| String::from_utf8(ReversingCipher::new(b"|v1").decode(&k).unwrap()).unwrap())
            .collect();
        assert_eq!(got, vec!["c", "e"]);
    }

    #[test]
    fn empty_range_when_bounds_coincide() {
        let mut c = Cheater::new(ReversingCipher::new(b"|v1"));
        c.insert(enc("m"), enc("mv")).unwrap();
        assert!(c.range_search(&enc("z"), &enc("z")).unwrap().is_empty());
    }

    #[test]
    fn duplicate_key_returns_first_inserted_value() {
        let mut c = Cheater::new(ReversingCipher::new(b"|v1"));
        c.insert(enc("k"), enc("v1")).unwrap();
        c.insert(enc("k"), enc("v2")).unwrap();
        assert_eq!(c.lookup(&enc("k")).unwrap(), Some(enc("v1")));
        assert_eq!(c.size(), 2);
    }
}
