//! Our means of safely encrypting arbitrary data
//!

use aes_gcm_siv::{aead::Aead, aead::Payload, Aes256GcmSiv, KeyInit, Nonce};
use rand_chacha::{
    rand_core::{RngCore, SeedableRng},
    ChaChaRng,
};
use std::sync::Arc;

use super::Cipher;
use crate::{key_provider::KeyProvider, Error};

/// The length, in bytes, of the AEAD nonce we prepend to every ciphertext.
const NONCE_LEN: usize = 12;

/// An AES-256-GCM-SIV backed [`Cipher`].
///
/// Ciphertexts are `nonce || aead_ciphertext`, so that `decode` has everything it needs from
/// the byte string alone. The key is derived once, at construction time, from a
/// [`KeyProvider`] and a caller-chosen `context` label (so that two `AES256v1` instances
/// constructed from the same root key but different contexts -- say, one per indexed column --
/// never share key material).
#[doc(hidden)]
#[derive(Clone)]
pub struct AES256v1 {
    cipher: Aes256GcmSiv,
}

/// The identifier for the subkey used for encryption, namespaced by the caller's context.
fn key_identifier(context: &[u8]) -> Vec<u8> {
    let mut id = Vec::with_capacity(context.len() + b"AES256v1_key:".len());
    id.extend(b"AES256v1_key:");
    id.extend(context);
    id
}

impl AES256v1 {
    /// Derive a key from `key_provider` (namespaced by `context`) and build a cipher from it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyError`] if the key provider is unable to derive the subkey.
    pub fn new(key_provider: Arc<dyn KeyProvider>, context: &[u8]) -> Result<AES256v1, Error> {
        let mut key: aes_gcm_siv::Key<Aes256GcmSiv> = Default::default();
        key_provider.derive_key(&mut key, &key_identifier(context))?;

        Ok(AES256v1 {
            cipher: Aes256GcmSiv::new(&key),
        })
    }
}

impl Cipher for AES256v1 {
    fn encode(&self, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        let mut rng = ChaChaRng::from_entropy();
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rng.try_fill_bytes(&mut nonce_bytes).map_err(|e| {
            Error::EncryptionError(format!("failed to generate nonce for AES256v1: {e}"))
        })?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ct = self
            .cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad: &[],
                },
            )
            .map_err(|e| {
                Error::EncryptionError(format!("failed to AES256-encrypt plaintext ({e})"))
            })?;

        let mut out = Vec::with_capacity(NONCE_LEN + ct.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend(ct);
        Ok(out)
    }

    fn decode(&self, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        if ciphertext.len() < NONCE_LEN {
            return Err(Error::BadCiphertext(
                "ciphertext shorter than the nonce it must carry".to_string(),
            ));
        }
        let (nonce_bytes, ct) = ciphertext.split_at(NONCE_LEN);

        self.cipher
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload { msg: ct, aad: &[] },
            )
            .map_err(|e| Error::BadCiphertext(format!("failed to decrypt AES256 ciphertext ({e})")))
    }
}
