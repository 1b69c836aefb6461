use crate::core::types::TokenHash;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};

pub const ENCRYPTION_KEY_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("encryption key must be {expected} bytes, got {actual}")]
    KeyLength { expected: usize, actual: usize },
    #[error("failed to generate nonce")]
    Random,
    #[error("encryption failed")]
    Seal,
    #[error("ciphertext is malformed")]
    Malformed,
    #[error("ciphertext failed authentication")]
    Open,
}

/// AES-256-GCM sealing and HMAC-SHA-256 fingerprinting under one server secret.
pub struct CryptoCore {
    key: [u8; ENCRYPTION_KEY_LEN],
    mac: hmac::Key,
    rng: SystemRandom,
}

impl std::fmt::Debug for CryptoCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CryptoCore {{ ... }}")
    }
}

impl CryptoCore {
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != ENCRYPTION_KEY_LEN {
            return Err(CryptoError::KeyLength {
                expected: ENCRYPTION_KEY_LEN,
                actual: key.len(),
            });
        }

        let mut raw = [0u8; ENCRYPTION_KEY_LEN];
        raw.copy_from_slice(key);

        Ok(Self {
            key: raw,
            mac: hmac::Key::new(hmac::HMAC_SHA256, key),
            rng: SystemRandom::new(),
        })
    }

    fn sealing_key(&self) -> Result<LessSafeKey, CryptoError> {
        UnboundKey::new(&AES_256_GCM, &self.key)
            .map(LessSafeKey::new)
            .map_err(|_| CryptoError::Seal)
    }

    /// Output is `base64url(iv || ciphertext || tag)` with a fresh 96-bit IV.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let mut iv = [0u8; NONCE_LEN];
        self.rng.fill(&mut iv).map_err(|_| CryptoError::Random)?;

        let mut in_out = plaintext.as_bytes().to_vec();
        self.sealing_key()?
            .seal_in_place_append_tag(Nonce::assume_unique_for_key(iv), Aad::empty(), &mut in_out)
            .map_err(|_| CryptoError::Seal)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + in_out.len());
        blob.extend_from_slice(&iv);
        blob.extend_from_slice(&in_out);
        Ok(URL_SAFE_NO_PAD.encode(blob))
    }

    pub fn decrypt(&self, blob: &str) -> Result<String, CryptoError> {
        let blob = URL_SAFE_NO_PAD
            .decode(blob)
            .map_err(|_| CryptoError::Malformed)?;

        if blob.len() < NONCE_LEN + AES_256_GCM.tag_len() {
            return Err(CryptoError::Malformed);
        }

        let (iv, sealed) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(iv).map_err(|_| CryptoError::Malformed)?;

        let mut in_out = sealed.to_vec();
        let plaintext = self
            .sealing_key()?
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| CryptoError::Open)?;

        String::from_utf8(plaintext.to_vec()).map_err(|_| CryptoError::Malformed)
    }

    /// Deterministic HMAC-SHA-256 fingerprint, base64url without padding.
    pub fn hash(&self, value: &str) -> TokenHash {
        let tag = hmac::sign(&self.mac, value.as_bytes());
        TokenHash(URL_SAFE_NO_PAD.encode(tag.as_ref()))
    }

    pub fn random_opaque_token(&self) -> String {
        super::random::opaque_token()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    fn core() -> CryptoCore {
        CryptoCore::new(&[7u8; ENCRYPTION_KEY_LEN]).unwrap()
    }

    #[test]
    fn rejects_short_key() {
        assert!(matches!(
            CryptoCore::new(&[0u8; 16]),
            Err(CryptoError::KeyLength { actual: 16, .. })
        ));
    }

    #[test]
    fn encryption_uses_fresh_iv() {
        let crypto = core();
        let a = crypto.encrypt("same").unwrap();
        let b = crypto.encrypt("same").unwrap();
        assert_ne!(a, b);
        assert_eq!(crypto.decrypt(&a).unwrap(), "same");
        assert_eq!(crypto.decrypt(&b).unwrap(), "same");
    }

    #[test]
    fn wrong_key_fails() {
        let blob = core().encrypt("secret").unwrap();
        let other = CryptoCore::new(&[8u8; ENCRYPTION_KEY_LEN]).unwrap();
        assert!(matches!(other.decrypt(&blob), Err(CryptoError::Open)));
    }

    #[test]
    fn truncated_blob_fails() {
        let crypto = core();
        let blob = crypto.encrypt("secret").unwrap();
        let raw = URL_SAFE_NO_PAD.decode(&blob).unwrap();
        let truncated = URL_SAFE_NO_PAD.encode(&raw[..NONCE_LEN + 4]);
        assert!(matches!(crypto.decrypt(&truncated), Err(CryptoError::Malformed)));
        assert!(crypto.decrypt("not base64 !").is_err());
    }

    #[test]
    fn hash_is_deterministic_and_keyed() {
        let crypto = core();
        assert_eq!(crypto.hash("value"), crypto.hash("value"));
        assert_ne!(crypto.hash("value"), crypto.hash("value2"));

        let other = CryptoCore::new(&[8u8; ENCRYPTION_KEY_LEN]).unwrap();
        assert_ne!(crypto.hash("value"), other.hash("value"));
        assert!(!crypto.hash("value").0.contains('='));
    }

    #[test]
    fn opaque_tokens_hash_apart() {
        let crypto = core();
        let a = crypto.random_opaque_token();
        let b = crypto.random_opaque_token();
        assert_ne!(crypto.hash(&a), crypto.hash(&b));
    }

    proptest! {
        #[test]
        fn round_trips(value in ".{0,256}") {
            let crypto = core();
            let blob = crypto.encrypt(&value).unwrap();
            prop_assert_eq!(crypto.decrypt(&blob).unwrap(), value);
        }

        #[test]
        fn tampering_any_byte_fails(value in ".{1,64}", index in any::<prop::sample::Index>(), flip in 1u8..=255) {
            let crypto = core();
            let blob = crypto.encrypt(&value).unwrap();
            let mut raw = URL_SAFE_NO_PAD.decode(&blob).unwrap();
            let i = index.index(raw.len());
            raw[i] ^= flip;
            let tampered = URL_SAFE_NO_PAD.encode(&raw);
            prop_assert!(crypto.decrypt(&tampered).is_err());
        }
    }
}
