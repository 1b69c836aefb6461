use crate::core::types::{AuthCode, RefreshTokenValue};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;

/// Bytes of entropy in every opaque value handed to a client.
pub const OPAQUE_TOKEN_BYTES: usize = 32;

pub trait FromRandom {
    fn from_random() -> Self;
}

impl FromRandom for AuthCode {
    fn from_random() -> Self {
        AuthCode(opaque_token())
    }
}

impl FromRandom for RefreshTokenValue {
    fn from_random() -> Self {
        RefreshTokenValue(opaque_token())
    }
}

pub fn random_bytes(size: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; size];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// 256 bits from the OS CSPRNG, base64url without padding.
pub fn opaque_token() -> String {
    URL_SAFE_NO_PAD.encode(random_bytes(OPAQUE_TOKEN_BYTES))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opaque_token_is_256_bits() {
        let token = opaque_token();
        assert_eq!(token.len(), 43);
        assert_eq!(URL_SAFE_NO_PAD.decode(&token).unwrap().len(), 32);
    }

    #[test]
    fn opaque_tokens_differ() {
        assert_ne!(AuthCode::from_random(), AuthCode::from_random());
        assert_ne!(RefreshTokenValue::from_random(), RefreshTokenValue::from_random());
    }
}
