use crate::core::types::{ClientSecret, HashedClientSecret};

use super::random::random_bytes;

#[derive(Debug, thiserror::Error)]
#[error("client secret hashing failed: {0}")]
pub struct HashError(#[from] argon2::Error);

/// Argon2 hashing of client secrets, peppered with a server-side secret key.
pub struct HashingService {
    secret_key: Vec<u8>,
}

impl std::fmt::Debug for HashingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HashingService {{ ... }}")
    }
}

impl HashingService {
    pub fn with_secret_key(secret_key: impl Into<Vec<u8>>) -> Self {
        Self {
            secret_key: secret_key.into(),
        }
    }

    fn get_config(&self) -> argon2::Config<'_> {
        argon2::Config {
            secret: &self.secret_key,
            ..argon2::Config::default()
        }
    }

    pub fn hash(&self, secret: &ClientSecret) -> Result<HashedClientSecret, HashError> {
        let salt = random_bytes(16);
        let hash = argon2::hash_encoded(secret.as_ref().as_bytes(), &salt, &self.get_config())?;
        Ok(hash.into())
    }

    pub fn verify(
        &self,
        secret: &ClientSecret,
        hashed: &HashedClientSecret,
    ) -> Result<bool, HashError> {
        let ok = argon2::verify_encoded_ext(
            hashed.as_ref(),
            secret.as_ref().as_bytes(),
            &self.secret_key,
            &[],
        )?;
        Ok(ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_and_verifies() {
        let hasher = HashingService::with_secret_key(b"pepper".to_vec());
        let hashed = hasher.hash(&ClientSecret("s3cret".to_string())).unwrap();

        assert!(hasher.verify(&ClientSecret("s3cret".to_string()), &hashed).unwrap());
        assert!(!hasher.verify(&ClientSecret("wrong".to_string()), &hashed).unwrap());
    }

    #[test]
    fn pepper_is_required_to_verify() {
        let hasher = HashingService::with_secret_key(b"pepper".to_vec());
        let hashed = hasher.hash(&ClientSecret("s3cret".to_string())).unwrap();

        let other = HashingService::with_secret_key(b"other".to_vec());
        assert!(!other.verify(&ClientSecret("s3cret".to_string()), &hashed).unwrap_or(false));
    }
}
