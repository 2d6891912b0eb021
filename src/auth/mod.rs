use argon2::{Argon2, PasswordHash, PasswordHasher as _, PasswordVerifier};
use argon2::password_hash::{SaltString, rand_core::OsRng};

use crate::error::{AppError, Result};

pub mod session;

pub use session::{MemorySessionStore, SessionStore, SESSION_GROUP_ID_KEY, SESSION_MEMBER_ID_KEY};

/// Length of an account validation token.
pub const VALIDATION_HASH_LEN: usize = 40;

pub trait PasswordHasher: Send + Sync {
    fn hash(&self, password: &str) -> Result<String>;
    fn verify(&self, password: &str, hash: &str) -> Result<bool>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Argon2Hasher;

impl PasswordHasher for Argon2Hasher {
    fn hash(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let argon2 = Argon2::default();

        let password_hash = argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))?;

        Ok(password_hash.to_string())
    }

    /// A stored value that is not a PHC string never verifies.
    fn verify(&self, password: &str, hash: &str) -> Result<bool> {
        let parsed_hash = match PasswordHash::new(hash) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Stored password hash is unreadable: {}", e);
                return Ok(false);
            }
        };

        Ok(Argon2::default().verify_password(password.as_bytes(), &parsed_hash).is_ok())
    }
}

/// Source of the caller's client address.
pub trait IpProvider: Send + Sync {
    fn client_ip(&self) -> String;
}

#[derive(Debug, Clone)]
pub struct StaticIp(pub String);

impl IpProvider for StaticIp {
    fn client_ip(&self) -> String {
        self.0.clone()
    }
}

impl Default for StaticIp {
    fn default() -> Self {
        StaticIp("127.0.0.1".to_string())
    }
}

/// Fresh 40 hex character token for email confirmation.
pub fn generate_validation_hash() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; VALIDATION_HASH_LEN / 2];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn check_validation_hash(hash: &str) -> Result<()> {
    if hash.len() != VALIDATION_HASH_LEN {
        return Err(AppError::InvalidArgument(format!(
            "Validation hash must be {} characters",
            VALIDATION_HASH_LEN
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_hash_generation() {
        let hash = generate_validation_hash();
        assert_eq!(hash.len(), VALIDATION_HASH_LEN);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(hash, generate_validation_hash());
        assert!(check_validation_hash(&hash).is_ok());
        assert!(check_validation_hash("abc").is_err());
    }

    #[test]
    fn test_argon2_hasher() {
        let hasher = Argon2Hasher;
        let hash = hasher.hash("my_secure_password").unwrap();
        assert_ne!(hash, "my_secure_password");
        assert!(hasher.verify("my_secure_password", &hash).unwrap());
        assert!(!hasher.verify("wrong_password", &hash).unwrap());
        assert!(!hasher.verify("anything", "").unwrap());
    }
}
