use anyhow::anyhow;
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use password_hash::{PasswordHash, SaltString};
use sha2::{Digest, Sha256};

pub const MIN_PASSWORD_LEN: usize = 6;

pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let phc = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!(e.to_string()))?
        .to_string();
    Ok(phc)
}

pub fn verify_password(hash: &str, password: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// A fresh reset token and the digest that is stored in its place.
pub fn new_reset_token() -> anyhow::Result<(String, String)> {
    let mut bytes = [0u8; 20];
    getrandom::getrandom(&mut bytes).map_err(|e| anyhow!(e.to_string()))?;
    let token = hex::encode(bytes);
    let digest = digest_token(&token);
    Ok((token, digest))
}

pub fn digest_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("password123").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password(&hash, "password123"));
        assert!(!verify_password(&hash, "password124"));
    }

    #[test]
    fn test_verify_rejects_malformed_hash() {
        assert!(!verify_password("plaintext", "plaintext"));
    }

    #[test]
    fn test_reset_token_digest() {
        let (token, digest) = new_reset_token().unwrap();
        assert_eq!(token.len(), 40);
        assert_eq!(digest, digest_token(&token));
        assert_ne!(token, digest);
    }
}
