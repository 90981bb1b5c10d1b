use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::models::accounts::REFERRAL_PREFIX;

pub fn generate_salt() -> String {
    let bytes: [u8; 16] = rand::random();
    hex::encode(bytes)
}

fn digest(password: &str, salt: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());

    hasher.finalize().into()
}

/// Hex SHA-256 of `salt ‖ password`.
pub fn hash_password(password: &str, salt: &str) -> String {
    hex::encode(digest(password, salt))
}

pub fn verify_password(password: &str, password_hash: &str, salt: &str) -> bool {
    let Ok(stored) = hex::decode(password_hash) else {
        return false;
    };

    bool::from(digest(password, salt)[..].ct_eq(&stored[..]))
}

/// `REF_` followed by 16 uppercase hex characters.
pub fn generate_referral_code() -> String {
    let bytes: [u8; 8] = rand::random();
    format!("{}{}", REFERRAL_PREFIX, hex::encode_upper(bytes))
}
