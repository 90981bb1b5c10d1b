use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

use crate::models::sessions::SessionClaims;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SessionError {
    #[error("Malformed session token")]
    Malformed,
    #[error("Invalid session signature")]
    BadSignature,
    #[error("Session expired")]
    Expired,
    #[error("Invalid session key")]
    Key,
}

/// Issues and verifies bearer tokens of the form `hex(claims_json).hex(hmac_sha256)`.
#[derive(Clone)]
pub struct SessionSigner {
    key: Vec<u8>,
    ttl: Duration,
}

impl SessionSigner {
    pub fn new(secret: &str, ttl_seconds: i64) -> Self {
        Self {
            key: secret.as_bytes().to_vec(),
            ttl: Duration::seconds(ttl_seconds),
        }
    }

    pub fn issue(&self, username: &str, now: DateTime<Utc>) -> Result<String, SessionError> {
        let claims = SessionClaims {
            sub: username.to_string(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
            jti: Uuid::new_v4().simple().to_string(),
        };
        let payload = serde_json::to_vec(&claims).map_err(|_| SessionError::Malformed)?;
        let signature = self.mac(&payload)?.finalize().into_bytes();

        Ok(format!("{}.{}", hex::encode(&payload), hex::encode(signature)))
    }

    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<SessionClaims, SessionError> {
        let (payload_hex, signature_hex) = token.split_once('.').ok_or(SessionError::Malformed)?;
        let payload = hex::decode(payload_hex).map_err(|_| SessionError::Malformed)?;
        let signature = hex::decode(signature_hex).map_err(|_| SessionError::Malformed)?;

        self.mac(&payload)?
            .verify_slice(&signature)
            .map_err(|_| SessionError::BadSignature)?;

        let claims: SessionClaims =
            serde_json::from_slice(&payload).map_err(|_| SessionError::Malformed)?;
        if claims.exp <= now.timestamp() {
            return Err(SessionError::Expired);
        }

        Ok(claims)
    }

    fn mac(&self, payload: &[u8]) -> Result<HmacSha256, SessionError> {
        let mut mac = HmacSha256::new_from_slice(&self.key).map_err(|_| SessionError::Key)?;
        mac.update(payload);
        Ok(mac)
    }
}
