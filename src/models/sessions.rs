use serde::{Deserialize, Serialize};

/// Claims carried inside a signed bearer token. Times are unix seconds.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct SessionClaims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SessionInfo {
    pub username: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}
