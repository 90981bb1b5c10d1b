use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

pub const STARTING_TOKENS: i64 = 100;
pub const REFERRAL_BONUS: i64 = 10;
pub const DAILY_SPIN_LIMIT: i64 = 2;
pub const REFERRAL_PREFIX: &str = "REF_";

/// Persisted account row. Never physically deleted; deactivation clears `is_active`.
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct Account {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub salt: String,
    pub tokens: i64,
    pub created_at: NaiveDateTime,
    pub last_login: Option<NaiveDateTime>,
    pub is_active: bool,
    pub referral_code: String,
    pub referral_count: i64,
    pub referral_bonus: f64,
    pub spin_count: i64,
    pub spin_date: Option<NaiveDate>,
    pub spin_last_reward: i64,
}

impl Account {
    /// Spins still available on `today`. A stored date other than `today` means a fresh day.
    pub fn spins_left(&self, today: NaiveDate) -> i64 {
        if self.spin_date == Some(today) {
            (DAILY_SPIN_LIMIT - self.spin_count).max(0)
        } else {
            DAILY_SPIN_LIMIT
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewAccount {
    pub username: String,
    pub email: String,
    pub password: String,
    pub referral_code: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct AccountUpdate {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct AccountProfile {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub tokens: i64,
    pub created_at: NaiveDateTime,
    pub last_login: Option<NaiveDateTime>,
    pub is_active: bool,
    pub referral_code: String,
    pub referral_count: i64,
}

impl From<Account> for AccountProfile {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            username: account.username,
            email: account.email,
            tokens: account.tokens,
            created_at: account.created_at,
            last_login: account.last_login,
            is_active: account.is_active,
            referral_code: account.referral_code,
            referral_count: account.referral_count,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub token_type: String,
    pub user: AccountProfile,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct TokenBalance {
    pub username: String,
    pub tokens: i64,
    pub referral_bonus: f64,
    pub referral_count: i64,
}

impl From<Account> for TokenBalance {
    fn from(account: Account) -> Self {
        Self {
            username: account.username,
            tokens: account.tokens,
            referral_bonus: account.referral_bonus,
            referral_count: account.referral_count,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ReferralInfo {
    pub username: String,
    pub referral_code: String,
    pub referral_count: i64,
    pub referral_bonus: f64,
    pub total_tokens: i64,
}

impl From<Account> for ReferralInfo {
    fn from(account: Account) -> Self {
        Self {
            username: account.username,
            referral_code: account.referral_code,
            referral_count: account.referral_count,
            referral_bonus: account.referral_bonus,
            total_tokens: account.tokens,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct SpinStatus {
    pub username: String,
    pub spins_left: i64,
    pub last_reward: i64,
    pub today_date: NaiveDate,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct SpinResult {
    pub username: String,
    pub reward: i64,
    pub tokens: i64,
    pub spins_left: i64,
}
