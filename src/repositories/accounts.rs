use chrono::{NaiveDate, NaiveDateTime};
use sqlx::SqlitePool;

use crate::models::accounts::{
    Account, AccountUpdate, NewAccount, DAILY_SPIN_LIMIT, REFERRAL_BONUS, STARTING_TOKENS,
};
use crate::utils::credentials;

const REFERRAL_CODE_ATTEMPTS: usize = 5;
const AMOUNT_TOO_LARGE: &str = "Amount too large";

/// Highest balance that can still take `credit` without leaving i64 range.
/// SQLite turns an overflowing integer sum into a REAL instead of failing.
fn credit_ceiling(credit: i64) -> i64 {
    i64::MAX - credit.max(0)
}

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS accounts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT NOT NULL UNIQUE,
        email TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        salt TEXT NOT NULL,
        tokens INTEGER NOT NULL DEFAULT 100 CHECK (tokens >= 0),
        created_at DATETIME NOT NULL,
        last_login DATETIME,
        is_active BOOLEAN NOT NULL DEFAULT 1,
        referral_code TEXT NOT NULL UNIQUE,
        referral_count INTEGER NOT NULL DEFAULT 0,
        referral_bonus REAL NOT NULL DEFAULT 0,
        spin_count INTEGER NOT NULL DEFAULT 0,
        spin_date DATE,
        spin_last_reward INTEGER NOT NULL DEFAULT 0
    )
"#;

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Invalid username or password")]
    InvalidCredentials,
    #[error("Account is inactive")]
    Inactive,
    #[error("User not found")]
    NotFound,
    #[error("Insufficient tokens")]
    InsufficientBalance,
    #[error("Daily spin limit exceeded")]
    SpinLimitExceeded,
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

fn is_unique_violation(error: &sqlx::Error, column: Option<&str>) -> bool {
    match error {
        sqlx::Error::Database(db_error) if db_error.is_unique_violation() => match column {
            Some(column) => db_error.message().contains(column),
            None => true,
        },
        _ => false,
    }
}

#[derive(Clone)]
pub struct AccountRepository {
    conn: SqlitePool,
}

impl AccountRepository {
    pub fn new(conn: SqlitePool) -> Self {
        Self { conn }
    }

    pub async fn migrate(&self) -> Result<(), AccountError> {
        sqlx::query(SCHEMA).execute(&self.conn).await?;

        Ok(())
    }

    /// Creates the account and credits the referrer, if any, in one transaction.
    /// The existence check on username/email and the insert are a single statement.
    pub async fn insert_account(
        &self,
        new_account: &NewAccount,
        now: NaiveDateTime,
    ) -> Result<Account, AccountError> {
        let salt = credentials::generate_salt();
        let password_hash = credentials::hash_password(&new_account.password, &salt);

        let mut tx = self.conn.begin().await?;

        let mut attempts = 0;
        let account = loop {
            attempts += 1;
            let referral_code = credentials::generate_referral_code();

            let inserted = sqlx::query_as::<_, Account>(
                r#"
                    INSERT INTO accounts
                    (username, email, password_hash, salt, tokens, created_at, referral_code)
                    SELECT ?, ?, ?, ?, ?, ?, ?
                    WHERE NOT EXISTS (
                        SELECT 1 FROM accounts WHERE username = ? OR email = ?
                    )
                    RETURNING *
                "#,
            )
            .bind(&new_account.username)
            .bind(&new_account.email)
            .bind(&password_hash)
            .bind(&salt)
            .bind(STARTING_TOKENS)
            .bind(now)
            .bind(&referral_code)
            .bind(&new_account.username)
            .bind(&new_account.email)
            .fetch_optional(&mut *tx)
            .await;

            match inserted {
                Ok(Some(account)) => break account,
                Ok(None) => {
                    return Err(AccountError::Conflict(
                        "Username or email already exists".to_string(),
                    ))
                }
                Err(e)
                    if is_unique_violation(&e, Some("referral_code"))
                        && attempts < REFERRAL_CODE_ATTEMPTS =>
                {
                    log::warn!("Referral code collision, regenerating.");
                }
                Err(e) if is_unique_violation(&e, None) => {
                    return Err(AccountError::Conflict(
                        "Username or email already exists".to_string(),
                    ))
                }
                Err(e) => return Err(e.into()),
            }
        };

        if let Some(code) = new_account
            .referral_code
            .as_deref()
            .filter(|code| !code.is_empty())
        {
            let credited = sqlx::query(
                r#"
                    UPDATE accounts
                    SET referral_count = referral_count + 1,
                        tokens = tokens + ?,
                        referral_bonus = referral_bonus + ?
                    WHERE referral_code = ? AND id != ? AND tokens <= ?
                "#,
            )
            .bind(REFERRAL_BONUS)
            .bind(REFERRAL_BONUS as f64)
            .bind(code)
            .bind(account.id)
            .bind(credit_ceiling(REFERRAL_BONUS))
            .execute(&mut *tx)
            .await?;

            if credited.rows_affected() == 0 {
                log::debug!(
                    "Referral code {} cited by {} was not credited.",
                    code,
                    account.username
                );
            }
        }

        tx.commit().await?;

        Ok(account)
    }

    pub async fn get_account_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Account>, AccountError> {
        let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.conn)
            .await?;

        Ok(account)
    }

    async fn require_account(&self, username: &str) -> Result<Account, AccountError> {
        self.get_account_by_username(username)
            .await?
            .ok_or(AccountError::NotFound)
    }

    pub async fn list_active_accounts(&self) -> Result<Vec<Account>, AccountError> {
        let accounts =
            sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE is_active = 1 ORDER BY id")
                .fetch_all(&self.conn)
                .await?;

        Ok(accounts)
    }

    /// Unknown username and wrong password are indistinguishable to the caller.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
        now: NaiveDateTime,
    ) -> Result<Account, AccountError> {
        let account = self
            .get_account_by_username(username)
            .await?
            .ok_or(AccountError::InvalidCredentials)?;

        if !account.is_active {
            return Err(AccountError::Inactive);
        }

        if !credentials::verify_password(password, &account.password_hash, &account.salt) {
            return Err(AccountError::InvalidCredentials);
        }

        let account = sqlx::query_as::<_, Account>(
            "UPDATE accounts SET last_login = ? WHERE id = ? RETURNING *",
        )
        .bind(now)
        .bind(account.id)
        .fetch_one(&self.conn)
        .await?;

        Ok(account)
    }

    /// Applies only the supplied fields. A new password gets a fresh salt.
    pub async fn update_account(
        &self,
        username: &str,
        update: &AccountUpdate,
    ) -> Result<Account, AccountError> {
        let email = update.email.as_deref().filter(|email| !email.is_empty());
        let (password_hash, salt) = match update.password.as_deref().filter(|p| !p.is_empty()) {
            Some(password) => {
                let salt = credentials::generate_salt();
                (Some(credentials::hash_password(password, &salt)), Some(salt))
            }
            None => (None, None),
        };

        let updated = sqlx::query_as::<_, Account>(
            r#"
                UPDATE accounts
                SET email = COALESCE(?, email),
                    password_hash = COALESCE(?, password_hash),
                    salt = COALESCE(?, salt)
                WHERE username = ?
                RETURNING *
            "#,
        )
        .bind(email)
        .bind(password_hash)
        .bind(salt)
        .bind(username)
        .fetch_optional(&self.conn)
        .await;

        match updated {
            Ok(Some(account)) => Ok(account),
            Ok(None) => Err(AccountError::NotFound),
            Err(e) if is_unique_violation(&e, Some("email")) => {
                Err(AccountError::Conflict("Email already in use".to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn deactivate_account(&self, username: &str) -> Result<(), AccountError> {
        let result = sqlx::query("UPDATE accounts SET is_active = 0 WHERE username = ?")
            .bind(username)
            .execute(&self.conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AccountError::NotFound);
        }

        Ok(())
    }

    pub async fn add_tokens(&self, username: &str, amount: i64) -> Result<i64, AccountError> {
        if amount <= 0 {
            return Err(AccountError::Validation("Amount must be positive".to_string()));
        }

        let tokens: Option<i64> = sqlx::query_scalar(
            r#"
                UPDATE accounts SET tokens = tokens + ?
                WHERE username = ? AND tokens <= ?
                RETURNING tokens
            "#,
        )
        .bind(amount)
        .bind(username)
        .bind(credit_ceiling(amount))
        .fetch_optional(&self.conn)
        .await?;

        match tokens {
            Some(tokens) => Ok(tokens),
            None => {
                self.require_account(username).await?;
                Err(AccountError::Validation(AMOUNT_TOO_LARGE.to_string()))
            }
        }
    }

    /// Check and decrement happen in one statement, so concurrent deductions
    /// can never overdraw the balance.
    pub async fn deduct_tokens(&self, username: &str, amount: i64) -> Result<i64, AccountError> {
        if amount <= 0 {
            return Err(AccountError::Validation("Amount must be positive".to_string()));
        }

        let tokens: Option<i64> = sqlx::query_scalar(
            r#"
                UPDATE accounts SET tokens = tokens - ?
                WHERE username = ? AND tokens >= ?
                RETURNING tokens
            "#,
        )
        .bind(amount)
        .bind(username)
        .bind(amount)
        .fetch_optional(&self.conn)
        .await?;

        match tokens {
            Some(tokens) => Ok(tokens),
            None => {
                self.require_account(username).await?;
                Err(AccountError::InsufficientBalance)
            }
        }
    }

    /// Lazily resets the daily spin counter when the stored date is not `today`,
    /// then returns the account as of `today`.
    pub async fn spin_status(
        &self,
        username: &str,
        today: NaiveDate,
    ) -> Result<Account, AccountError> {
        let mut tx = self.conn.begin().await?;

        sqlx::query(
            r#"
                UPDATE accounts SET spin_count = 0, spin_date = ?
                WHERE username = ? AND (spin_date IS NULL OR spin_date != ?)
            "#,
        )
        .bind(today)
        .bind(username)
        .bind(today)
        .execute(&mut *tx)
        .await?;

        let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE username = ?")
            .bind(username)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(AccountError::NotFound)?;

        tx.commit().await?;

        Ok(account)
    }

    /// Day reset, limit check, counter increment and reward credit as one statement.
    pub async fn record_spin(
        &self,
        username: &str,
        reward: i64,
        today: NaiveDate,
    ) -> Result<Account, AccountError> {
        if reward < 0 {
            return Err(AccountError::Validation(
                "Reward must not be negative".to_string(),
            ));
        }

        let account = sqlx::query_as::<_, Account>(
            r#"
                UPDATE accounts
                SET spin_count = CASE WHEN spin_date = ? THEN spin_count + 1 ELSE 1 END,
                    spin_date = ?,
                    spin_last_reward = ?,
                    tokens = tokens + ?
                WHERE username = ?
                  AND (spin_date IS NULL OR spin_date != ? OR spin_count < ?)
                  AND tokens <= ?
                RETURNING *
            "#,
        )
        .bind(today)
        .bind(today)
        .bind(reward)
        .bind(reward)
        .bind(username)
        .bind(today)
        .bind(DAILY_SPIN_LIMIT)
        .bind(credit_ceiling(reward))
        .fetch_optional(&self.conn)
        .await?;

        match account {
            Some(account) => Ok(account),
            None => {
                let account = self.require_account(username).await?;
                if account.tokens > credit_ceiling(reward) {
                    Err(AccountError::Validation(AMOUNT_TOO_LARGE.to_string()))
                } else {
                    Err(AccountError::SpinLimitExceeded)
                }
            }
        }
    }
}
