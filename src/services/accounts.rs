use async_trait::async_trait;
use chrono::{Local, NaiveDate, Utc};
use tokio::sync::oneshot;

use super::{RequestHandler, Service, ServiceError};
use crate::models::accounts::{
    AccountProfile, AccountUpdate, AuthResponse, Credentials, NewAccount, ReferralInfo, SpinResult,
    SpinStatus, TokenBalance,
};
use crate::repositories::accounts::{AccountError, AccountRepository};
use crate::utils::sessions::SessionSigner;

type Reply<T> = oneshot::Sender<Result<T, ServiceError>>;

pub enum AccountRequest {
    Register {
        new_account: NewAccount,
        response: Reply<AuthResponse>,
    },
    Login {
        credentials: Credentials,
        response: Reply<AuthResponse>,
    },
    GetAccount {
        username: String,
        response: Reply<AccountProfile>,
    },
    ListAccounts {
        response: Reply<Vec<AccountProfile>>,
    },
    UpdateAccount {
        username: String,
        update: AccountUpdate,
        response: Reply<AccountProfile>,
    },
    DeactivateAccount {
        username: String,
        response: Reply<()>,
    },
    GetTokens {
        username: String,
        response: Reply<TokenBalance>,
    },
    AddTokens {
        username: String,
        amount: i64,
        response: Reply<i64>,
    },
    DeductTokens {
        username: String,
        amount: i64,
        response: Reply<i64>,
    },
    GetReferral {
        username: String,
        response: Reply<ReferralInfo>,
    },
    SpinStatus {
        username: String,
        response: Reply<SpinStatus>,
    },
    Spin {
        username: String,
        reward: i64,
        response: Reply<SpinResult>,
    },
}

#[derive(Clone)]
pub struct AccountRequestHandler {
    repository: AccountRepository,
    signer: SessionSigner,
    max_spin_reward: i64,
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

impl AccountRequestHandler {
    pub fn new(repository: AccountRepository, signer: SessionSigner, max_spin_reward: i64) -> Self {
        AccountRequestHandler {
            repository,
            signer,
            max_spin_reward,
        }
    }

    fn issue_session(&self, profile: AccountProfile) -> Result<AuthResponse, ServiceError> {
        let access_token = self.signer.issue(&profile.username, Utc::now())?;

        Ok(AuthResponse {
            access_token,
            token_type: "bearer".to_string(),
            user: profile,
        })
    }

    async fn register(&self, new_account: NewAccount) -> Result<AuthResponse, ServiceError> {
        if new_account.username.trim().is_empty()
            || new_account.email.trim().is_empty()
            || new_account.password.is_empty()
        {
            return Err(ServiceError::Validation(
                "Username, email and password are required".to_string(),
            ));
        }

        let account = self
            .repository
            .insert_account(&new_account, Utc::now().naive_utc())
            .await?;
        log::info!("Registered account {}.", account.username);

        self.issue_session(account.into())
    }

    async fn login(&self, credentials: Credentials) -> Result<AuthResponse, ServiceError> {
        let account = self
            .repository
            .authenticate(
                &credentials.username,
                &credentials.password,
                Utc::now().naive_utc(),
            )
            .await
            .inspect_err(|e| log::debug!("Login failed for {}: {}", credentials.username, e))?;

        self.issue_session(account.into())
    }

    async fn get_account(&self, username: &str) -> Result<AccountProfile, ServiceError> {
        let account = self
            .repository
            .get_account_by_username(username)
            .await?
            .ok_or(AccountError::NotFound)?;

        Ok(account.into())
    }

    async fn list_accounts(&self) -> Result<Vec<AccountProfile>, ServiceError> {
        let accounts = self.repository.list_active_accounts().await?;

        Ok(accounts.into_iter().map(AccountProfile::from).collect())
    }

    async fn update_account(
        &self,
        username: &str,
        update: AccountUpdate,
    ) -> Result<AccountProfile, ServiceError> {
        let account = self.repository.update_account(username, &update).await?;

        Ok(account.into())
    }

    async fn deactivate_account(&self, username: &str) -> Result<(), ServiceError> {
        self.repository.deactivate_account(username).await?;
        log::info!("Deactivated account {}.", username);

        Ok(())
    }

    async fn get_tokens(&self, username: &str) -> Result<TokenBalance, ServiceError> {
        let account = self
            .repository
            .get_account_by_username(username)
            .await?
            .ok_or(AccountError::NotFound)?;

        Ok(account.into())
    }

    async fn add_tokens(&self, username: &str, amount: i64) -> Result<i64, ServiceError> {
        let tokens = self
            .repository
            .add_tokens(username, amount)
            .await
            .inspect_err(|e| log::warn!("Credit rejected for {}: {}", username, e))?;

        Ok(tokens)
    }

    async fn deduct_tokens(&self, username: &str, amount: i64) -> Result<i64, ServiceError> {
        let tokens = self
            .repository
            .deduct_tokens(username, amount)
            .await
            .inspect_err(|e| log::warn!("Deduction rejected for {}: {}", username, e))?;

        Ok(tokens)
    }

    async fn get_referral(&self, username: &str) -> Result<ReferralInfo, ServiceError> {
        let account = self
            .repository
            .get_account_by_username(username)
            .await?
            .ok_or(AccountError::NotFound)?;

        Ok(account.into())
    }

    async fn spin_status(&self, username: &str) -> Result<SpinStatus, ServiceError> {
        let today = today();
        let account = self.repository.spin_status(username, today).await?;

        Ok(SpinStatus {
            spins_left: account.spins_left(today),
            last_reward: account.spin_last_reward,
            username: account.username,
            today_date: today,
        })
    }

    async fn spin(&self, username: &str, reward: i64) -> Result<SpinResult, ServiceError> {
        if reward < 0 || reward > self.max_spin_reward {
            return Err(ServiceError::Validation(format!(
                "Reward must be between 0 and {}",
                self.max_spin_reward
            )));
        }

        let today = today();
        let account = self
            .repository
            .record_spin(username, reward, today)
            .await
            .inspect_err(|e| log::warn!("Spin rejected for {}: {}", username, e))?;

        Ok(SpinResult {
            spins_left: account.spins_left(today),
            tokens: account.tokens,
            username: account.username,
            reward,
        })
    }
}

#[async_trait]
impl RequestHandler<AccountRequest> for AccountRequestHandler {
    async fn handle_request(&self, request: AccountRequest) {
        match request {
            AccountRequest::Register {
                new_account,
                response,
            } => {
                let result = self.register(new_account).await;
                let _ = response.send(result);
            }
            AccountRequest::Login {
                credentials,
                response,
            } => {
                let result = self.login(credentials).await;
                let _ = response.send(result);
            }
            AccountRequest::GetAccount { username, response } => {
                let result = self.get_account(&username).await;
                let _ = response.send(result);
            }
            AccountRequest::ListAccounts { response } => {
                let result = self.list_accounts().await;
                let _ = response.send(result);
            }
            AccountRequest::UpdateAccount {
                username,
                update,
                response,
            } => {
                let result = self.update_account(&username, update).await;
                let _ = response.send(result);
            }
            AccountRequest::DeactivateAccount { username, response } => {
                let result = self.deactivate_account(&username).await;
                let _ = response.send(result);
            }
            AccountRequest::GetTokens { username, response } => {
                let result = self.get_tokens(&username).await;
                let _ = response.send(result);
            }
            AccountRequest::AddTokens {
                username,
                amount,
                response,
            } => {
                let result = self.add_tokens(&username, amount).await;
                let _ = response.send(result);
            }
            AccountRequest::DeductTokens {
                username,
                amount,
                response,
            } => {
                let result = self.deduct_tokens(&username, amount).await;
                let _ = response.send(result);
            }
            AccountRequest::GetReferral { username, response } => {
                let result = self.get_referral(&username).await;
                let _ = response.send(result);
            }
            AccountRequest::SpinStatus { username, response } => {
                let result = self.spin_status(&username).await;
                let _ = response.send(result);
            }
            AccountRequest::Spin {
                username,
                reward,
                response,
            } => {
                let result = self.spin(&username, reward).await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct AccountService;

impl AccountService {
    pub fn new() -> Self {
        AccountService {}
    }
}

#[async_trait]
impl Service<AccountRequest, AccountRequestHandler> for AccountService {}
