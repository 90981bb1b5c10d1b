use async_trait::async_trait;
use sqlx::SqlitePool;
use tokio::sync::mpsc;

use crate::repositories::accounts::{AccountError, AccountRepository};
use crate::settings::{Settings, DEFAULT_SESSION_SECRET};
use crate::utils::sessions::{SessionError, SessionSigner};

pub mod accounts;
pub mod http;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Account(#[from] AccountError),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Session(#[from] SessionError),
    #[error("{0}")]
    Unauthorized(String),
    #[error("Communication error: {0} - {1}")]
    Communication(String, String),
    #[error("Internal error: {0}")]
    Internal(String),
}

#[async_trait]
pub trait RequestHandler<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    async fn handle_request(&self, request: T);
}

#[async_trait]
pub trait Service<T, H>: Send + Sync + 'static
where
    T: Send + 'static,
    H: RequestHandler<T> + Clone + Send,
{
    /// Handles each request on its own task until every sender is dropped.
    async fn run(&mut self, handler: H, receiver: &mut mpsc::Receiver<T>) {
        while let Some(request) = receiver.recv().await {
            let handler = handler.clone();

            tokio::spawn(async move {
                handler.handle_request(request).await;
            });
        }
    }
}

pub async fn start_services(pool: SqlitePool, settings: Settings) -> Result<(), anyhow::Error> {
    let repository = AccountRepository::new(pool);
    repository.migrate().await?;
    log::info!("Account schema ready.");

    if settings.session.secret == DEFAULT_SESSION_SECRET {
        log::warn!("Using the development session secret; set session.secret in production.");
    }
    let signer = SessionSigner::new(&settings.session.secret, settings.session.ttl_seconds);

    let (account_tx, mut account_rx) = mpsc::channel(512);
    let mut account_service = accounts::AccountService::new();

    log::info!("Starting account service.");
    let handler =
        accounts::AccountRequestHandler::new(repository, signer.clone(), settings.spin.max_reward);
    let account_task = tokio::spawn(async move {
        account_service.run(handler, &mut account_rx).await;
    });

    log::info!("Starting HTTP server.");
    let state = http::AppState::new(account_tx, signer, settings.session.enforce);
    http::start_http_server(&settings.listen_address(), state).await?;

    account_task.await?;
    log::info!("Services stopped.");

    Ok(())
}
