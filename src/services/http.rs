use axum::{
    extract::{Path, Request, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tower_http::trace::TraceLayer;

use super::{accounts::AccountRequest, ServiceError};
use crate::models::sessions::SessionClaims;
use crate::repositories::accounts::AccountError;
use crate::utils::sessions::SessionSigner;

mod accounts;

#[derive(Clone)]
pub struct AppState {
    account_channel: mpsc::Sender<AccountRequest>,
    signer: SessionSigner,
    enforce_sessions: bool,
}

impl AppState {
    pub fn new(
        account_channel: mpsc::Sender<AccountRequest>,
        signer: SessionSigner,
        enforce_sessions: bool,
    ) -> Self {
        Self {
            account_channel,
            signer,
            enforce_sessions,
        }
    }

    /// Sends a request to the account service and waits for its reply.
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, ServiceError>>) -> AccountRequest,
    ) -> Result<T, ServiceError> {
        let (response_tx, response_rx) = oneshot::channel();

        self.account_channel
            .send(build(response_tx))
            .await
            .map_err(|e| ServiceError::Communication("HTTP => Account".to_string(), e.to_string()))?;

        response_rx
            .await
            .map_err(|e| ServiceError::Communication("Account => HTTP".to_string(), e.to_string()))?
    }

    fn verify_bearer(&self, headers: &HeaderMap) -> Result<SessionClaims, ServiceError> {
        let token = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or_else(|| ServiceError::Unauthorized("Missing bearer token".to_string()))?;

        Ok(self.signer.verify(token.trim(), Utc::now())?)
    }
}

impl ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Account(error) => match error {
                AccountError::Validation(_)
                | AccountError::Conflict(_)
                | AccountError::InsufficientBalance
                | AccountError::SpinLimitExceeded => StatusCode::BAD_REQUEST,
                AccountError::InvalidCredentials => StatusCode::UNAUTHORIZED,
                AccountError::Inactive => StatusCode::FORBIDDEN,
                AccountError::NotFound => StatusCode::NOT_FOUND,
                AccountError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::Session(_) | ServiceError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ServiceError::Communication(..) | ServiceError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let detail = if status == StatusCode::INTERNAL_SERVER_ERROR {
            log::error!("Request failed: {}", self);
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

/// Rejects requests whose bearer token is not for the account named in the path.
async fn require_account_session(
    State(state): State<AppState>,
    Path(params): Path<HashMap<String, String>>,
    request: Request,
    next: Next,
) -> Result<Response, ServiceError> {
    if state.enforce_sessions {
        let claims = state.verify_bearer(request.headers())?;
        let username = params.get("username").map(String::as_str).unwrap_or_default();

        if claims.sub != username {
            return Err(ServiceError::Unauthorized(
                "Session does not belong to this account".to_string(),
            ));
        }
    }

    Ok(next.run(request).await)
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "online",
        "service": "Wicket Ledger API",
        "database": "SQLite",
    }))
}

pub fn router(state: AppState) -> Router {
    let owner = middleware::from_fn_with_state(state.clone(), require_account_session);

    let auth = Router::new()
        .route("/register", post(accounts::register))
        .route("/login", post(accounts::login))
        .route("/session", get(accounts::session))
        .route("/users", get(accounts::list_accounts))
        .route(
            "/user/{username}",
            get(accounts::get_account).merge(
                put(accounts::update_account)
                    .delete(accounts::deactivate_account)
                    .route_layer(owner.clone()),
            ),
        )
        .route("/user/{username}/tokens", get(accounts::get_tokens))
        .route(
            "/user/{username}/add-tokens",
            post(accounts::add_tokens).route_layer(owner.clone()),
        )
        .route(
            "/user/{username}/deduct-tokens",
            post(accounts::deduct_tokens).route_layer(owner.clone()),
        )
        .route("/user/{username}/referral", get(accounts::get_referral))
        .route("/user/{username}/spin-status", get(accounts::spin_status))
        .route(
            "/user/{username}/spin",
            post(accounts::spin).route_layer(owner),
        )
        .route("/health", get(health));

    Router::new()
        .nest("/auth", auth)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn start_http_server(address: &str, state: AppState) -> Result<(), anyhow::Error> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(address).await?;
    log::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            log::info!("Shutdown requested.");
        })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::{self, accounts::AccountRepository};
    use crate::services::accounts::{AccountRequestHandler, AccountService};
    use crate::services::Service;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn app(enforce_sessions: bool) -> (Router, TempDir) {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite://{}", dir.path().join("ledger.db").display());
        let repository = AccountRepository::new(repositories::connect(&url, 5).await.unwrap());
        repository.migrate().await.unwrap();

        let signer = SessionSigner::new("test-secret", 3600);
        let handler = AccountRequestHandler::new(repository, signer.clone(), 200);
        let (tx, mut rx) = mpsc::channel(64);
        tokio::spawn(async move {
            AccountService::new().run(handler, &mut rx).await;
        });

        (router(AppState::new(tx, signer, enforce_sessions)), dir)
    }

    async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

        (status, json)
    }

    async fn register(app: &Router, username: &str, email: &str, referral: Option<&str>) -> Value {
        let (status, body) = call(
            app,
            "POST",
            "/auth/register",
            Some(json!({
                "username": username,
                "email": email,
                "password": "secure123",
                "referral_code": referral,
            })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", body);

        body
    }

    #[tokio::test]
    async fn register_and_referral_flow() {
        let (app, _dir) = app(false).await;

        let fan = register(&app, "cricket_fan", "fan@x.com", None).await;
        assert_eq!(fan["token_type"], "bearer");
        assert_eq!(fan["user"]["tokens"], 100);
        let code = fan["user"]["referral_code"].as_str().unwrap().to_string();
        assert!(code.starts_with("REF_"));

        register(&app, "ref_user", "r@x.com", Some(&code)).await;

        let (status, referral) = call(&app, "GET", "/auth/user/cricket_fan/referral", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(referral["referral_count"], 1);
        assert_eq!(referral["total_tokens"], 110);
        assert_eq!(referral["referral_bonus"], 10.0);

        let (status, body) = call(
            &app,
            "POST",
            "/auth/register",
            Some(json!({
                "username": "ref_user",
                "email": "r@x.com",
                "password": "pw",
                "referral_code": code,
            })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "Username or email already exists");

        let (_, tokens) = call(&app, "GET", "/auth/user/cricket_fan/tokens", None, None).await;
        assert_eq!(tokens["tokens"], 110);
        assert_eq!(tokens["referral_count"], 1);
    }

    #[tokio::test]
    async fn malformed_body_is_a_bad_request() {
        let (app, _dir) = app(false).await;

        let (status, body) = call(
            &app,
            "POST",
            "/auth/register",
            Some(json!({ "username": "cricket_fan" })),
            None,
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].is_string());
    }

    #[tokio::test]
    async fn login_outcomes() {
        let (app, _dir) = app(false).await;
        register(&app, "cricket_fan", "fan@x.com", None).await;

        let (status, body) = call(
            &app,
            "POST",
            "/auth/login",
            Some(json!({ "username": "cricket_fan", "password": "secure123" })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["user"]["last_login"].is_string());

        let (status, wrong_password) = call(
            &app,
            "POST",
            "/auth/login",
            Some(json!({ "username": "cricket_fan", "password": "nope" })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, unknown_user) = call(
            &app,
            "POST",
            "/auth/login",
            Some(json!({ "username": "ghost", "password": "secure123" })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(wrong_password, unknown_user);

        let (status, _) = call(&app, "DELETE", "/auth/user/cricket_fan", None, None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(
            &app,
            "POST",
            "/auth/login",
            Some(json!({ "username": "cricket_fan", "password": "secure123" })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["detail"], "Account is inactive");
    }

    #[tokio::test]
    async fn token_endpoints() {
        let (app, _dir) = app(false).await;
        register(&app, "cricket_fan", "fan@x.com", None).await;

        let (status, body) = call(
            &app,
            "POST",
            "/auth/user/cricket_fan/deduct-tokens?amount=150",
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "Insufficient tokens");

        let (status, body) = call(
            &app,
            "POST",
            "/auth/user/cricket_fan/add-tokens?amount=0",
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "Amount must be positive");

        let (status, body) = call(
            &app,
            "POST",
            "/auth/user/cricket_fan/add-tokens?amount=50",
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["tokens"], 150);
        assert_eq!(body["added"], 50);

        let (status, body) = call(
            &app,
            "POST",
            "/auth/user/cricket_fan/add-tokens?amount=9223372036854775807",
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "Amount too large");

        let (status, body) = call(&app, "GET", "/auth/users", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["tokens"], 150);

        let (status, body) = call(
            &app,
            "POST",
            "/auth/user/cricket_fan/deduct-tokens?amount=150",
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["tokens"], 0);
        assert_eq!(body["deducted"], 150);

        let (status, _) = call(
            &app,
            "POST",
            "/auth/user/cricket_fan/add-tokens",
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(&app, "GET", "/auth/user/ghost/tokens", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "User not found");
    }

    #[tokio::test]
    async fn spin_endpoints() {
        let (app, _dir) = app(false).await;
        register(&app, "cricket_fan", "fan@x.com", None).await;

        let (_, status) = call(&app, "GET", "/auth/user/cricket_fan/spin-status", None, None).await;
        assert_eq!(status["spins_left"], 2);
        assert_eq!(status["last_reward"], 0);

        for expected_left in [1, 0] {
            let (code, body) = call(
                &app,
                "POST",
                "/auth/user/cricket_fan/spin?reward=15",
                None,
                None,
            )
            .await;
            assert_eq!(code, StatusCode::OK);
            assert_eq!(body["spins_left"], expected_left);
        }

        let (code, body) = call(
            &app,
            "POST",
            "/auth/user/cricket_fan/spin?reward=15",
            None,
            None,
        )
        .await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "Daily spin limit exceeded");

        let (_, tokens) = call(&app, "GET", "/auth/user/cricket_fan/tokens", None, None).await;
        assert_eq!(tokens["tokens"], 130);
    }

    #[tokio::test]
    async fn profile_update_and_listing() {
        let (app, _dir) = app(false).await;
        register(&app, "cricket_fan", "fan@x.com", None).await;
        register(&app, "ref_user", "r@x.com", None).await;

        let (status, body) = call(
            &app,
            "PUT",
            "/auth/user/cricket_fan",
            Some(json!({ "email": "r@x.com" })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "Email already in use");

        let (status, body) = call(
            &app,
            "PUT",
            "/auth/user/cricket_fan",
            Some(json!({ "password": "fresh-password" })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["email"], "fan@x.com");

        call(&app, "DELETE", "/auth/user/ref_user", None, None).await;
        let (status, users) = call(&app, "GET", "/auth/users", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(users.as_array().unwrap().len(), 1);
        assert_eq!(users[0]["username"], "cricket_fan");

        let (status, _) = call(&app, "GET", "/auth/user/ref_user", None, None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn enforced_sessions_guard_mutations() {
        let (app, _dir) = app(true).await;
        let fan = register(&app, "cricket_fan", "fan@x.com", None).await;
        let other = register(&app, "ref_user", "r@x.com", None).await;
        let fan_token = fan["access_token"].as_str().unwrap();
        let other_token = other["access_token"].as_str().unwrap();

        let uri = "/auth/user/cricket_fan/add-tokens?amount=5";
        let (status, _) = call(&app, "POST", uri, None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(&app, "POST", uri, None, Some(other_token)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = call(&app, "POST", uri, None, Some(fan_token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["tokens"], 105);

        let (status, _) = call(&app, "GET", "/auth/user/cricket_fan", None, None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, session) = call(&app, "GET", "/auth/session", None, Some(fan_token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(session["username"], "cricket_fan");
    }

    #[tokio::test]
    async fn health_reports_online() {
        let (app, _dir) = app(false).await;

        let (status, body) = call(&app, "GET", "/auth/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "online");
    }
}
