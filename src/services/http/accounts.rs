use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use super::AppState;
use crate::models::accounts::{AccountUpdate, Credentials, NewAccount};
use crate::models::sessions::SessionInfo;
use crate::services::{accounts::AccountRequest, ServiceError};

#[derive(Deserialize)]
pub struct AmountQuery {
    amount: i64,
}

#[derive(Deserialize)]
pub struct RewardQuery {
    reward: i64,
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ServiceError> {
    payload
        .map(|Json(value)| value)
        .map_err(|e| ServiceError::Validation(e.body_text()))
}

fn query<T>(params: Result<Query<T>, QueryRejection>) -> Result<T, ServiceError> {
    params
        .map(|Query(value)| value)
        .map_err(|e| ServiceError::Validation(e.body_text()))
}

pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<NewAccount>, JsonRejection>,
) -> Result<impl IntoResponse, ServiceError> {
    let new_account = body(payload)?;
    let auth = state
        .request(|response| AccountRequest::Register {
            new_account,
            response,
        })
        .await?;

    Ok(Json(auth))
}

pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<impl IntoResponse, ServiceError> {
    let credentials = body(payload)?;
    let auth = state
        .request(|response| AccountRequest::Login {
            credentials,
            response,
        })
        .await?;

    Ok(Json(auth))
}

pub async fn session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ServiceError> {
    let claims = state.verify_bearer(&headers)?;
    let expires_at = DateTime::<Utc>::from_timestamp(claims.exp, 0)
        .ok_or_else(|| ServiceError::Internal("Session expiry out of range".to_string()))?;

    Ok(Json(SessionInfo {
        username: claims.sub,
        expires_at,
    }))
}

pub async fn list_accounts(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ServiceError> {
    let accounts = state
        .request(|response| AccountRequest::ListAccounts { response })
        .await?;

    Ok(Json(accounts))
}

pub async fn get_account(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let profile = state
        .request(|response| AccountRequest::GetAccount { username, response })
        .await?;

    Ok(Json(profile))
}

pub async fn update_account(
    State(state): State<AppState>,
    Path(username): Path<String>,
    payload: Result<Json<AccountUpdate>, JsonRejection>,
) -> Result<impl IntoResponse, ServiceError> {
    let update = body(payload)?;
    let profile = state
        .request(|response| AccountRequest::UpdateAccount {
            username,
            update,
            response,
        })
        .await?;

    Ok(Json(profile))
}

pub async fn deactivate_account(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let target = username.clone();
    state
        .request(|response| AccountRequest::DeactivateAccount {
            username: target,
            response,
        })
        .await?;

    Ok(Json(json!({
        "message": format!("User {} has been deactivated", username)
    })))
}

pub async fn get_tokens(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let balance = state
        .request(|response| AccountRequest::GetTokens { username, response })
        .await?;

    Ok(Json(balance))
}

pub async fn add_tokens(
    State(state): State<AppState>,
    Path(username): Path<String>,
    params: Result<Query<AmountQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ServiceError> {
    let amount = query(params)?.amount;
    let target = username.clone();
    let tokens = state
        .request(|response| AccountRequest::AddTokens {
            username: target,
            amount,
            response,
        })
        .await?;

    Ok(Json(json!({
        "username": username,
        "tokens": tokens,
        "added": amount,
    })))
}

pub async fn deduct_tokens(
    State(state): State<AppState>,
    Path(username): Path<String>,
    params: Result<Query<AmountQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ServiceError> {
    let amount = query(params)?.amount;
    let target = username.clone();
    let tokens = state
        .request(|response| AccountRequest::DeductTokens {
            username: target,
            amount,
            response,
        })
        .await?;

    Ok(Json(json!({
        "username": username,
        "tokens": tokens,
        "deducted": amount,
    })))
}

pub async fn get_referral(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let referral = state
        .request(|response| AccountRequest::GetReferral { username, response })
        .await?;

    Ok(Json(referral))
}

pub async fn spin_status(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let status = state
        .request(|response| AccountRequest::SpinStatus { username, response })
        .await?;

    Ok(Json(status))
}

pub async fn spin(
    State(state): State<AppState>,
    Path(username): Path<String>,
    params: Result<Query<RewardQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ServiceError> {
    let reward = query(params)?.reward;
    let result = state
        .request(|response| AccountRequest::Spin {
            username,
            reward,
            response,
        })
        .await?;

    Ok(Json(result))
}
