//! Exchange and rating handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use vswap_models::{Exchange, ExchangeId, Rating, VideoId};

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::extract::ValidatedJson;
use crate::services::{CreateExchange, ExchangeView, RespondToExchange, SubmitRating};
use crate::state::AppState;

/// Request an exchange against another user's video.
pub async fn create_exchange(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(request): ValidatedJson<CreateExchange>,
) -> ApiResult<(StatusCode, Json<Exchange>)> {
    state.users.ensure_user(&user).await?;
    let exchange = state.exchanges.create(&user.uid, &request).await?;
    Ok((StatusCode::CREATED, Json(exchange)))
}

#[derive(Serialize)]
pub struct ExchangeListResponse {
    pub exchanges: Vec<ExchangeView>,
    pub total: usize,
}

/// List the caller's exchanges, newest first.
pub async fn list_exchanges(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<ExchangeListResponse>> {
    state.users.ensure_user(&user).await?;
    let exchanges = state.exchanges.list(&user.uid).await?;
    Ok(Json(ExchangeListResponse {
        total: exchanges.len(),
        exchanges,
    }))
}

/// Get one exchange with the caller's role.
pub async fn get_exchange(
    State(state): State<AppState>,
    user: AuthUser,
    Path(exchange_id): Path<String>,
) -> ApiResult<Json<ExchangeView>> {
    state.users.ensure_user(&user).await?;
    let view = state
        .exchanges
        .get(&user.uid, &ExchangeId::from_string(exchange_id))
        .await?;
    Ok(Json(view))
}

/// Accept or reject a pending exchange.
pub async fn respond_to_exchange(
    State(state): State<AppState>,
    user: AuthUser,
    Path(exchange_id): Path<String>,
    ValidatedJson(request): ValidatedJson<RespondToExchange>,
) -> ApiResult<Json<Exchange>> {
    state.users.ensure_user(&user).await?;
    let exchange = state
        .exchanges
        .respond(&user.uid, &ExchangeId::from_string(exchange_id), &request)
        .await?;
    Ok(Json(exchange))
}

#[derive(Serialize)]
pub struct DeleteExchangeResponse {
    pub deleted: bool,
    pub exchange_id: ExchangeId,
}

/// Withdraw a pending exchange the caller initiated.
pub async fn delete_exchange(
    State(state): State<AppState>,
    user: AuthUser,
    Path(exchange_id): Path<String>,
) -> ApiResult<Json<DeleteExchangeResponse>> {
    state.users.ensure_user(&user).await?;
    let exchange_id = ExchangeId::from_string(exchange_id);
    state.exchanges.delete(&user.uid, &exchange_id).await?;
    Ok(Json(DeleteExchangeResponse {
        deleted: true,
        exchange_id,
    }))
}

/// Withdraw the caller's pending exchange that targets a video.
pub async fn delete_exchange_by_video(
    State(state): State<AppState>,
    user: AuthUser,
    Path(video_id): Path<String>,
) -> ApiResult<Json<DeleteExchangeResponse>> {
    state.users.ensure_user(&user).await?;
    let exchange_id = state
        .exchanges
        .delete_by_video(&user.uid, &VideoId::from_string(video_id))
        .await?;
    Ok(Json(DeleteExchangeResponse {
        deleted: true,
        exchange_id,
    }))
}

/// Rate the counterparty of an accepted exchange.
pub async fn rate_exchange(
    State(state): State<AppState>,
    user: AuthUser,
    Path(exchange_id): Path<String>,
    ValidatedJson(request): ValidatedJson<SubmitRating>,
) -> ApiResult<(StatusCode, Json<Rating>)> {
    state.users.ensure_user(&user).await?;
    let rating = state
        .ratings
        .submit(&user.uid, &ExchangeId::from_string(exchange_id), &request)
        .await?;
    Ok((StatusCode::CREATED, Json(rating)))
}
