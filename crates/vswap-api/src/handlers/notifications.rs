//! Notification handlers.

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use vswap_models::Notification;

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct NotificationQuery {
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct NotificationListResponse {
    pub notifications: Vec<Notification>,
}

/// The caller's notifications, newest first.
pub async fn list_notifications(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<NotificationQuery>,
) -> ApiResult<Json<NotificationListResponse>> {
    state.users.ensure_user(&user).await?;
    let notifications = state.notifications.list(&user.uid, query.limit).await?;
    Ok(Json(NotificationListResponse { notifications }))
}
