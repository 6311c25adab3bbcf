//! Subscription handlers.

use axum::extract::State;
use axum::Json;

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::services::ResolvedSubscription;
use crate::state::AppState;

/// Resolve the caller's effective plan.
pub async fn get_subscription(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<ResolvedSubscription>> {
    let record = state.users.ensure_user(&user).await?;
    let resolved = state.subscriptions.resolve(&record.value).await?;
    Ok(Json(resolved))
}

/// Cancel the caller's recurring subscription.
///
/// The plan stays in effect until the paid period runs out.
pub async fn cancel_subscription(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<ResolvedSubscription>> {
    let record = state.users.ensure_user(&user).await?;
    let resolved = state.subscriptions.cancel(&record.value).await?;
    Ok(Json(resolved))
}
