//! Quota summary handler.

use axum::extract::State;
use axum::Json;

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::services::QuotaSummary;
use crate::state::AppState;

/// Usage of the caller's library and monthly exchanges against their plan.
pub async fn get_quota(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<QuotaSummary>> {
    let record = state.users.ensure_user(&user).await?;
    let resolved = state.subscriptions.resolve(&record.value).await?;
    let summary = state.quotas.summary(&user.uid, &resolved.plan).await?;
    Ok(Json(summary))
}
