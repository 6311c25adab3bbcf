//! Account handlers.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::services::AccountRemoval;
use crate::state::AppState;

#[derive(Serialize)]
pub struct DeleteAccountResponse {
    pub deleted: bool,
    #[serde(flatten)]
    pub removed: AccountRemoval,
}

/// Delete the caller's account with its videos and exchanges.
///
/// A recurring subscription still running at the provider is cancelled first.
/// If that fails nothing is deleted and the request can be repeated.
pub async fn delete_account(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<DeleteAccountResponse>> {
    let record = state.users.get(&user.uid).await?;
    if record.value.subscription.is_billed() {
        let resolved = state.subscriptions.resolve(&record.value).await?;
        if !resolved.is_cancelled {
            state.subscriptions.cancel(&record.value).await?;
        }
    }

    let removed = state.users.delete_account(&user.uid).await?;
    Ok(Json(DeleteAccountResponse { deleted: true, removed }))
}
