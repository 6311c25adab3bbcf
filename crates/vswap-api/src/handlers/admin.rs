//! Administrator handlers.

use axum::extract::{Path, State};
use axum::Json;
use tracing::info;

use crate::auth::AdminUser;
use crate::error::ApiResult;
use crate::services::CustodyReport;
use crate::state::AppState;

/// Audit one user's chain of custody.
pub async fn audit_custody(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(uid): Path<String>,
) -> ApiResult<Json<CustodyReport>> {
    info!(admin = %admin.uid, user_id = %uid, "Custody audit requested");
    let report = state.custody.audit(&uid).await?;
    Ok(Json(report))
}

/// Rewrite one user's records to match the ownership histories.
pub async fn repair_custody(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(uid): Path<String>,
) -> ApiResult<Json<CustodyReport>> {
    info!(admin = %admin.uid, user_id = %uid, "Custody repair requested");
    let report = state.custody.repair(&uid).await?;
    Ok(Json(report))
}
