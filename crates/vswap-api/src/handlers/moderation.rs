//! Moderation provider callback.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use tracing::warn;
use validator::Validate;

use vswap_models::{ModerationFrame, VideoId};

use crate::error::{ApiError, ApiResult};
use crate::extract::ValidatedJson;
use crate::services::ModerationOutcome;
use crate::state::AppState;

/// Header carrying the shared secret configured with the provider.
pub const MODERATION_SECRET_HEADER: &str = "X-Moderation-Secret";

#[derive(Debug, Deserialize, Validate)]
pub struct ModerationCallback {
    #[validate(length(min = 1, message = "video_id is required"))]
    pub video_id: String,
    #[serde(default)]
    pub frames: Vec<ModerationFrame>,
}

/// Apply an asynchronous moderation verdict to a video.
pub async fn moderation_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    ValidatedJson(callback): ValidatedJson<ModerationCallback>,
) -> ApiResult<Json<ModerationOutcome>> {
    let Some(expected) = state.config.moderation_callback_secret.as_deref() else {
        warn!("Moderation callback received but no callback secret is configured");
        return Err(ApiError::unauthorized("Moderation callbacks are not enabled"));
    };

    let provided = headers
        .get(MODERATION_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if provided != expected {
        warn!(video_id = %callback.video_id, "Moderation callback with bad secret");
        return Err(ApiError::unauthorized("Invalid moderation callback secret"));
    }

    let outcome = state
        .videos
        .apply_moderation(&VideoId::from_string(callback.video_id), &callback.frames)
        .await?;
    Ok(Json(outcome))
}
