//! Video catalog handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use validator::Validate;

use vswap_models::{Video, VideoId, VideoReport};

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::extract::ValidatedJson;
use crate::services::UploadVideo;
use crate::state::AppState;

/// Upload a video into the caller's library.
pub async fn upload_video(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(request): ValidatedJson<UploadVideo>,
) -> ApiResult<(StatusCode, Json<Video>)> {
    state.users.ensure_user(&user).await?;
    let video = state.videos.upload(&user.uid, &request).await?;
    Ok((StatusCode::CREATED, Json(video)))
}

#[derive(Serialize)]
pub struct DeleteVideoResponse {
    pub deleted: bool,
    pub video_id: VideoId,
    /// Pending exchanges that targeted the video and were removed with it.
    pub cancelled_exchanges: usize,
}

/// Delete a video the caller owns.
pub async fn delete_video(
    State(state): State<AppState>,
    user: AuthUser,
    Path(video_id): Path<String>,
) -> ApiResult<Json<DeleteVideoResponse>> {
    state.users.ensure_user(&user).await?;
    let video_id = VideoId::from_string(video_id);
    let cancelled = state.videos.delete(&user.uid, &video_id).await?;
    Ok(Json(DeleteVideoResponse {
        deleted: true,
        video_id,
        cancelled_exchanges: cancelled,
    }))
}

#[derive(Debug, Deserialize, Validate)]
pub struct SensitivityRequest {
    pub is_sensitive_content: bool,
}

/// Set or clear the sensitive-content flag on the caller's video.
pub async fn set_video_sensitivity(
    State(state): State<AppState>,
    user: AuthUser,
    Path(video_id): Path<String>,
    ValidatedJson(request): ValidatedJson<SensitivityRequest>,
) -> ApiResult<Json<Video>> {
    state.users.ensure_user(&user).await?;
    let video = state
        .videos
        .set_sensitivity(&user.uid, &VideoId::from_string(video_id), request.is_sensitive_content)
        .await?;
    Ok(Json(video))
}

#[derive(Debug, Deserialize, Validate)]
pub struct ReportRequest {
    #[validate(length(min = 1, max = 1000, message = "reason must be 1 to 1000 characters"))]
    pub reason: String,
}

/// Report a video for review.
pub async fn report_video(
    State(state): State<AppState>,
    user: AuthUser,
    Path(video_id): Path<String>,
    ValidatedJson(request): ValidatedJson<ReportRequest>,
) -> ApiResult<(StatusCode, Json<VideoReport>)> {
    state.users.ensure_user(&user).await?;
    let report = state
        .videos
        .report(&user.uid, &VideoId::from_string(video_id), &request.reason)
        .await?;
    Ok((StatusCode::CREATED, Json(report)))
}
