use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::error;
use uuid::Uuid;

use huddle_types::api::Claims;

use crate::auth::AppState;

/// Inbox cap: the 50 most recent, newest first.
const INBOX_LIMIT: u32 = 50;

/// All routes here are scoped to the calling user; a foreign notification
/// id behaves exactly like a missing one (404, never 403 — existence is
/// not leaked).
pub async fn list_notifications(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let user_id = claims.sub.to_string();
    let notifications =
        tokio::task::spawn_blocking(move || db.notifications_for_user(&user_id, INBOX_LIMIT))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            })?
            .map_err(|e| {
                error!("failed to fetch notifications for {}: {:#}", claims.sub, e);
                StatusCode::INTERNAL_SERVER_ERROR
            })?;

    Ok(Json(notifications))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(notification_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let user_id = claims.sub.to_string();
    let updated = tokio::task::spawn_blocking(move || {
        db.mark_notification_read(&notification_id.to_string(), &user_id)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .map_err(|e| {
        error!("failed to mark notification {} read: {:#}", notification_id, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    match updated {
        Some(notification) => Ok(Json(notification)),
        None => Err(StatusCode::NOT_FOUND),
    }
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let user_id = claims.sub.to_string();
    let changed = tokio::task::spawn_blocking(move || db.mark_all_notifications_read(&user_id))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("failed to mark notifications read for {}: {:#}", claims.sub, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(serde_json::json!({ "updated": changed })))
}

pub async fn delete_notification(
    State(state): State<AppState>,
    Path(notification_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let user_id = claims.sub.to_string();
    let deleted = tokio::task::spawn_blocking(move || {
        db.delete_notification(&notification_id.to_string(), &user_id)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .map_err(|e| {
        error!("failed to delete notification {}: {:#}", notification_id, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    if deleted {
        Ok(Json(serde_json::json!({ "success": true })))
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}
