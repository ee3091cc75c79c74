use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::error;
use uuid::Uuid;

use huddle_gateway::relay;
use huddle_types::api::{Claims, PinMessageRequest};
use huddle_types::models::MessageRecord;

use crate::auth::AppState;

/// Message history cap: clients fetch the 100 most recent on load and rely
/// on the gateway broadcast from there.
const HISTORY_LIMIT: u32 = 100;

pub async fn get_messages(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    // Run the blocking DB query off the async runtime
    let db = state.db.clone();
    let messages: Vec<MessageRecord> =
        tokio::task::spawn_blocking(move || db.recent_messages(HISTORY_LIMIT))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            })?
            .map_err(|e| {
                error!("failed to fetch messages: {:#}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            })?;

    Ok(Json(messages))
}

/// REST twin of the gateway's pin command — the original UI toggles pins
/// over HTTP while the event reaches everyone through the socket. Both
/// paths share relay::set_pinned.
pub async fn pin_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
    Json(req): Json<PinMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    match relay::set_pinned(&state.dispatcher, &state.db, message_id, req.is_pinned).await {
        Some(record) => Ok(Json(record)),
        None => Err(StatusCode::NOT_FOUND),
    }
}
