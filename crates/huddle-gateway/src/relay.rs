use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use huddle_db::Database;
use huddle_types::events::ServerEvent;
use huddle_types::models::MessageRecord;

use crate::dispatcher::Dispatcher;
use crate::notify;

pub const MAX_MESSAGE_CHARS: usize = 5000;

/// Why a message was dropped. The sender is never told — a best-effort
/// relay keeps no error channel for rejected input; callers log at debug.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum DropReason {
    #[error("empty after trimming")]
    Empty,
    #[error("longer than {MAX_MESSAGE_CHARS} characters")]
    TooLong,
}

pub fn validate(content: &str) -> Result<(), DropReason> {
    if content.trim().is_empty() {
        return Err(DropReason::Empty);
    }
    if content.chars().count() > MAX_MESSAGE_CHARS {
        return Err(DropReason::TooLong);
    }
    Ok(())
}

/// Strip `<` and `>` (content is rendered as-is downstream), cap the
/// length, trim. Trimming comes last so a second application is a no-op:
/// `sanitize(sanitize(x)) == sanitize(x)`.
pub fn sanitize(content: &str) -> String {
    let stripped: String = content.chars().filter(|&c| c != '<' && c != '>').collect();
    let capped: String = stripped.chars().take(MAX_MESSAGE_CHARS).collect();
    capped.trim().to_string()
}

/// Validate, sanitize, persist and broadcast one chat message, then fan
/// notifications out to the other online users.
///
/// Returns the broadcast record, or None when the message was dropped
/// (invalid content or storage failure — both are logged, neither is
/// surfaced to the sender).
pub async fn send_message(
    dispatcher: &Dispatcher,
    db: &Arc<Database>,
    sender_id: Uuid,
    content: &str,
) -> Option<MessageRecord> {
    if let Err(reason) = validate(content) {
        debug!("dropping message from {}: {}", sender_id, reason);
        return None;
    }
    let clean = sanitize(content);

    let message_id = Uuid::new_v4();
    let created_at = Utc::now();

    // Run blocking DB work off the async runtime
    let insert_db = db.clone();
    let insert_content = clean.clone();
    let stored = tokio::task::spawn_blocking(move || {
        insert_db.insert_message(
            &message_id.to_string(),
            &sender_id.to_string(),
            &insert_content,
            created_at,
        )
    })
    .await;
    match stored {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!("failed to store message from {}: {:#}", sender_id, e);
            return None;
        }
        Err(e) => {
            error!("spawn_blocking join error: {}", e);
            return None;
        }
    }

    // Re-read the persisted row joined with sender identity
    let fetch_db = db.clone();
    let record = tokio::task::spawn_blocking(move || fetch_db.get_message(&message_id.to_string()))
        .await
        .map_err(|e| error!("spawn_blocking join error: {}", e))
        .ok()?
        .map_err(|e| error!("failed to read back message {}: {:#}", message_id, e))
        .ok()??;

    dispatcher.broadcast(ServerEvent::MessageNew {
        message: record.clone(),
    });

    // Post-commit fan-out. Failures inside are isolated per recipient and
    // cannot undo or reorder the broadcast above.
    notify::fan_out_message(dispatcher, db, &record).await;

    Some(record)
}

/// Flip the pinned flag on an existing message and broadcast the updated
/// record. Unknown ids are logged and produce no broadcast.
pub async fn set_pinned(
    dispatcher: &Dispatcher,
    db: &Arc<Database>,
    message_id: Uuid,
    is_pinned: bool,
) -> Option<MessageRecord> {
    let update_db = db.clone();
    let updated = tokio::task::spawn_blocking(move || {
        update_db.set_message_pinned(&message_id.to_string(), is_pinned)
    })
    .await;
    match updated {
        Ok(Ok(true)) => {}
        Ok(Ok(false)) => {
            warn!("pin toggle for unknown message {}", message_id);
            return None;
        }
        Ok(Err(e)) => {
            error!("failed to update pin on {}: {:#}", message_id, e);
            return None;
        }
        Err(e) => {
            error!("spawn_blocking join error: {}", e);
            return None;
        }
    }

    let fetch_db = db.clone();
    let record = tokio::task::spawn_blocking(move || fetch_db.get_message(&message_id.to_string()))
        .await
        .map_err(|e| error!("spawn_blocking join error: {}", e))
        .ok()?
        .map_err(|e| error!("failed to read back message {}: {:#}", message_id, e))
        .ok()??;

    dispatcher.broadcast(ServerEvent::MessagePinned {
        message: record.clone(),
    });

    Some(record)
}
