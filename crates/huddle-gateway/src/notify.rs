use std::sync::Arc;

use chrono::Utc;
use tracing::error;
use uuid::Uuid;

use huddle_db::Database;
use huddle_types::events::ServerEvent;
use huddle_types::models::{MessageRecord, NotificationKind, NotificationRecord};

use crate::dispatcher::Dispatcher;

pub const PREVIEW_CHARS: usize = 50;

/// First 50 characters of the content, with an ellipsis when truncated.
pub fn preview(content: &str) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

/// Create and push one notification per online user other than the sender.
///
/// This is the post-commit step of a message send: the message is already
/// persisted and broadcast. Each recipient is independent — a failed row
/// write is logged and skipped, the rest still get theirs. Nothing is
/// retried; offline users are not targeted (the rows a recipient does get
/// remain queryable through the inbox endpoints later).
pub async fn fan_out_message(dispatcher: &Dispatcher, db: &Arc<Database>, message: &MessageRecord) {
    let actor = message.sender.id;
    let recipients: Vec<Uuid> = dispatcher
        .online_user_ids()
        .await
        .into_iter()
        .filter(|id| *id != actor)
        .collect();

    for user_id in recipients {
        let record = NotificationRecord {
            id: Uuid::new_v4(),
            user_id,
            kind: NotificationKind::Message,
            title: format!("New message from {}", message.sender.name),
            message: preview(&message.content),
            read: false,
            link: Some("/dashboard/chat".to_string()),
            created_at: Utc::now(),
        };

        let insert_db = db.clone();
        let row = record.clone();
        match tokio::task::spawn_blocking(move || insert_db.insert_notification(&row)).await {
            Ok(Ok(())) => {
                dispatcher
                    .send_to_user(user_id, ServerEvent::NotificationNew {
                        notification: record,
                    })
                    .await;
            }
            Ok(Err(e)) => {
                error!("failed to store notification for {}: {:#}", user_id, e);
            }
            Err(e) => {
                error!("spawn_blocking join error: {}", e);
            }
        }
    }
}
