use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{MessageRecord, NotificationRecord, OnlineUser};

/// Commands sent FROM client TO server over the WebSocket.
///
/// Disconnect has no command: it is the socket closing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientCommand {
    /// Bind this connection to a user identity. The server resolves the id
    /// against the user store; an unknown id is logged and ignored.
    Announce { user_id: Uuid },

    /// Post a chat message. Invalid content is silently dropped.
    SendMessage { content: String, user_id: Uuid },

    /// Toggle the pinned flag on an existing message.
    SetPinned { message_id: Uuid, is_pinned: bool },

    /// This user started typing.
    TypingStart { user_id: Uuid, user_name: String },

    /// This user stopped typing.
    TypingStop { user_id: Uuid },
}

/// Events sent FROM server TO clients over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerEvent {
    /// Full replacement of the online roster, pushed after every
    /// presence change. One entry per distinct online user.
    OnlineRoster { users: Vec<OnlineUser> },

    /// A new chat message was persisted.
    MessageNew { message: MessageRecord },

    /// A message's pinned flag changed.
    MessagePinned { message: MessageRecord },

    /// Someone started typing. Never delivered to its origin connection.
    UserTyping { user_id: Uuid, user_name: String },

    /// Someone stopped typing. Never delivered to its origin connection.
    UserStoppedTyping { user_id: Uuid },

    /// A notification was created for the receiving user.
    NotificationNew { notification: NotificationRecord },
}
