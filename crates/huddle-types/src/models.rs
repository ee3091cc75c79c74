use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Workspace role, as stored on the user record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Manager,
    Employee,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Manager => "manager",
            Role::Employee => "employee",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "manager" => Some(Role::Manager),
            "employee" => Some(Role::Employee),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// One entry of the online roster: a user currently holding at least one
/// live connection, with the identity fields clients render next to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnlineUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub profile_photo: Option<String>,
    pub role: Role,
}

/// Sender identity embedded in a message record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sender {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub profile_photo: Option<String>,
}

/// A chat message joined with its sender, ready for broadcast or fetch.
/// Content is immutable after creation; `is_pinned` is the only field that
/// changes, via the pin operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: Uuid,
    pub sender: Sender,
    pub content: String,
    pub is_pinned: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Message,
    Task,
    Leave,
    System,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Message => "message",
            NotificationKind::Task => "task",
            NotificationKind::Leave => "leave",
            NotificationKind::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<NotificationKind> {
        match s {
            "message" => Some(NotificationKind::Message),
            "task" => Some(NotificationKind::Task),
            "leave" => Some(NotificationKind::Leave),
            "system" => Some(NotificationKind::System),
            _ => None,
        }
    }
}

/// A per-recipient notification row. Lifecycle belongs to the recipient:
/// visibility, read transitions and deletion are all scoped to `user_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub read: bool,
    pub link: Option<String>,
    pub created_at: DateTime<Utc>,
}
