use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use tracing::warn;
use uuid::Uuid;

use huddle_types::models::{
    MessageRecord, NotificationKind, NotificationRecord, OnlineUser, Role, Sender,
};

use crate::Database;
use crate::models::UserRow;

/// Timestamps are stored as fixed-width millisecond RFC 3339 text so that
/// lexicographic order equals chronological order. SQLite's `datetime('now')`
/// only has second granularity, which is too coarse for message ordering.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(raw: &str, context: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            warn!("Corrupt created_at '{}' on {}: {}", raw, context, e);
            DateTime::default()
        })
}

fn parse_uuid(raw: &str, context: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt id '{}' on {}: {}", raw, context, e);
        Uuid::default()
    })
}

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        name: &str,
        email: &str,
        password_hash: &str,
        role: Role,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, name, email, password, role) VALUES (?1, ?2, ?3, ?4, ?5)",
                (id, name, email, password_hash, role.as_str()),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_email(conn, email))
    }

    /// Identity lookup used by the gateway on announce: resolves a user id
    /// to the display fields that go into the online roster.
    pub fn get_user_profile(&self, id: &str) -> Result<Option<OnlineUser>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, email, profile_photo, role FROM users WHERE id = ?1",
            )?;

            let row = stmt
                .query_row([id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                })
                .optional()?;

            Ok(row.map(|(id, name, email, profile_photo, role)| OnlineUser {
                id: parse_uuid(&id, "user"),
                name,
                email,
                profile_photo,
                role: Role::parse(&role).unwrap_or_else(|| {
                    warn!("Unknown role '{}' on user '{}'", role, id);
                    Role::Employee
                }),
            }))
        })
    }

    // -- Messages --

    pub fn insert_message(
        &self,
        id: &str,
        sender_id: &str,
        content: &str,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, sender_id, content, is_pinned, created_at)
                 VALUES (?1, ?2, ?3, 0, ?4)",
                (id, sender_id, content, format_ts(created_at)),
            )?;
            Ok(())
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRecord>> {
        self.with_conn(|conn| query_message(conn, id))
    }

    /// Flip the pinned flag. Returns false if no such message exists.
    pub fn set_message_pinned(&self, id: &str, is_pinned: bool) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET is_pinned = ?2 WHERE id = ?1",
                (id, is_pinned),
            )?;
            Ok(changed > 0)
        })
    }

    /// The `limit` most recent messages joined with sender identity,
    /// newest first.
    pub fn recent_messages(&self, limit: u32) -> Result<Vec<MessageRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{} ORDER BY m.created_at DESC, m.rowid DESC LIMIT ?1", MESSAGE_SELECT))?;

            let rows = stmt
                .query_map([limit], map_message_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Notifications --

    pub fn insert_notification(&self, n: &NotificationRecord) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO notifications (id, user_id, kind, title, message, read, link, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                (
                    n.id.to_string(),
                    n.user_id.to_string(),
                    n.kind.as_str(),
                    &n.title,
                    &n.message,
                    n.read,
                    &n.link,
                    format_ts(n.created_at),
                ),
            )?;
            Ok(())
        })
    }

    /// The `limit` most recent notifications for one recipient, newest first.
    pub fn notifications_for_user(&self, user_id: &str, limit: u32) -> Result<Vec<NotificationRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{} WHERE user_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT ?2",
                NOTIFICATION_SELECT
            ))?;

            let rows = stmt
                .query_map((user_id, limit), map_notification_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Mark one notification as read. Scoped to the owning recipient:
    /// another user's notification id behaves like a missing row.
    pub fn mark_notification_read(&self, id: &str, user_id: &str) -> Result<Option<NotificationRecord>> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE notifications SET read = 1 WHERE id = ?1 AND user_id = ?2",
                (id, user_id),
            )?;
            if changed == 0 {
                return Ok(None);
            }

            let mut stmt = conn.prepare(&format!("{} WHERE id = ?1", NOTIFICATION_SELECT))?;
            let row = stmt.query_row([id], map_notification_row).optional()?;
            Ok(row)
        })
    }

    pub fn mark_all_notifications_read(&self, user_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE notifications SET read = 1 WHERE user_id = ?1 AND read = 0",
                [user_id],
            )?;
            Ok(changed)
        })
    }

    /// Delete one notification, recipient-scoped. Returns false on a
    /// missing or foreign row.
    pub fn delete_notification(&self, id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM notifications WHERE id = ?1 AND user_id = ?2",
                (id, user_id),
            )?;
            Ok(changed > 0)
        })
    }
}

const MESSAGE_SELECT: &str = "SELECT m.id, m.sender_id, u.name, u.email, u.profile_photo,
        m.content, m.is_pinned, m.created_at
 FROM messages m
 LEFT JOIN users u ON m.sender_id = u.id";

const NOTIFICATION_SELECT: &str =
    "SELECT id, user_id, kind, title, message, read, link, created_at FROM notifications";

fn query_user_by_email(conn: &Connection, email: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, email, password, profile_photo, role, created_at
         FROM users WHERE email = ?1",
    )?;

    let row = stmt
        .query_row([email], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                name: row.get(1)?,
                email: row.get(2)?,
                password: row.get(3)?,
                profile_photo: row.get(4)?,
                role: row.get(5)?,
                created_at: row.get(6)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_message(conn: &Connection, id: &str) -> Result<Option<MessageRecord>> {
    let mut stmt = conn.prepare(&format!("{} WHERE m.id = ?1", MESSAGE_SELECT))?;
    let row = stmt.query_row([id], map_message_row).optional()?;
    Ok(row)
}

// JOIN users to embed sender identity in a single query (eliminates N+1)
fn map_message_row(row: &rusqlite::Row<'_>) -> std::result::Result<MessageRecord, rusqlite::Error> {
    let id: String = row.get(0)?;
    let sender_id: String = row.get(1)?;

    Ok(MessageRecord {
        id: parse_uuid(&id, "message"),
        sender: Sender {
            id: parse_uuid(&sender_id, "message sender"),
            name: row
                .get::<_, Option<String>>(2)?
                .unwrap_or_else(|| "unknown".to_string()),
            email: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            profile_photo: row.get(4)?,
        },
        content: row.get(5)?,
        is_pinned: row.get(6)?,
        created_at: parse_ts(&row.get::<_, String>(7)?, "message"),
    })
}

fn map_notification_row(
    row: &rusqlite::Row<'_>,
) -> std::result::Result<NotificationRecord, rusqlite::Error> {
    let id: String = row.get(0)?;
    let user_id: String = row.get(1)?;
    let kind: String = row.get(2)?;

    Ok(NotificationRecord {
        id: parse_uuid(&id, "notification"),
        user_id: parse_uuid(&user_id, "notification recipient"),
        kind: NotificationKind::parse(&kind).unwrap_or_else(|| {
            warn!("Unknown notification kind '{}' on '{}'", kind, id);
            NotificationKind::System
        }),
        title: row.get(3)?,
        message: row.get(4)?,
        read: row.get(5)?,
        link: row.get(6)?,
        created_at: parse_ts(&row.get::<_, String>(7)?, "notification"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_test_db() -> Database {
        let dir = std::env::temp_dir().join(format!("huddle_db_test_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        Database::open(&dir.join("huddle.db")).unwrap()
    }

    fn seed_user(db: &Database, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        db.create_user(
            &id.to_string(),
            name,
            &format!("{}@example.com", name),
            "not-a-real-hash",
            Role::Employee,
        )
        .unwrap();
        id
    }

    fn seed_notification(db: &Database, user_id: Uuid, title: &str) -> NotificationRecord {
        let record = NotificationRecord {
            id: Uuid::new_v4(),
            user_id,
            kind: NotificationKind::Message,
            title: title.to_string(),
            message: "preview".to_string(),
            read: false,
            link: Some("/dashboard/chat".to_string()),
            created_at: Utc::now(),
        };
        db.insert_notification(&record).unwrap();
        record
    }

    #[test]
    fn notification_reads_and_deletes_are_recipient_scoped() {
        let db = open_test_db();
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bob");

        let n = seed_notification(&db, alice, "for alice");

        // bob cannot read or delete alice's row
        assert!(db
            .mark_notification_read(&n.id.to_string(), &bob.to_string())
            .unwrap()
            .is_none());
        assert!(!db.delete_notification(&n.id.to_string(), &bob.to_string()).unwrap());

        // alice can
        let updated = db
            .mark_notification_read(&n.id.to_string(), &alice.to_string())
            .unwrap()
            .expect("own row updates");
        assert!(updated.read);

        assert!(db.delete_notification(&n.id.to_string(), &alice.to_string()).unwrap());
        assert!(db
            .notifications_for_user(&alice.to_string(), 50)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn mark_all_read_touches_only_unread_rows_of_that_user() {
        let db = open_test_db();
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bob");

        seed_notification(&db, alice, "a1");
        seed_notification(&db, alice, "a2");
        let b = seed_notification(&db, bob, "b1");

        assert_eq!(db.mark_all_notifications_read(&alice.to_string()).unwrap(), 2);
        // Second pass finds nothing unread
        assert_eq!(db.mark_all_notifications_read(&alice.to_string()).unwrap(), 0);

        let bobs = db.notifications_for_user(&bob.to_string(), 50).unwrap();
        assert_eq!(bobs[0].id, b.id);
        assert!(!bobs[0].read);
    }

    #[test]
    fn recent_messages_returns_newest_first_with_sender_joined() {
        let db = open_test_db();
        let alice = seed_user(&db, "alice");

        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        db.insert_message(&first.to_string(), &alice.to_string(), "first", Utc::now())
            .unwrap();
        db.insert_message(&second.to_string(), &alice.to_string(), "second", Utc::now())
            .unwrap();

        let messages = db.recent_messages(100).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, second);
        assert_eq!(messages[1].id, first);
        assert_eq!(messages[0].sender.name, "alice");

        // The cap applies
        let capped = db.recent_messages(1).unwrap();
        assert_eq!(capped.len(), 1);
        assert_eq!(capped[0].id, second);
    }
}
