/// Database row types — these map directly to SQLite rows.
/// Distinct from the huddle-types wire models to keep the DB layer independent.

pub struct UserRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password: String,
    pub profile_photo: Option<String>,
    pub role: String,
    pub created_at: String,
}
