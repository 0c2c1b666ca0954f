/// Database row types — these map directly to SQLite rows.
/// Distinct from duet-types API models to keep the DB layer independent.

pub struct UserRow {
    pub external_id: String,
    pub display_name: String,
    pub email: String,
    pub avatar_url: String,
    pub created_at: i64,
}

pub struct ConversationRow {
    pub id: String,
    pub participant_one: String,
    pub participant_two: String,
    pub created_at: i64,
}

pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub text: String,
    pub created_at: i64,
}

pub struct PresenceRow {
    pub user_id: String,
    pub online: bool,
    pub last_seen_at: i64,
}
